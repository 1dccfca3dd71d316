use alloc::borrow::Cow;
use alloc::boxed::Box;
use core::fmt;

/// 统一的结果别名，缺省错误类型为 [`BufError`]。
pub type Result<T, E = BufError> = core::result::Result<T, E>;

/// 稳定错误码清单。
///
/// # 约定（What）
/// - 错误码为 `'static` 字符串，形如 `buffer.<语义>`，承载机读分类；
///   人类可读的细节放在 [`BufError::message`] 中。
/// - 调用方应按码值而非消息内容做分支判断，消息文案允许演进。
pub mod codes {
    /// 游标/索引/长度参数违反 `0 <= read <= write <= capacity` 不变量族。
    pub const OUT_OF_RANGE: &str = "buffer.out_of_range";
    /// 参数在当前状态下不可接受：编码失败、对已释放缓冲的读写等。
    pub const INVALID_ARGUMENT: &str = "buffer.invalid_argument";
    /// 对引用计数已归零的池化缓冲再次调用 `release`。
    pub const DOUBLE_RELEASE: &str = "buffer.double_release";
    /// 底层分配器无法满足容量请求；本层不重试，原样上抛。
    pub const ALLOCATOR_EXHAUSTED: &str = "buffer.allocator_exhausted";
    /// 泄漏检查超时后仍有缓冲未被释放；仅由诊断层产生。
    pub const LEAK_DETECTED: &str = "buffer.leak_detected";
}

/// `BufError` 是本库所有可观察失败的最终形态。
///
/// # 设计背景（Why）
/// - 缓冲契约的失败全部属于“调用方编程错误”，不存在可自动恢复的
///   运行时分支，因此错误结构只需要承载稳定码值、排障消息与可选的
///   底层原因，不附带重试建议等治理元数据；
/// - 需要在 `no_std + alloc` 环境可用，故基于 [`core::error::Error`]
///   而非 `std::error::Error` 组织因果链。
///
/// # 契约说明（What）
/// - `code`：取自 [`codes`] 模块的稳定字符串；
/// - `message`：面向排障人员的描述，允许携带具体越界数值；
/// - `cause`：可选的底层原因（例如 UTF-8 解码失败的原始错误）。
#[derive(Debug)]
pub struct BufError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<Box<dyn core::error::Error + Send + Sync + 'static>>,
}

impl BufError {
    /// 以稳定错误码与消息构造错误。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因，保留完整因果链。
    pub fn with_cause(
        mut self,
        cause: impl core::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 越界类错误的便捷构造。
    pub fn out_of_range(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::OUT_OF_RANGE, message)
    }

    /// 非法参数/非法状态类错误的便捷构造。
    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::INVALID_ARGUMENT, message)
    }

    /// 重复释放错误的便捷构造。
    pub fn double_release(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::DOUBLE_RELEASE, message)
    }

    /// 分配器耗尽错误的便捷构造。
    pub fn allocator_exhausted(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::ALLOCATOR_EXHAUSTED, message)
    }

    /// 泄漏检测错误的便捷构造。
    pub fn leak_detected(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::LEAK_DETECTED, message)
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 返回排障消息。
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BufError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl core::error::Error for BufError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| &**cause as &(dyn core::error::Error + 'static))
    }
}

#[cfg(feature = "std")]
impl From<BufError> for std::io::Error {
    /// 将缓冲错误折叠进 `std::io` 错误域，供流式适配器使用。
    ///
    /// 越界归类为 `UnexpectedEof`（顺序读尽），其余归类为 `InvalidInput`，
    /// 原始错误保留为 source 以免丢失码值。
    fn from(err: BufError) -> Self {
        let kind = match err.code() {
            codes::OUT_OF_RANGE => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::InvalidInput,
        };
        std::io::Error::new(kind, err)
    }
}
