use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;

use ripple_core::{BufError, DataBuf, Result};

use crate::pool::ArenaPool;

/// 工厂默认的初始容量（字节）。
pub const DEFAULT_INITIAL_CAPACITY: usize = 256;

/// `BufFactory` 是缓冲分配策略的统一入口。
///
/// # 设计背景（Why）
/// - 传输层、协议层只依赖本契约申请缓冲，池化与否由部署侧通过
///   [`AllocationStrategy`] 决定，业务代码不感知差异；
/// - 默认初始容量是运行时可调的配置项：网关类服务常在压测后把它调到
///   典型报文大小，避免首轮扩容。
///
/// # 契约说明（What）
/// - `allocate` 返回容量不小于 `initial_capacity` 的空缓冲；
/// - `wrap`/`wrap_slice` 零拷贝/复制地包装既有内存，结果不参与池化
///   计数；
/// - `join` 按序拼接输入的可读区间，语义等同 [`DataBuf::compose`]；
/// - `set_default_initial_capacity` 拒绝零值（零容量默认值会让
///   `allocate_default` 退化为必然扩容）。
pub trait BufFactory: Send + Sync {
    /// 分配一个容量不小于 `initial_capacity` 的空缓冲。
    fn allocate(&self, initial_capacity: usize) -> Result<DataBuf>;

    /// 以默认初始容量分配。
    fn allocate_default(&self) -> Result<DataBuf> {
        self.allocate(self.default_initial_capacity())
    }

    /// 当前的默认初始容量。
    fn default_initial_capacity(&self) -> usize;

    /// 调整默认初始容量；零值被拒绝。
    fn set_default_initial_capacity(&self, capacity: usize) -> Result<()>;

    /// 零拷贝包装外部内存，内容视为已写入。
    fn wrap(&self, mem: BytesMut) -> DataBuf {
        DataBuf::wrap(mem)
    }

    /// 复制切片内容并包装为已写入的缓冲。
    fn wrap_slice(&self, bytes: &[u8]) -> DataBuf {
        DataBuf::wrap(BytesMut::from(bytes))
    }

    /// 按序拼接多个缓冲的可读区间。
    fn join(&self, parts: Vec<DataBuf>) -> Result<DataBuf> {
        DataBuf::compose(parts)
    }

    /// 本工厂是否偏好“直接内存”。
    ///
    /// 该标志仅为信息性偏好：底层存储始终是堆上的 `BytesMut`，调用方
    /// 据此做协议协商或统计归类，不应据此假设内存布局。
    fn is_direct(&self) -> bool {
        false
    }
}

fn validated_capacity(capacity: usize) -> Result<usize> {
    if capacity == 0 {
        return Err(BufError::invalid_argument("默认初始容量不得为零"));
    }
    Ok(capacity)
}

/// 非池化工厂：每次分配都直接来自堆，释放即无操作。
///
/// 适合生命周期不规则、难以遵守计数纪律的低频路径。
pub struct UnpooledBufFactory {
    default_capacity: AtomicUsize,
    direct: bool,
}

impl UnpooledBufFactory {
    pub fn new() -> Self {
        Self::with_preference(false)
    }

    fn with_preference(direct: bool) -> Self {
        Self {
            default_capacity: AtomicUsize::new(DEFAULT_INITIAL_CAPACITY),
            direct,
        }
    }
}

impl Default for UnpooledBufFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BufFactory for UnpooledBufFactory {
    fn allocate(&self, initial_capacity: usize) -> Result<DataBuf> {
        Ok(DataBuf::with_capacity(initial_capacity))
    }

    fn default_initial_capacity(&self) -> usize {
        self.default_capacity.load(Ordering::Relaxed)
    }

    fn set_default_initial_capacity(&self, capacity: usize) -> Result<()> {
        self.default_capacity
            .store(validated_capacity(capacity)?, Ordering::Relaxed);
        Ok(())
    }

    fn is_direct(&self) -> bool {
        self.direct
    }
}

/// 池化工厂：分配委托给 [`ArenaPool`]，产出的缓冲遵守引用计数纪律。
pub struct PooledBufFactory {
    pool: ArenaPool,
    default_capacity: AtomicUsize,
    direct: bool,
}

impl PooledBufFactory {
    /// 以既有池创建工厂；同一个池可被多个工厂共享。
    pub fn new(pool: ArenaPool) -> Self {
        Self::with_preference(pool, false)
    }

    fn with_preference(pool: ArenaPool, direct: bool) -> Self {
        Self {
            pool,
            default_capacity: AtomicUsize::new(DEFAULT_INITIAL_CAPACITY),
            direct,
        }
    }

    /// 底层池句柄，供监控侧读取统计。
    pub fn pool(&self) -> &ArenaPool {
        &self.pool
    }
}

impl BufFactory for PooledBufFactory {
    fn allocate(&self, initial_capacity: usize) -> Result<DataBuf> {
        self.pool.acquire(initial_capacity)
    }

    fn default_initial_capacity(&self) -> usize {
        self.default_capacity.load(Ordering::Relaxed)
    }

    fn set_default_initial_capacity(&self, capacity: usize) -> Result<()> {
        self.default_capacity
            .store(validated_capacity(capacity)?, Ordering::Relaxed);
        Ok(())
    }

    fn is_direct(&self) -> bool {
        self.direct
    }
}

/// 分配策略：堆/直接偏好 × 池化/非池化的四象限。
///
/// “直接”在本实现中是信息性偏好（见 [`BufFactory::is_direct`]），
/// 两种偏好下的实际行为仅差在该标志的取值。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationStrategy {
    HeapUnpooled,
    HeapPooled,
    DirectUnpooled,
    DirectPooled,
}

impl AllocationStrategy {
    /// 按策略构建工厂；池化策略内部各自持有独立的新池。
    pub fn build_factory(self) -> Arc<dyn BufFactory> {
        match self {
            AllocationStrategy::HeapUnpooled => Arc::new(UnpooledBufFactory::with_preference(false)),
            AllocationStrategy::DirectUnpooled => Arc::new(UnpooledBufFactory::with_preference(true)),
            AllocationStrategy::HeapPooled => {
                Arc::new(PooledBufFactory::with_preference(ArenaPool::new(), false))
            }
            AllocationStrategy::DirectPooled => {
                Arc::new(PooledBufFactory::with_preference(ArenaPool::new(), true))
            }
        }
    }

    /// 策略是否产出池化缓冲。
    pub fn is_pooled(self) -> bool {
        matches!(
            self,
            AllocationStrategy::HeapPooled | AllocationStrategy::DirectPooled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capacity_is_mutable_but_nonzero() {
        let factory = UnpooledBufFactory::new();
        assert_eq!(factory.default_initial_capacity(), DEFAULT_INITIAL_CAPACITY);
        factory
            .set_default_initial_capacity(1024)
            .expect("合法容量应被接受");
        assert_eq!(factory.default_initial_capacity(), 1024);
        assert!(factory.set_default_initial_capacity(0).is_err());
        assert_eq!(factory.default_initial_capacity(), 1024, "拒绝后配置应不变");
    }

    #[test]
    fn strategy_quadrants_report_expected_flags() {
        for strategy in [
            AllocationStrategy::HeapUnpooled,
            AllocationStrategy::HeapPooled,
            AllocationStrategy::DirectUnpooled,
            AllocationStrategy::DirectPooled,
        ] {
            let factory = strategy.build_factory();
            let buf = factory.allocate(16).expect("分配应成功");
            assert_eq!(buf.is_pooled(), strategy.is_pooled());
            assert_eq!(
                factory.is_direct(),
                matches!(
                    strategy,
                    AllocationStrategy::DirectUnpooled | AllocationStrategy::DirectPooled
                )
            );
        }
    }

    #[test]
    fn wrap_slice_copies_and_marks_written() {
        let factory = UnpooledBufFactory::new();
        let buf = factory.wrap_slice(b"abc");
        assert_eq!(buf.readable_byte_count(), 3);
        assert!(!buf.is_pooled());
    }
}
