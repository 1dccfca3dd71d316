//! 泄漏诊断层：跟踪池化缓冲的分配点，定位遗漏的 `release`。
//!
//! # 设计背景（Why）
//! - 手动引用计数的代价是“忘记释放”只能靠观测发现；测试与灰度环境
//!   需要一个能在用例末尾断言“全部归还”的工具；
//! - 诊断以租约观察探针为载体，不包装缓冲本身：缓冲在各层之间照常
//!   流动（包括拼接），探针在旁路记录分配点序号与调用栈。

use std::backtrace::Backtrace;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;

use ripple_core::{BufError, BufProbe, DataBuf, Result};

use crate::factory::BufFactory;

use alloc::format;
use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// 泄漏检查的轮询间隔。
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 一条在案的分配记录。
struct TrackedBuf {
    /// 分配序号，随工厂单调递增，用于在报告中定位分配点。
    seq: u64,
    probe: BufProbe,
    /// 分配时捕获的调用栈；未开启 `RUST_BACKTRACE` 时为占位值。
    backtrace: Backtrace,
}

/// `LeakAwareBufFactory` 是缓冲工厂的泄漏诊断装饰器。
///
/// # 契约说明（What）
/// - 分配全部委托给内层工厂，语义不变；池化产物额外登记一条带分配
///   序号与调用栈的记录，非池化产物（含 `wrap` 系列）不参与计数，
///   无泄漏可言；
/// - [`check_now`] 立即核对：存在计数未归零的记录即报
///   `LeakDetected`；[`check_for_leaks`] 在限时内轮询，等待异步路径
///   完成释放后再下结论；
/// - 核对一经发起即关闭登记：核对只裁决发起之前的分配，核对期间或
///   之后的分配不被计入本轮。登记保持关闭直到显式调用
///   `set_tracking(true)` 开启下一轮；
/// - 已归还的记录在每次核对时剪除，工厂可跨多轮用例复用；
/// - `set_tracking(false)` 亦可手动暂停登记（既有记录保留），供基准
///   测试等不关心泄漏的场景关闭开销。
///
/// [`check_now`]: LeakAwareBufFactory::check_now
/// [`check_for_leaks`]: LeakAwareBufFactory::check_for_leaks
pub struct LeakAwareBufFactory {
    delegate: Arc<dyn BufFactory>,
    records: Mutex<Vec<TrackedBuf>>,
    tracking: AtomicBool,
    next_seq: AtomicU64,
}

impl LeakAwareBufFactory {
    /// 包装内层工厂，跟踪默认开启。
    pub fn new(delegate: Arc<dyn BufFactory>) -> Self {
        Self {
            delegate,
            records: Mutex::new(Vec::new()),
            tracking: AtomicBool::new(true),
            next_seq: AtomicU64::new(0),
        }
    }

    /// 开关分配登记；关闭期间的分配不被跟踪。
    pub fn set_tracking(&self, enabled: bool) {
        self.tracking.store(enabled, Ordering::Relaxed);
    }

    /// 仍在案（未确认归还）的记录数。
    pub fn tracked_count(&self) -> usize {
        self.lock_records().len()
    }

    /// 立即核对：剪除已归还的记录，剩余即泄漏。
    ///
    /// 发起即关闭登记，使裁决范围固定在此刻之前的分配。
    pub fn check_now(&self) -> Result<()> {
        self.set_tracking(false);
        let mut records = self.lock_records();
        records.retain(|record| record.probe.is_allocated());
        if records.is_empty() {
            return Ok(());
        }
        for record in records.iter() {
            tracing::warn!(
                seq = record.seq,
                backtrace = %record.backtrace,
                "检测到未释放的池化缓冲"
            );
        }
        let seqs: Vec<u64> = records.iter().map(|record| record.seq).collect();
        Err(BufError::leak_detected(format!(
            "{} 个池化缓冲未释放，分配序号：{}",
            seqs.len(),
            join_seqs(&seqs)
        )))
    }

    /// 限时轮询核对：在 `timeout` 内任一时刻全部归还即通过。
    ///
    /// 供存在异步释放路径（I/O 完成回调等）的用例使用；超时后以
    /// 最后一次核对结果为准。与 [`check_now`] 一样，发起即关闭登记，
    /// 轮询期间的新分配不计入本轮。
    ///
    /// [`check_now`]: LeakAwareBufFactory::check_now
    pub fn check_for_leaks(&self, timeout: Duration) -> Result<()> {
        self.set_tracking(false);
        let deadline = Instant::now() + timeout;
        loop {
            let outcome = self.check_now();
            if outcome.is_ok() || Instant::now() >= deadline {
                return outcome;
            }
            std::thread::sleep(POLL_INTERVAL.min(timeout));
        }
    }

    fn track(&self, buf: &DataBuf) {
        if !self.tracking.load(Ordering::Relaxed) {
            return;
        }
        let probe = buf.probe();
        if !probe.is_pooled() {
            return;
        }
        let record = TrackedBuf {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            probe,
            backtrace: Backtrace::capture(),
        };
        self.lock_records().push(record);
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, Vec<TrackedBuf>> {
        // 登记锁内不存在 panic 路径，毒化仅可能来自持有者线程被杀，
        // 记录本身仍然一致，继续使用。
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BufFactory for LeakAwareBufFactory {
    fn allocate(&self, initial_capacity: usize) -> Result<DataBuf> {
        let buf = self.delegate.allocate(initial_capacity)?;
        self.track(&buf);
        Ok(buf)
    }

    fn default_initial_capacity(&self) -> usize {
        self.delegate.default_initial_capacity()
    }

    fn set_default_initial_capacity(&self, capacity: usize) -> Result<()> {
        self.delegate.set_default_initial_capacity(capacity)
    }

    fn wrap(&self, mem: BytesMut) -> DataBuf {
        // 包装产物非池化，探针为空，track 自然跳过。
        self.delegate.wrap(mem)
    }

    fn wrap_slice(&self, bytes: &[u8]) -> DataBuf {
        self.delegate.wrap_slice(bytes)
    }

    fn join(&self, parts: Vec<DataBuf>) -> Result<DataBuf> {
        // 输入无需摘除任何跟踪包装：缓冲本体即裸值。拼接结果作为
        // 新的逻辑持有单位重新登记。
        let joined = self.delegate.join(parts)?;
        self.track(&joined);
        Ok(joined)
    }

    fn is_direct(&self) -> bool {
        self.delegate.is_direct()
    }
}

fn join_seqs(seqs: &[u64]) -> alloc::string::String {
    let mut out = alloc::string::String::new();
    for (index, seq) in seqs.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        out.push_str(&seq.to_string());
    }
    out
}
