use alloc::borrow::Cow;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::BytesMut;
use spin::Mutex;

use ripple_core::{BufError, BufRecycler, DataBuf, ReclaimedBuf, Result};

/// `ArenaPool` 提供基于自由链表的缓冲池实现，
/// 专注在**高并发、低延迟**场景下复用 `BytesMut`，以减少堆分配次数。
///
/// # 模块角色（Why）
/// - 作为池化 [`DataBuf`] 的默认来源：`acquire` 产出引用计数自 1 起的
///   池化缓冲，最后一次 `release` 经由回收契约把内存送回自由链表；
/// - 指标随取还原子更新，`statistics` 快照供监控集成，
///   `shrink_to_fit` 在压测后快速归还峰值内存。
///
/// # 核心机制（How）
/// - 内部维护 `spin::Mutex<Vec<BytesMut>>` 作为自由链表，租借时优先复用
///   足够大的块，减少重新分配；
/// - `PoolMetrics` 通过原子计数跟踪 `allocated_bytes`、`available_bytes`、
///   `active_leases` 等指标；
/// - 回收入口实现在池内部状态上：既更新统计，也将拿回的 `BytesMut`
///   放回链表。
///
/// # 契约说明（What）
/// - **线程安全**：所有共享状态均通过 `spin::Mutex` 与原子计数保护，
///   满足 `Send + Sync + 'static` 约束；
/// - **前置条件**：调用方需保证 `min_capacity` 表示真实需求；若为 0，
///   将返回最小容量的缓冲；
/// - **后置条件**：`acquire` 返回的缓冲满足 `capacity() >= min_capacity`
///   且 `is_pooled()` 为真；
/// - **驻留上限**：配置了驻留字节上限时，新分配会使驻留量越限的请求以
///   `AllocatorExhausted` 失败并累计失败计数，本层不重试。
///
/// # 设计权衡（Trade-offs）
/// - 使用自旋锁（`spin::Mutex`）而非 `parking_lot::Mutex`，以便在
///   `no_std`/线程数量有限的环境中仍能工作；
/// - 回收失败（无法重新获得 `BytesMut`）时，仅更新统计并在下次租借时
///   重新分配，牺牲部分性能换取语义稳定性；
/// - `shrink_to_fit` 采取“清空自由链表”的简单策略。
#[derive(Clone)]
pub struct ArenaPool {
    inner: Arc<ArenaInner>,
}

impl Default for ArenaPool {
    fn default() -> Self {
        Self {
            inner: Arc::new(ArenaInner::new(None)),
        }
    }
}

impl ArenaPool {
    /// 创建无驻留上限的空池实例。
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带驻留字节上限的池实例。
    ///
    /// 上限约束“池已分配且尚未随回收损失的字节总量”，即
    /// [`PoolStats::resident_bytes`]。
    pub fn with_resident_limit(limit_bytes: usize) -> Self {
        Self {
            inner: Arc::new(ArenaInner::new(Some(limit_bytes))),
        }
    }

    /// 租借一个容量不小于 `min_capacity` 的池化缓冲。
    pub fn acquire(&self, min_capacity: usize) -> Result<DataBuf> {
        let raw = self.inner.acquire_memory(min_capacity)?;
        let recycler: Arc<dyn BufRecycler> = self.inner.clone();
        Ok(DataBuf::pooled(raw, recycler))
    }

    /// 清空自由链表，返回归还给堆的字节数。
    pub fn shrink_to_fit(&self) -> usize {
        let reclaimed = self.inner.shrink_free_list();
        tracing::debug!(reclaimed_bytes = reclaimed, "缓冲池收缩完成");
        reclaimed
    }

    /// 读取当前统计快照。
    pub fn statistics(&self) -> PoolStats {
        self.inner.snapshot()
    }
}

struct ArenaInner {
    free_list: Mutex<Vec<BytesMut>>,
    resident_limit: Option<usize>,
    metrics: PoolMetrics,
}

impl ArenaInner {
    fn new(resident_limit: Option<usize>) -> Self {
        Self {
            free_list: Mutex::new(Vec::new()),
            resident_limit,
            metrics: PoolMetrics::default(),
        }
    }

    /// 从自由链表或堆上获取一个满足容量的 `BytesMut`。
    fn acquire_memory(&self, min_capacity: usize) -> Result<BytesMut> {
        let reused = {
            let mut list = self.free_list.lock();
            if let Some(index) = list.iter().position(|buf| buf.capacity() >= min_capacity) {
                let mut buf = list.swap_remove(index);
                let capacity = buf.capacity();
                buf.clear();
                self.metrics.decrease_available(capacity);
                Some(buf)
            } else {
                None
            }
        };

        let buffer = match reused {
            Some(buf) => buf,
            None => {
                if let Some(limit) = self.resident_limit {
                    let resident = self.metrics.resident_bytes.load(Ordering::Relaxed);
                    if resident.saturating_add(min_capacity) > limit {
                        self.metrics.record_failed_acquisition();
                        tracing::warn!(
                            min_capacity,
                            resident_bytes = resident,
                            resident_limit = limit,
                            "驻留上限已耗尽，拒绝租借"
                        );
                        return Err(BufError::allocator_exhausted(alloc::format!(
                            "驻留上限 {limit} 字节无法容纳 {min_capacity} 字节的新分配"
                        )));
                    }
                }
                let buf = BytesMut::with_capacity(min_capacity);
                self.metrics.increase_on_new_allocation(buf.capacity());
                buf
            }
        };
        self.metrics.increase_active_leases();
        Ok(buffer)
    }

    fn shrink_free_list(&self) -> usize {
        let mut list = self.free_list.lock();
        let reclaimed: usize = list.iter().map(BytesMut::capacity).sum();
        list.clear();
        self.metrics.decrease_on_shrink(reclaimed);
        reclaimed
    }

    fn snapshot(&self) -> PoolStats {
        let free_slots = self.free_list.lock().len();
        PoolStats {
            allocated_bytes: self.metrics.allocated_bytes.load(Ordering::Relaxed),
            resident_bytes: self.metrics.resident_bytes.load(Ordering::Relaxed),
            available_bytes: self.metrics.available_bytes.load(Ordering::Relaxed),
            active_leases: self.metrics.active_leases.load(Ordering::Relaxed),
            failed_acquisitions: self.metrics.failed_acquisitions.load(Ordering::Relaxed),
            custom_dimensions: vec![PoolStatDimension {
                key: Cow::Borrowed("arena_free_slots"),
                value: free_slots,
            }],
        }
    }
}

impl BufRecycler for ArenaInner {
    fn reclaim(&self, reclaimed: ReclaimedBuf) {
        self.metrics.decrease_active_leases();
        let capacity = reclaimed.capacity();
        match reclaimed.into_memory() {
            Some(mut buf) => {
                buf.clear();
                self.metrics.increase_available(capacity);
                self.free_list.lock().push(buf);
                tracing::trace!(capacity, "缓冲回到自由链表");
            }
            None => {
                // 内存未能夺回（例如拆分后仍被另一侧占用），只记损失。
                self.metrics.decrease_on_loss(capacity);
                tracing::trace!(capacity, "缓冲终结但内存未随租约归还");
            }
        }
    }
}

/// 池统计快照。
///
/// 字段均为采样瞬间的近似值：取还并发进行时各计数独立更新，快照不
/// 构成一致性切面。
#[derive(Clone, Debug)]
pub struct PoolStats {
    /// 池历史分配且尚未随回收损失的字节总量。
    pub allocated_bytes: usize,
    /// 当前驻留（在借 + 链表可用）的字节总量。
    pub resident_bytes: usize,
    /// 自由链表中立即可复用的字节总量。
    pub available_bytes: usize,
    /// 仍在借出的租约数量。
    pub active_leases: usize,
    /// 因驻留上限被拒绝的租借次数。
    pub failed_acquisitions: u64,
    /// 实现自定义的附加维度（如 `arena_free_slots`）。
    pub custom_dimensions: Vec<PoolStatDimension>,
}

/// 统计快照中的自定义维度。
#[derive(Clone, Debug)]
pub struct PoolStatDimension {
    /// 维度名，建议使用 `snake_case` 静态字符串。
    pub key: Cow<'static, str>,
    /// 维度取值。
    pub value: usize,
}

#[derive(Default)]
struct PoolMetrics {
    allocated_bytes: AtomicUsize,
    resident_bytes: AtomicUsize,
    available_bytes: AtomicUsize,
    active_leases: AtomicUsize,
    failed_acquisitions: AtomicU64,
}

impl PoolMetrics {
    fn increase_on_new_allocation(&self, capacity: usize) {
        self.allocated_bytes.fetch_add(capacity, Ordering::Relaxed);
        self.resident_bytes.fetch_add(capacity, Ordering::Relaxed);
    }

    fn increase_available(&self, capacity: usize) {
        self.available_bytes.fetch_add(capacity, Ordering::Relaxed);
    }

    fn decrease_available(&self, capacity: usize) {
        saturating_sub(&self.available_bytes, capacity);
    }

    fn decrease_on_loss(&self, capacity: usize) {
        saturating_sub(&self.allocated_bytes, capacity);
        saturating_sub(&self.resident_bytes, capacity);
    }

    fn decrease_on_shrink(&self, capacity: usize) {
        self.decrease_available(capacity);
        self.decrease_on_loss(capacity);
    }

    fn increase_active_leases(&self) {
        self.active_leases.fetch_add(1, Ordering::Relaxed);
    }

    fn decrease_active_leases(&self) {
        let _ = self
            .active_leases
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |prev| {
                Some(prev.saturating_sub(1))
            });
    }

    fn record_failed_acquisition(&self) {
        self.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
    }
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_capacity_returns_to_free_list() {
        let pool = ArenaPool::new();
        let mut buf = pool.acquire(64).expect("租借缓冲失败");
        assert!(buf.capacity() >= 64);
        assert!(buf.is_pooled());
        assert!(buf.release().expect("释放应为最终释放"));

        let snapshot = pool.statistics();
        assert!(snapshot.available_bytes >= 64);
        assert_eq!(snapshot.active_leases, 0);

        let reused = pool.acquire(16).expect("复用缓冲失败");
        assert!(reused.capacity() >= 16);
        let after = pool.statistics();
        assert_eq!(
            after.allocated_bytes, snapshot.allocated_bytes,
            "容量满足时复用不应新增分配"
        );
    }

    #[test]
    fn resident_limit_rejects_with_exhausted_code() {
        let pool = ArenaPool::with_resident_limit(64);
        let _held = pool.acquire(48).expect("首次租借应成功");
        let err = pool.acquire(48).expect_err("越限租借应失败");
        assert_eq!(err.code(), ripple_core::codes::ALLOCATOR_EXHAUSTED);
        assert_eq!(pool.statistics().failed_acquisitions, 1);
    }

    #[test]
    fn shrink_empties_free_list() {
        let pool = ArenaPool::new();
        let mut buf = pool.acquire(32).expect("租借缓冲失败");
        buf.release().expect("释放应成功");
        let reclaimed = pool.shrink_to_fit();
        assert!(reclaimed >= 32);
        let snapshot = pool.statistics();
        assert_eq!(snapshot.available_bytes, 0);
    }
}
