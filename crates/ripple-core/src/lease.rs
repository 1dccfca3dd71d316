use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use spin::Mutex;

use crate::error::{BufError, Result};

/// `BufRecycler` 描述池侧在租约终结时的回收入口。
///
/// # 设计初衷（Why）
/// - 缓冲原语不关心内存来自哪一个池，也不应依赖具体池类型；通过该
///   契约，池在构造池化缓冲时注入自身的回收句柄，最后一次 `release`
///   发生时由租约统一回调，避免上层组件散落各自的归还逻辑。
///
/// # 契约定义（What）
/// - `reclaim` 在引用计数归零时恰好被调用一次；
/// - **前置条件**：实现必须线程安全且不得 panic——回调可能发生在任意
///   持有者线程上；
/// - **后置条件**：池应据 [`ReclaimedBuf`] 更新统计，并在拿回底层内存
///   时将其放回复用链表。
pub trait BufRecycler: Send + Sync + 'static {
    /// 接收一次租约终结的回收上下文。
    fn reclaim(&self, reclaimed: ReclaimedBuf);
}

/// 一次回收动作携带的上下文。
///
/// # 设计动机（Why）
/// - 仅返回容量数字无法区分“拿回了可复用的内存块”与“只能更新统计”；
///   拆分、长期持有切片等场景下底层 `BytesMut` 可能已不可独占，此时
///   `memory` 为 `None`，池自行决定是否重新分配。
#[derive(Debug)]
pub struct ReclaimedBuf {
    capacity: usize,
    memory: Option<BytesMut>,
}

impl ReclaimedBuf {
    /// 构造回收上下文；`capacity` 应为租约最终记录的容量。
    pub fn new(capacity: usize, memory: Option<BytesMut>) -> Self {
        Self { capacity, memory }
    }

    /// 本次归还的容量，用于统计或降级决策。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 消耗结构并取出可复用的内存块（若有）。
    pub fn into_memory(self) -> Option<BytesMut> {
        self.memory
    }
}

/// `Lease` 是池化缓冲的引用计数与回收载体。
///
/// # 角色定位（Why）
/// - 引用计数是底层内存归还时机的唯一仲裁者：初始分配计 1，每次
///   `retain` 加 1，每次 `release` 减 1，减到 0 时触发 `reclaim`；
/// - 拆分产生的多个视图共享同一租约（各自 `retain`），回收以租约
///   为粒度，而非视图为粒度。
///
/// # 结构设计（How）
/// - `refs`：原子计数，跨线程的持有者可独立调用 `retain`/`release`；
/// - `capacity`：随扩容刷新，保证回收统计与实际分配一致；
/// - `slot`：暂存句柄释放/丢弃时夺回的 `BytesMut`，先到先存，
///   终结时随 [`ReclaimedBuf`] 一并交还池。
pub(crate) struct Lease {
    refs: AtomicUsize,
    capacity: AtomicUsize,
    slot: Mutex<Option<BytesMut>>,
    recycler: Arc<dyn BufRecycler>,
}

impl Lease {
    /// 新建租约，初始引用计数为 1。
    pub(crate) fn new(capacity: usize, recycler: Arc<dyn BufRecycler>) -> Self {
        Self {
            refs: AtomicUsize::new(1),
            capacity: AtomicUsize::new(capacity),
            slot: Mutex::new(None),
            recycler,
        }
    }

    /// 当前引用计数快照。
    pub(crate) fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// 计数是否仍大于零。
    pub(crate) fn is_allocated(&self) -> bool {
        self.refs() > 0
    }

    /// 为新的逻辑持有者递增计数；已终结的租约拒绝复活。
    pub(crate) fn retain(&self) -> Result<()> {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                (refs > 0).then(|| refs + 1)
            })
            .map(|_| ())
            .map_err(|_| BufError::invalid_argument("租约已终结，无法 retain"))
    }

    /// 拆分路径的计数递增：调用点已保证租约存活。
    pub(crate) fn retain_split(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// 递减计数；归零时携带暂存内存回调池。返回是否为最终释放。
    pub(crate) fn release(&self) -> Result<bool> {
        let previous = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                refs.checked_sub(1)
            })
            .map_err(|_| BufError::double_release("租约计数已归零，重复 release"))?;
        if previous == 1 {
            let memory = self.slot.lock().take();
            self.recycler
                .reclaim(ReclaimedBuf::new(self.capacity.load(Ordering::Acquire), memory));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// 暂存夺回的内存块；槽位遵循先到先存，后续重复暂存被丢弃。
    pub(crate) fn salvage(&self, mut memory: BytesMut) {
        memory.clear();
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(memory);
        }
    }

    /// 扩容后刷新租约记录的容量。
    pub(crate) fn update_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Release);
    }
}
