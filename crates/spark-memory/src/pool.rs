//! 池化缓冲的回收契约、队列注册表与统计。
//!
//! # 模块角色（Why）
//! - 池化所有者在 `release`/`Drop` 时不释放内存，而是通过 [`BufferRecycler`] 交回所属池；
//! - 队列按 `max_capacity` 分键：同一键下的缓冲可以互相替代，复用时只需重设逻辑容量与游标。
//!
//! # 核心机制（How）
//! - [`PoolRegistry`] 使用 `DashMap<u32, spin::Mutex<VecDeque<_>>>`：分键查找只持有分片读锁，
//!   每个键的队列再由自旋锁保护，不同键之间互不阻塞；
//! - 默认所有池化分配器共享 [`PoolRegistry::global`]，测试或多租户场景可以注入独立实例；
//! - `PoolMetrics` 以 `Relaxed` 原子计数跟踪命中、未命中、回收与丢弃，[`PoolStats`] 是其值语义快照。
//!
//! # 契约说明（What）
//! - **线程安全**：注册表与统计均满足 `Send + Sync + 'static`，可在任意线程归还；
//! - **复用前提**：只有未被标记释放、且不再被任何切片或副本共享的内存才会入队，
//!   否则直接丢弃并记录 `warn` 事件；
//! - 入队时不重置游标，出队的使用方负责重置。

use std::{
    collections::VecDeque,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use dashmap::DashMap;
use spin::Mutex;

use crate::{arena::Arena, buffer::BufferParts};

/// 池化缓冲生命周期结束时的回收入口。
///
/// # 契约定义（What）
/// - 实现必须线程安全，且不得 panic：回收发生在 `Drop` 路径上；
/// - 每个池化所有者恰好触发一次 `reclaim`。
pub trait BufferRecycler: Send + Sync + 'static {
    /// 接收一块归还的内存及其最后的逻辑状态。
    fn reclaim(&self, reclaimed: ReclaimedBuffer);
}

/// 一次归还所携带的上下文：共享内存记录与归还时刻的游标、容量。
///
/// 入队时记录送入队列的分配器统计，出队或丢弃时从同一份统计扣除 `pooled_bytes`，
/// 共享注册表下被其它分配器取走也不会记错账。
pub struct ReclaimedBuffer {
    arena: Arc<Arena>,
    parts: BufferParts,
    origin: Option<Arc<PoolMetrics>>,
}

impl ReclaimedBuffer {
    pub(crate) fn new(arena: Arc<Arena>, parts: BufferParts) -> Self {
        Self {
            arena,
            parts,
            origin: None,
        }
    }

    /// 归还时的逻辑容量。
    pub fn capacity(&self) -> u32 {
        self.parts.capacity
    }

    /// 分键用的最大容量。
    pub fn max_capacity(&self) -> u32 {
        self.parts.max_capacity
    }

    pub fn reader_index(&self) -> u32 {
        self.parts.reader_index
    }

    pub fn writer_index(&self) -> u32 {
        self.parts.writer_index
    }

    /// 物理区域的字节数，可能大于逻辑容量。
    pub fn physical_len(&self) -> usize {
        self.arena.len()
    }

    /// 内存未被标记释放，且没有其它句柄仍在共享。
    pub fn is_reusable(&self) -> bool {
        !self.arena.is_freed() && Arc::strong_count(&self.arena) == 1
    }

    /// 即将入队：把物理字节记到 `origin` 名下。
    pub(crate) fn enter_pool(&mut self, origin: Arc<PoolMetrics>) {
        origin.on_pooled(self.physical_len());
        self.origin = Some(origin);
    }

    fn leave_pool(&mut self) {
        if let Some(origin) = self.origin.take() {
            origin.on_unpooled(self.physical_len());
        }
    }

    /// 放弃复用：标记内存已释放，让残留的切片或副本在检查模式下快速失败。
    pub(crate) fn discard(mut self) {
        self.leave_pool();
        self.arena.mark_freed();
    }

    pub(crate) fn into_parts(mut self) -> (Arc<Arena>, BufferParts) {
        self.leave_pool();
        (self.arena, self.parts)
    }
}

impl std::fmt::Debug for ReclaimedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReclaimedBuffer")
            .field("capacity", &self.parts.capacity)
            .field("max_capacity", &self.parts.max_capacity)
            .field("physical_len", &self.physical_len())
            .field("reusable", &self.is_reusable())
            .finish()
    }
}

/// 以 `max_capacity` 分键的空闲缓冲队列。
#[derive(Debug, Default)]
pub struct PoolRegistry {
    queues: DashMap<u32, Mutex<VecDeque<ReclaimedBuffer>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程内共享的默认注册表。
    pub fn global() -> Arc<PoolRegistry> {
        static GLOBAL: OnceLock<Arc<PoolRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(PoolRegistry::new())))
    }

    /// 某个键下当前排队的缓冲数。
    pub fn pooled(&self, max_capacity: u32) -> usize {
        self.queues
            .get(&max_capacity)
            .map(|queue| queue.lock().len())
            .unwrap_or_default()
    }

    /// 入队；队列已达 `limit` 时原样退回。
    pub(crate) fn offer(&self, reclaimed: ReclaimedBuffer, limit: usize) -> Result<(), ReclaimedBuffer> {
        let key = reclaimed.max_capacity();
        if let Some(queue) = self.queues.get(&key) {
            return push_bounded(&queue, reclaimed, limit);
        }
        let queue = self
            .queues
            .entry(key)
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        push_bounded(&queue, reclaimed, limit)
    }

    /// 出队最早归还的一块。
    pub(crate) fn poll(&self, max_capacity: u32) -> Option<ReclaimedBuffer> {
        self.queues.get(&max_capacity)?.lock().pop_front()
    }

    /// 清空某个键下的队列，返回被丢弃的物理字节数。
    pub(crate) fn drain(&self, max_capacity: u32) -> usize {
        let Some(queue) = self.queues.get(&max_capacity) else {
            return 0;
        };
        let drained: Vec<_> = queue.lock().drain(..).collect();
        drop(queue);
        drained
            .into_iter()
            .map(|reclaimed| {
                let bytes = reclaimed.physical_len();
                reclaimed.discard();
                bytes
            })
            .sum()
    }
}

fn push_bounded(
    queue: &Mutex<VecDeque<ReclaimedBuffer>>,
    reclaimed: ReclaimedBuffer,
    limit: usize,
) -> Result<(), ReclaimedBuffer> {
    let mut queue = queue.lock();
    if queue.len() >= limit {
        return Err(reclaimed);
    }
    queue.push_back(reclaimed);
    Ok(())
}

/// 池化分配器的统计快照。
///
/// - 计数类字段单调递增；
/// - `pooled_bytes` 为由本分配器归还或预填充、当前仍在队列中的物理字节数；
///   无论之后被哪个分配器取走或清空，都从本分配器的计数中扣除。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    /// 由分配器新建的物理区域数（含预填充）。
    pub fresh_allocations: u64,
    /// 从队列复用成功的次数。
    pub pool_hits: u64,
    /// 队列为空而新建区域的次数。
    pub pool_misses: u64,
    /// 成功回到队列的次数。
    pub recycled: u64,
    /// 因共享、已释放、队列已满或分配器已关闭而丢弃的次数。
    pub discarded: u64,
    /// 当前处于租借状态的池化所有者数量。
    pub active_leases: usize,
    pub pooled_bytes: usize,
}

#[derive(Debug, Default)]
pub(crate) struct PoolMetrics {
    fresh_allocations: AtomicU64,
    pool_hits: AtomicU64,
    pool_misses: AtomicU64,
    recycled: AtomicU64,
    discarded: AtomicU64,
    active_leases: AtomicUsize,
    pooled_bytes: AtomicUsize,
}

impl PoolMetrics {
    pub(crate) fn on_fresh_allocation(&self) {
        self.fresh_allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_hit(&self) {
        self.pool_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_miss(&self) {
        self.pool_misses.fetch_add(1, Ordering::Relaxed);
        self.on_fresh_allocation();
    }

    pub(crate) fn on_pooled(&self, bytes: usize) {
        self.pooled_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn on_unpooled(&self, bytes: usize) {
        saturating_sub(&self.pooled_bytes, bytes);
    }

    pub(crate) fn on_recycled(&self) {
        self.recycled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn lease(&self) {
        self.active_leases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn end_lease(&self) {
        saturating_sub(&self.active_leases, 1);
    }

    pub(crate) fn snapshot(&self) -> PoolStats {
        PoolStats {
            fresh_allocations: self.fresh_allocations.load(Ordering::Relaxed),
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.pool_misses.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            active_leases: self.active_leases.load(Ordering::Relaxed),
            pooled_bytes: self.pooled_bytes.load(Ordering::Relaxed),
        }
    }
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}
