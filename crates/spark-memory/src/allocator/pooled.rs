use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashSet;

use crate::{
    arena::Arena,
    buffer::{Bounds, Buffer, BufferParts, Role},
    config::{MemoryConfig, PoolConfig},
    error::{MemoryError, Result},
    pool::{BufferRecycler, PoolMetrics, PoolRegistry, PoolStats, ReclaimedBuffer},
    region::Backend,
};

use super::{Allocation, MemoryAllocator};

/// 按 `max_capacity` 分键复用缓冲的分配器。
///
/// # 模块角色（Why）
/// - 高频、等尺寸的短生命周期缓冲（编解码帧、报文暂存）反复向系统申请内存代价高，
///   归还后直接复用可以把分配压到接近零；
/// - 回收由 [`BufferRecycler`] 在池化所有者的 `release`/`Drop` 中触发，调用方无需显式归还。
///
/// # 核心机制（How）
/// - 构造时按 [`PoolConfig::pool_size`] 预填充以 `max_buffer_capacity` 为键的队列；
/// - 分配时先按请求的 `max_capacity` 出队，命中则重设逻辑容量与游标，物理区域不足时就地扩展；
///   未命中则新建区域；
/// - 归还时只接受未被释放、且没有切片或副本仍在共享的内存，每个键最多保留
///   [`PoolConfig::max_pool_size`] 块，其余直接释放。
///
/// # 契约说明（What）
/// - `max_capacity > max_buffer_capacity` 的请求返回 [`MemoryError::IllegalArgument`]；
/// - 复用的缓冲游标归零，但内容不清零；
/// - [`MemoryAllocator::close`] 之后拒绝分配，并清空本分配器用过的各个键的队列；
///   之后归还的缓冲直接释放。
///
/// # 设计权衡（Trade-offs）
/// - 默认共享 [`PoolRegistry::global`]，不同分配器之间可以互相复用同键的缓冲；
///   需要隔离时使用 [`PooledAllocator::with_registry`]；
/// - `close` 清空的是共享队列中的整个键，可能一并释放其它分配器归还的缓冲。
#[derive(Clone)]
pub struct PooledAllocator {
    inner: Arc<PoolInner>,
}

impl PooledAllocator {
    /// 使用进程级共享注册表构造。
    pub fn new(config: MemoryConfig, pool: PoolConfig) -> Result<Self> {
        Self::with_registry(config, pool, PoolRegistry::global())
    }

    /// 使用指定注册表构造。
    pub fn with_registry(config: MemoryConfig, pool: PoolConfig, registry: Arc<PoolRegistry>) -> Result<Self> {
        pool.validate()?;
        let inner = Arc::new(PoolInner {
            config,
            pool,
            backend: Backend::select(&config),
            registry,
            metrics: Arc::new(PoolMetrics::default()),
            keys: DashSet::new(),
            closed: AtomicBool::new(false),
        });
        inner.prefill()?;
        Ok(Self { inner })
    }

    pub fn pool_config(&self) -> PoolConfig {
        self.inner.pool
    }

    pub fn backend(&self) -> Backend {
        self.inner.backend
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.inner.registry
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 统计快照。
    pub fn stats(&self) -> PoolStats {
        self.inner.metrics.snapshot()
    }
}

impl std::fmt::Debug for PooledAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledAllocator")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .field("backend", &self.inner.backend)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MemoryAllocator for PooledAllocator {
    fn allocate_with(&self, request: Allocation) -> Result<Buffer> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(MemoryError::illegal_argument("pooled allocator is closed"));
        }
        request.validate()?;
        let key = request.max_capacity();
        if key > inner.pool.max_buffer_capacity() {
            return Err(MemoryError::illegal_argument(format!(
                "maxCapacity: {key} (expected: <= maxBufferCapacity({}))",
                inner.pool.max_buffer_capacity()
            )));
        }
        inner.keys.insert(key);
        let arena = match inner.registry.poll(key) {
            Some(reclaimed) => {
                inner.metrics.on_hit();
                let (arena, _) = reclaimed.into_parts();
                arena.reserve(request.capacity() as usize)?;
                tracing::debug!(
                    target: "spark_memory::pool",
                    max_capacity = key,
                    capacity = request.capacity(),
                    "pool hit"
                );
                arena
            }
            None => {
                inner.metrics.on_miss();
                tracing::debug!(
                    target: "spark_memory::pool",
                    max_capacity = key,
                    capacity = request.capacity(),
                    "pool miss"
                );
                Arc::new(Arena::allocate(inner.backend, request.capacity() as usize)?)
            }
        };
        inner.metrics.lease();
        let recycler: Arc<dyn BufferRecycler> = self.inner.clone();
        Ok(Buffer::from_arena(arena, 0, request.parts(&inner.config), Role::Owner).with_recycler(recycler))
    }

    fn config(&self) -> MemoryConfig {
        self.inner.config
    }

    fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut drained = 0usize;
        for key in inner.keys.iter() {
            drained += inner.registry.drain(*key);
        }
        tracing::debug!(
            target: "spark_memory::pool",
            drained_bytes = drained,
            "pooled allocator closed"
        );
    }
}

struct PoolInner {
    config: MemoryConfig,
    pool: PoolConfig,
    backend: Backend,
    registry: Arc<PoolRegistry>,
    metrics: Arc<PoolMetrics>,
    keys: DashSet<u32>,
    closed: AtomicBool,
}

impl PoolInner {
    fn prefill(&self) -> Result<()> {
        let key = self.pool.max_buffer_capacity();
        if self.pool.pool_size() > 0 {
            self.keys.insert(key);
        }
        for _ in 0..self.pool.pool_size() {
            let arena = Arena::allocate(self.backend, key as usize)?;
            let parts = BufferParts {
                capacity: key,
                max_capacity: key,
                reader_index: 0,
                writer_index: 0,
                bounds: Bounds::Checked,
                config: self.config,
            };
            self.metrics.on_fresh_allocation();
            let mut reclaimed = ReclaimedBuffer::new(Arc::new(arena), parts);
            reclaimed.enter_pool(Arc::clone(&self.metrics));
            if let Err(rejected) = self.registry.offer(reclaimed, self.pool.max_pool_size()) {
                rejected.discard();
                break;
            }
        }
        Ok(())
    }
}

impl BufferRecycler for PoolInner {
    fn reclaim(&self, mut reclaimed: ReclaimedBuffer) {
        self.metrics.end_lease();
        if self.closed.load(Ordering::Acquire) {
            self.metrics.on_discarded();
            reclaimed.discard();
            return;
        }
        if !reclaimed.is_reusable() {
            tracing::warn!(
                target: "spark_memory::pool",
                capacity = reclaimed.capacity(),
                max_capacity = reclaimed.max_capacity(),
                "pooled buffer is still shared or already freed, discarding"
            );
            self.metrics.on_discarded();
            reclaimed.discard();
            return;
        }
        let bytes = reclaimed.physical_len();
        let max_capacity = reclaimed.max_capacity();
        reclaimed.enter_pool(Arc::clone(&self.metrics));
        match self.registry.offer(reclaimed, self.pool.max_pool_size()) {
            Ok(()) => {
                self.metrics.on_recycled();
                // 入队与 `close` 的清空都要持有同一把队列锁：清空若已先完成，这里必然读到关闭标记。
                if self.closed.load(Ordering::Acquire) {
                    let drained = self.registry.drain(max_capacity);
                    tracing::debug!(
                        target: "spark_memory::pool",
                        max_capacity,
                        drained_bytes = drained,
                        "allocator closed while returning, draining key"
                    );
                    return;
                }
                tracing::trace!(
                    target: "spark_memory::pool",
                    max_capacity,
                    bytes,
                    "buffer returned to pool"
                );
            }
            Err(rejected) => {
                self.metrics.on_discarded();
                tracing::debug!(
                    target: "spark_memory::pool",
                    max_capacity,
                    limit = self.pool.max_pool_size(),
                    "pool queue is full, releasing buffer"
                );
                rejected.discard();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::error::codes;

    fn allocator(pool: PoolConfig) -> PooledAllocator {
        PooledAllocator::with_registry(MemoryConfig::new(), pool, Arc::new(PoolRegistry::new()))
            .expect("构造池化分配器")
    }

    #[test]
    fn prefill_populates_the_largest_key() {
        let allocator = allocator(PoolConfig::new(3, 4, 256));
        assert_eq!(allocator.registry().pooled(256), 3);
        let stats = allocator.stats();
        assert_eq!(stats.fresh_allocations, 3);
        assert_eq!(stats.pooled_bytes, 3 * 256);
    }

    #[test]
    fn released_buffers_are_reissued_with_reset_cursors() {
        let allocator = allocator(PoolConfig::new(0, 4, 1024));
        let mut first = allocator.allocate_bounded(16, 64).expect("分配");
        first.write_bytes(&[1, 2, 3]).expect("写入");
        let address = first.memory_address();
        first.release();
        assert_eq!(allocator.registry().pooled(64), 1);

        let second = allocator.allocate_bounded(8, 64).expect("复用");
        assert_eq!((second.reader_index(), second.writer_index()), (0, 0));
        assert_eq!(second.capacity(), 8);
        assert_eq!(second.memory_address(), address);
        let stats = allocator.stats();
        assert_eq!((stats.pool_hits, stats.pool_misses, stats.recycled), (1, 1, 1));
    }

    #[test]
    fn oversized_requests_are_rejected() {
        let allocator = allocator(PoolConfig::new(0, 4, 64));
        let err = allocator.allocate_bounded(8, 128).expect_err("超过池上限");
        assert_eq!(err.code(), codes::ILLEGAL_ARGUMENT);
    }

    #[test]
    fn shared_buffers_are_discarded_instead_of_pooled() {
        let allocator = allocator(PoolConfig::new(0, 4, 64));
        let owner = allocator.allocate(32).expect("分配");
        let view = owner.slice_range(0, 8).expect("切片");
        drop(owner);
        assert_eq!(allocator.registry().pooled(32), 0);
        assert_eq!(allocator.stats().discarded, 1);
        assert!(view.is_freed());
        view.release();
    }

    #[test]
    fn full_queues_release_the_surplus() {
        let allocator = allocator(PoolConfig::new(0, 1, 64));
        let a = allocator.allocate(16).expect("分配");
        let b = allocator.allocate(16).expect("分配");
        drop(a);
        drop(b);
        assert_eq!(allocator.registry().pooled(16), 1);
        assert_eq!(allocator.stats().discarded, 1);
    }

    #[test]
    fn close_drains_and_rejects() {
        let allocator = allocator(PoolConfig::new(2, 4, 128));
        let buffer = allocator.allocate(128).expect("分配");
        allocator.close();
        assert!(allocator.is_closed());
        assert_eq!(allocator.registry().pooled(128), 0);
        assert!(allocator.allocate(16).is_err());
        drop(buffer);
        assert_eq!(allocator.registry().pooled(128), 0);
        let stats = allocator.stats();
        assert_eq!(stats.active_leases, 0);
        assert_eq!(stats.pooled_bytes, 0);
    }

    #[traced_test]
    #[test]
    fn pool_decisions_are_traced() {
        let allocator = allocator(PoolConfig::new(0, 4, 64));
        let owner = allocator.allocate(16).expect("分配");
        let _view = owner.duplicate().expect("副本");
        drop(owner);
        assert!(logs_contain("pool miss"));
        assert!(logs_contain("still shared or already freed"));
    }
}
