//! 缓冲分配器。
//!
//! # 模块定位（Why）
//! - 调用方通过 [`MemoryAllocator`] 申请缓冲，不关心后端是原生区域还是托管数组，也不关心
//!   内存是新建的还是从池中复用的；
//! - 分配参数统一收敛到 [`Allocation`]，trait 上的便捷方法只是它的不同构造方式。
//!
//! # 实现一览（How）
//! - [`DefaultAllocator`]：每次分配新建区域，释放后内存随最后一个句柄归还；
//! - [`PooledAllocator`]：按 `max_capacity` 分键复用已释放的缓冲。

mod pooled;

use std::sync::{Arc, OnceLock};

pub use pooled::PooledAllocator;

use crate::{
    arena::Arena,
    buffer::{Bounds, Buffer, BufferParts, Role},
    config::MemoryConfig,
    error::{MemoryError, Result},
    region::Backend,
};

/// 一次分配请求。
///
/// 默认值：`max_capacity == capacity`，两个游标为 0，开启边界检查。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Allocation {
    capacity: u32,
    max_capacity: u32,
    reader_index: u32,
    writer_index: u32,
    checking: bool,
}

impl Allocation {
    pub const fn new(capacity: u32) -> Self {
        Self {
            capacity,
            max_capacity: capacity,
            reader_index: 0,
            writer_index: 0,
            checking: true,
        }
    }

    pub const fn with_max_capacity(mut self, max_capacity: u32) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub const fn with_indices(mut self, reader_index: u32, writer_index: u32) -> Self {
        self.reader_index = reader_index;
        self.writer_index = writer_index;
        self
    }

    pub const fn with_checking(mut self, checking: bool) -> Self {
        self.checking = checking;
        self
    }

    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    pub const fn max_capacity(&self) -> u32 {
        self.max_capacity
    }

    pub const fn reader_index(&self) -> u32 {
        self.reader_index
    }

    pub const fn writer_index(&self) -> u32 {
        self.writer_index
    }

    pub const fn checking(&self) -> bool {
        self.checking
    }

    /// 校验容量与游标组合。
    ///
    /// - `capacity > max_capacity`：[`MemoryError::IllegalArgument`]；
    /// - 游标不满足 `reader_index <= writer_index <= capacity`：[`MemoryError::OutOfRange`]。
    pub fn validate(&self) -> Result<()> {
        if self.capacity > self.max_capacity {
            return Err(MemoryError::illegal_argument(format!(
                "capacity: {} (expected: not greater than maxCapacity({}))",
                self.capacity, self.max_capacity
            )));
        }
        if self.reader_index > self.writer_index || self.writer_index > self.capacity {
            return Err(MemoryError::out_of_range(format!(
                "readerIndex: {}, writerIndex: {} (expected: 0 <= readerIndex <= writerIndex <= capacity({}))",
                self.reader_index, self.writer_index, self.capacity
            )));
        }
        Ok(())
    }

    pub(crate) fn parts(&self, config: &MemoryConfig) -> BufferParts {
        BufferParts {
            capacity: self.capacity,
            max_capacity: self.max_capacity,
            reader_index: self.reader_index,
            writer_index: self.writer_index,
            bounds: Bounds::select(self.checking, config),
            config: *config,
        }
    }
}

/// 缓冲分配器。
///
/// # 契约说明（What）
/// - 所有便捷方法最终都委托给 [`MemoryAllocator::allocate_with`]；
/// - 非法请求在分配任何内存之前被拒绝；
/// - 实现必须可跨线程共享。
pub trait MemoryAllocator: Send + Sync {
    /// 按完整请求分配。
    fn allocate_with(&self, request: Allocation) -> Result<Buffer>;

    /// 本分配器产出缓冲所使用的配置。
    fn config(&self) -> MemoryConfig;

    /// 停止服务并归还缓存的内存；默认无事可做。
    fn close(&self) {}

    /// `capacity == max_capacity`，开启边界检查。
    fn allocate(&self, capacity: u32) -> Result<Buffer> {
        self.allocate_with(Allocation::new(capacity))
    }

    fn allocate_checked(&self, capacity: u32, checking: bool) -> Result<Buffer> {
        self.allocate_with(Allocation::new(capacity).with_checking(checking))
    }

    fn allocate_bounded(&self, capacity: u32, max_capacity: u32) -> Result<Buffer> {
        self.allocate_with(Allocation::new(capacity).with_max_capacity(max_capacity))
    }

    fn allocate_bounded_checked(&self, capacity: u32, max_capacity: u32, checking: bool) -> Result<Buffer> {
        self.allocate_with(
            Allocation::new(capacity)
                .with_max_capacity(max_capacity)
                .with_checking(checking),
        )
    }

    /// 分配并预置游标，例如把外部已填充的区域包装成可读缓冲。
    fn allocate_indexed(
        &self,
        capacity: u32,
        max_capacity: u32,
        reader_index: u32,
        writer_index: u32,
        checking: bool,
    ) -> Result<Buffer> {
        self.allocate_with(
            Allocation::new(capacity)
                .with_max_capacity(max_capacity)
                .with_indices(reader_index, writer_index)
                .with_checking(checking),
        )
    }
}

/// 每次分配都新建区域的分配器。
#[derive(Clone, Copy, Debug)]
pub struct DefaultAllocator {
    config: MemoryConfig,
    backend: Backend,
}

impl Default for DefaultAllocator {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl DefaultAllocator {
    /// 按配置选定后端。
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            backend: Backend::select(&config),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }
}

impl MemoryAllocator for DefaultAllocator {
    fn allocate_with(&self, request: Allocation) -> Result<Buffer> {
        request.validate()?;
        let arena = Arena::allocate(self.backend, request.capacity() as usize)?;
        Ok(Buffer::from_arena(
            Arc::new(arena),
            0,
            request.parts(&self.config),
            Role::Owner,
        ))
    }

    fn config(&self) -> MemoryConfig {
        self.config
    }
}

/// 进程内默认分配器，使用 [`MemoryConfig::default`]。
pub fn default_allocator() -> &'static DefaultAllocator {
    static DEFAULT: OnceLock<DefaultAllocator> = OnceLock::new();
    DEFAULT.get_or_init(DefaultAllocator::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    #[test]
    fn requests_are_validated_before_allocation() {
        let allocator = DefaultAllocator::default();
        let err = allocator.allocate_bounded(16, 8).expect_err("容量超过上限");
        assert_eq!(err.code(), codes::ILLEGAL_ARGUMENT);
        let err = allocator
            .allocate_indexed(8, 8, 4, 2, true)
            .expect_err("读游标超过写游标");
        assert_eq!(err.code(), codes::OUT_OF_RANGE);
    }

    #[test]
    fn global_bounds_flag_overrides_unchecked_requests() {
        let lenient = DefaultAllocator::new(MemoryConfig::new());
        let strict = DefaultAllocator::new(MemoryConfig::new().with_check_bounds(true));
        let unchecked = lenient.allocate_checked(8, false).expect("分配");
        let forced = strict.allocate_checked(8, false).expect("分配");
        assert_eq!(unchecked.bounds(), Bounds::Unchecked);
        assert_eq!(forced.bounds(), Bounds::Checked);
    }

    #[test]
    fn indexed_allocation_presets_cursors() {
        let buffer = DefaultAllocator::default()
            .allocate_indexed(8, 32, 2, 6, true)
            .expect("分配");
        assert_eq!(
            (buffer.reader_index(), buffer.writer_index(), buffer.capacity(), buffer.max_capacity()),
            (2, 6, 8, 32)
        );
        assert_eq!(buffer.readable_bytes(), 4);
    }

    #[test]
    fn forced_managed_backend_has_no_address() {
        let allocator = DefaultAllocator::new(MemoryConfig::new().with_force_managed(true));
        let buffer = allocator.allocate(4).expect("分配");
        assert_eq!(buffer.backend(), Backend::Managed);
        assert!(buffer.memory_address().is_none());
    }
}
