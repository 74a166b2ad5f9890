//! 游标式字节缓冲。
//!
//! # 模块定位（Why）
//! - 读写游标模型、类型化读写、扩容策略只实现一次，由检查/不检查两种访问策略、
//!   原生/托管两种后端、池化/非池化两种生命周期共享；
//! - 区间 `[0, capacity)` 被两个游标划分为三段：`[0, reader_index)` 已丢弃，
//!   `[reader_index, writer_index)` 可读，`[writer_index, capacity)` 可写。
//!
//! # 结构安排（How）
//! - `mod.rs`：状态、游标操作与诊断输出；
//! - `typed`：定宽整数、浮点与布尔值的 get/set/read/write；
//! - `bulk`：与字节切片或其它缓冲之间的批量搬运；
//! - `growth`：扩容策略与显式容量调整；
//! - `ownership`：拷贝、切片、副本与释放。
//!
//! # 并发说明（What）
//! - 游标属于单个句柄，`Buffer` 实现 `Send` 以便在线程间移交（例如在工作线程分配、
//!   在 I/O 线程释放），但不实现 `Sync`；
//! - 共享同一块内存的切片或副本可以分处不同线程：每次访问在底层存储的读写锁内完成，
//!   一方扩容时另一方不会读到已归还的地址。

mod bulk;
mod growth;
mod ownership;
mod typed;

use std::{cell::Cell, fmt, marker::PhantomData, sync::Arc};

pub use growth::calculate_new_capacity;

use crate::{
    arena::Arena,
    config::MemoryConfig,
    error::{MemoryError, Result},
    pool::BufferRecycler,
    region::Backend,
};

/// 索引访问的检查策略，在构造时确定。
///
/// - `Checked`：每次按索引访问前校验 `index + length <= capacity`，并在开启
///   可访问性检查时拒绝访问已释放的内存；
/// - `Unchecked`：信任调用方已经完成校验，只保留物理分配边界这一条底线。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Bounds {
    Checked,
    Unchecked,
}

impl Bounds {
    /// 合并调用方请求与全局配置：`check_bounds` 打开时一律检查。
    pub fn select(checking: bool, config: &MemoryConfig) -> Self {
        if checking || config.check_bounds() {
            Bounds::Checked
        } else {
            Bounds::Unchecked
        }
    }
}

/// 句柄对底层内存承担的释放责任。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Role {
    /// 分配或拷贝得到的句柄，`release` 会标记内存已释放。
    Owner,
    /// 非池化缓冲的切片，`release` 同样释放祖先内存。
    Slice,
    /// 副本或池化缓冲的派生视图，`release` 只放弃自身句柄。
    View,
}

/// 构造缓冲所需的逻辑状态。
#[derive(Clone, Copy, Debug)]
pub(crate) struct BufferParts {
    pub(crate) capacity: u32,
    pub(crate) max_capacity: u32,
    pub(crate) reader_index: u32,
    pub(crate) writer_index: u32,
    pub(crate) bounds: Bounds,
    pub(crate) config: MemoryConfig,
}

/// `Buffer` 是一段连续内存上的读写游标视图。
///
/// # 契约说明（What）
/// - 不变量：`0 <= reader_index <= writer_index <= capacity <= max_capacity`；
/// - 按索引的 `get_*`/`set_*` 不移动游标；`read_*` 从 `reader_index` 消费，`write_*` 追加到
///   `writer_index`，写入空间不足时按 [`calculate_new_capacity`] 扩容；
/// - 多字节类型默认使用大端（网络序），`_le` 后缀为显式小端。
///
/// # 生命周期
/// - 非池化缓冲在最后一个共享该内存的句柄销毁时释放物理内存；
/// - 池化缓冲在 [`Buffer::release`] 或 `Drop` 时回到所属池，见 [`crate::PooledAllocator`]。
pub struct Buffer {
    arena: Arc<Arena>,
    offset: usize,
    capacity: u32,
    max_capacity: u32,
    reader_index: u32,
    writer_index: u32,
    marked_reader_index: u32,
    marked_writer_index: u32,
    bounds: Bounds,
    config: MemoryConfig,
    role: Role,
    pooled: bool,
    recycler: Option<Arc<dyn BufferRecycler>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl Buffer {
    pub(crate) fn from_arena(arena: Arc<Arena>, offset: usize, parts: BufferParts, role: Role) -> Self {
        debug_assert!(parts.reader_index <= parts.writer_index);
        debug_assert!(parts.writer_index <= parts.capacity);
        debug_assert!(parts.capacity <= parts.max_capacity);
        Self {
            arena,
            offset,
            capacity: parts.capacity,
            max_capacity: parts.max_capacity,
            reader_index: parts.reader_index,
            writer_index: parts.writer_index,
            marked_reader_index: 0,
            marked_writer_index: 0,
            bounds: parts.bounds,
            config: parts.config,
            role,
            pooled: false,
            recycler: None,
            _not_sync: PhantomData,
        }
    }

    /// 将缓冲绑定到池，成为池化所有者。
    pub(crate) fn with_recycler(mut self, recycler: Arc<dyn BufferRecycler>) -> Self {
        self.pooled = true;
        self.recycler = Some(recycler);
        self
    }

    pub(crate) fn parts(&self) -> BufferParts {
        BufferParts {
            capacity: self.capacity,
            max_capacity: self.max_capacity,
            reader_index: self.reader_index,
            writer_index: self.writer_index,
            bounds: self.bounds,
            config: self.config,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn max_capacity(&self) -> u32 {
        self.max_capacity
    }

    pub fn reader_index(&self) -> u32 {
        self.reader_index
    }

    pub fn writer_index(&self) -> u32 {
        self.writer_index
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn backend(&self) -> Backend {
        self.arena.backend()
    }

    /// 是否由池化分配器管理（包括其派生视图）。
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// 底层内存是否已被标记释放。
    pub fn is_freed(&self) -> bool {
        self.arena.is_freed()
    }

    /// 原生后端下当前视图起点的地址；托管后端返回 `None`。
    pub fn memory_address(&self) -> Option<usize> {
        self.arena.address().map(|base| base + self.offset)
    }

    /// 设置读游标，要求 `reader_index <= writer_index`。
    pub fn set_reader_index(&mut self, reader_index: u32) -> Result<()> {
        if reader_index > self.writer_index {
            return Err(MemoryError::out_of_range(format!(
                "readerIndex: {reader_index} (expected: 0 <= readerIndex <= writerIndex({}))",
                self.writer_index
            )));
        }
        self.reader_index = reader_index;
        Ok(())
    }

    /// 设置写游标，要求 `reader_index <= writer_index <= capacity`。
    pub fn set_writer_index(&mut self, writer_index: u32) -> Result<()> {
        if writer_index < self.reader_index || writer_index > self.capacity {
            return Err(MemoryError::out_of_range(format!(
                "writerIndex: {writer_index} (expected: readerIndex({}) <= writerIndex <= capacity({}))",
                self.reader_index, self.capacity
            )));
        }
        self.writer_index = writer_index;
        Ok(())
    }

    /// 同时设置两个游标；校验失败时两者都保持原值。
    pub fn set_index(&mut self, reader_index: u32, writer_index: u32) -> Result<()> {
        if reader_index > writer_index || writer_index > self.capacity {
            return Err(MemoryError::out_of_range(format!(
                "readerIndex: {reader_index}, writerIndex: {writer_index} \
                 (expected: 0 <= readerIndex <= writerIndex <= capacity({}))",
                self.capacity
            )));
        }
        self.reader_index = reader_index;
        self.writer_index = writer_index;
        Ok(())
    }

    pub fn readable_bytes(&self) -> u32 {
        self.writer_index - self.reader_index
    }

    pub fn writable_bytes(&self) -> u32 {
        self.capacity - self.writer_index
    }

    pub fn max_writable_bytes(&self) -> u32 {
        self.max_capacity - self.writer_index
    }

    pub fn is_readable(&self) -> bool {
        self.writer_index > self.reader_index
    }

    /// 至少还有 `len` 字节可读。
    pub fn has_readable(&self, len: u32) -> bool {
        self.readable_bytes() >= len
    }

    pub fn is_writable(&self) -> bool {
        self.capacity > self.writer_index
    }

    /// 不扩容时至少还有 `len` 字节可写。
    pub fn has_writable(&self, len: u32) -> bool {
        self.writable_bytes() >= len
    }

    /// 两个游标归零，内容保持不变。
    pub fn clear(&mut self) {
        self.reader_index = 0;
        self.writer_index = 0;
    }

    pub fn mark_reader_index(&mut self) {
        self.marked_reader_index = self.reader_index;
    }

    /// 恢复到最近一次标记；若期间写游标回退到标记之前则失败。
    pub fn reset_reader_index(&mut self) -> Result<()> {
        self.set_reader_index(self.marked_reader_index)
    }

    pub fn mark_writer_index(&mut self) {
        self.marked_writer_index = self.writer_index;
    }

    pub fn reset_writer_index(&mut self) -> Result<()> {
        self.set_writer_index(self.marked_writer_index)
    }

    #[inline]
    fn offset_of(&self, index: u32) -> usize {
        self.offset + index as usize
    }

    /// 检查模式下拒绝访问已释放的内存。
    fn ensure_accessible(&self) -> Result<()> {
        if self.bounds == Bounds::Checked && self.config.check_accessible() && self.arena.is_freed() {
            return Err(MemoryError::use_after_free(match self.memory_address() {
                Some(address) => format!("{address:#x} is already freed"),
                None => "managed memory is already freed".to_owned(),
            }));
        }
        Ok(())
    }

    /// 按索引访问前的检查，不检查模式下直接放行。
    #[inline]
    fn guard(&self, index: u32, len: usize) -> Result<()> {
        if self.bounds == Bounds::Unchecked {
            return Ok(());
        }
        self.ensure_accessible()?;
        if u64::from(index) + len as u64 > u64::from(self.capacity) {
            return Err(MemoryError::out_of_range(format!(
                "index: {index}, length: {len} (expected: range(0, {}))",
                self.capacity
            )));
        }
        Ok(())
    }

    /// 游标读取前确认至少有 `len` 字节可读。
    #[inline]
    fn check_readable(&self, len: usize) -> Result<()> {
        if len as u64 > u64::from(self.readable_bytes()) {
            return Err(MemoryError::out_of_range(format!(
                "readerIndex({}) + length({len}) exceeds writerIndex({}): {self}",
                self.reader_index, self.writer_index
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend = match self.backend() {
            Backend::Native(_) => "native",
            Backend::Managed => "managed",
        };
        write!(f, "Buffer({backend}")?;
        if let Some(address) = self.memory_address() {
            write!(f, ", address: {address:#x}")?;
        }
        write!(
            f,
            ", bounds: {:?}, ridx: {}, widx: {}, cap: {}/{}, pooled: {}, freed: {})",
            self.bounds,
            self.reader_index,
            self.writer_index,
            self.capacity,
            self.max_capacity,
            self.pooled,
            self.is_freed()
        )
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("arena", &self.arena)
            .field("offset", &self.offset)
            .field("capacity", &self.capacity)
            .field("max_capacity", &self.max_capacity)
            .field("reader_index", &self.reader_index)
            .field("writer_index", &self.writer_index)
            .field("bounds", &self.bounds)
            .field("role", &self.role)
            .field("pooled", &self.pooled)
            .finish()
    }
}
