//! 缓冲的底层存储：原生地址区域或托管字节数组。
//!
//! # 模块定位（Why）
//! - 上层缓冲只关心“一段连续字节”，本模块负责决定这段字节从哪里来、何时归还；
//! - [`Backend::select`] 是唯一的选择点：原生访问可用时使用 [`NativeRegion`]，
//!   否则回退到 [`ManagedRegion`]，两者对调用方暴露相同的构造契约。
//!
//! # 契约说明（What）
//! - 新分配的区域总是零初始化，读取未写入的位置得到 0；
//! - [`NativeRegion`] 区分自有与外部两种所有权：自有区域在 `Drop` 时释放，
//!   外部区域永不释放且不可改变大小；
//! - 零长度区域不触碰分配器，使用悬垂但对齐的指针占位。

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
};

use crate::{
    accessor::{AccessorKind, RawCapability},
    config::MemoryConfig,
    error::{MemoryError, Result},
};

/// 原生区域的对齐值，覆盖 64 位整数的自然对齐。
const REGION_ALIGN: usize = 16;

/// 区域内存的归属。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Ownership {
    /// 由本 crate 分配，`Drop` 时释放。
    Owned,
    /// 由外部持有，本 crate 只读写不释放。
    External,
}

/// 基于全局分配器的原生地址区域。
///
/// `layout` 记录自有区域分配时使用的布局，`Drop` 与 `realloc` 直接复用它；
/// 外部区域与零长度区域没有布局，也就不会被释放。
#[derive(Debug)]
pub(crate) struct NativeRegion {
    ptr: NonNull<u8>,
    len: usize,
    layout: Option<Layout>,
    ownership: Ownership,
}

// SAFETY: 自有区域独占其分配，语义等同 `Box<[u8]>`；外部区域的跨线程有效性由
// `NativeRegion::external` 的调用方保证。并发读写由外层 `Arena` 的读写锁串行化。
unsafe impl Send for NativeRegion {}
// SAFETY: 同上；`&NativeRegion` 只暴露地址与长度。
unsafe impl Sync for NativeRegion {}

impl NativeRegion {
    /// 分配 `len` 字节的零初始化区域。
    pub(crate) fn allocate(len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(Self::empty());
        }
        let layout = layout_for(len)?;
        // SAFETY: `layout` 尺寸非零。
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Ok(Self {
            ptr,
            len,
            layout: Some(layout),
            ownership: Ownership::Owned,
        })
    }

    /// 包装一块外部拥有的内存。
    ///
    /// # Safety
    /// `[ptr, ptr + len)` 必须在返回值及其所有派生视图的整个生命周期内保持可读写，
    /// 可以从任意线程访问，且不被其它代码并发修改。
    pub(crate) unsafe fn external(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            layout: None,
            ownership: Ownership::External,
        }
    }

    fn empty() -> Self {
        Self {
            ptr: dangling(),
            len: 0,
            layout: None,
            ownership: Ownership::Owned,
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// 调整区域大小，扩出的部分零初始化；外部区域不允许调整。
    pub(crate) fn resize(&mut self, new_len: usize) -> Result<()> {
        if self.ownership == Ownership::External {
            return Err(MemoryError::illegal_argument(
                "cannot resize an externally owned native region",
            ));
        }
        if new_len == self.len {
            return Ok(());
        }
        let Some(old_layout) = self.layout else {
            // 零长度区域：直接分配一块新的。
            *self = Self::allocate(new_len)?;
            return Ok(());
        };
        if new_len == 0 {
            // SAFETY: `ptr` 由 `old_layout` 分配且尚未释放。
            unsafe { alloc::dealloc(self.ptr.as_ptr(), old_layout) };
            // 只改字段，不整体赋值：整体赋值会对旧值再跑一次 `Drop`。
            self.ptr = dangling();
            self.len = 0;
            self.layout = None;
            return Ok(());
        }
        let new_layout = layout_for(new_len)?;
        // SAFETY: `ptr` 由 `old_layout` 分配；`new_len` 非零且已通过布局校验。
        let raw = unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_len) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(new_layout));
        if new_len > self.len {
            // SAFETY: `[len, new_len)` 属于刚扩出的区间。
            unsafe { ptr.as_ptr().add(self.len).write_bytes(0, new_len - self.len) };
        }
        self.ptr = ptr;
        self.len = new_len;
        self.layout = Some(new_layout);
        Ok(())
    }
}

impl Drop for NativeRegion {
    fn drop(&mut self) {
        if let Some(layout) = self.layout.take() {
            // SAFETY: 只有自有且非空的区域带有布局，该布局正是分配时使用的那一个。
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

fn layout_for(len: usize) -> Result<Layout> {
    Layout::from_size_align(len, REGION_ALIGN).map_err(|_| {
        MemoryError::illegal_argument(format!("size: {len} (exceeds the platform allocation limit)"))
    })
}

fn dangling() -> NonNull<u8> {
    // 对齐到 `REGION_ALIGN` 的非空地址，从不解引用。
    NonNull::<u128>::dangling().cast()
}

/// 托管字节数组区域，原生访问不可用时的回退后端。
#[derive(Debug, Default)]
pub(crate) struct ManagedRegion {
    bytes: Vec<u8>,
}

impl ManagedRegion {
    pub(crate) fn allocate(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    pub(crate) fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub(crate) fn resize(&mut self, new_len: usize) {
        self.bytes.resize(new_len, 0);
        if new_len < self.bytes.capacity() / 2 {
            self.bytes.shrink_to_fit();
        }
    }
}

/// 缓冲后端的二选一存储。
#[derive(Debug)]
pub(crate) enum Backing {
    Native {
        region: NativeRegion,
        accessor: AccessorKind,
    },
    Managed(ManagedRegion),
}

impl Backing {
    pub(crate) fn len(&self) -> usize {
        match self {
            Backing::Native { region, .. } => region.len(),
            Backing::Managed(region) => region.len(),
        }
    }

    pub(crate) fn kind(&self) -> Backend {
        match self {
            Backing::Native { accessor, .. } => Backend::Native(*accessor),
            Backing::Managed(_) => Backend::Managed,
        }
    }

    pub(crate) fn resize(&mut self, new_len: usize) -> Result<()> {
        match self {
            Backing::Native { region, .. } => region.resize(new_len),
            Backing::Managed(region) => {
                region.resize(new_len);
                Ok(())
            }
        }
    }
}

/// 后端类型，由 [`Backend::select`] 在构造分配器时确定。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    /// 原生地址区域，附带选定的访问器。
    Native(AccessorKind),
    /// 托管字节数组。
    Managed,
}

impl Backend {
    /// 按平台能力与配置选择后端。
    pub fn select(config: &MemoryConfig) -> Self {
        match RawCapability::probe(config) {
            RawCapability::Available(accessor) => Backend::Native(accessor),
            RawCapability::Unavailable => Backend::Managed,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Backend::Native(_))
    }

    /// 以相同的契约分配 `len` 字节存储。
    pub(crate) fn allocate(self, len: usize) -> Result<Backing> {
        Ok(match self {
            Backend::Native(accessor) => Backing::Native {
                region: NativeRegion::allocate(len)?,
                accessor,
            },
            Backend::Managed => Backing::Managed(ManagedRegion::allocate(len)),
        })
    }
}
