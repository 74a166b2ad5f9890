//! 把已有数据包装成缓冲。
//!
//! 包装得到的缓冲 `capacity == max_capacity == 数据长度`，读游标为 0、写游标为数据长度，
//! 即整段内容立即可读。
//!
//! | 入口 | 内存来源 | 是否拷贝 |
//! | --- | --- | --- |
//! | [`wrap_address`] | 调用方持有的原生地址 | 否，且永不释放该地址 |
//! | [`wrap_vec`] | 调用方移交的 `Vec<u8>` | 否，托管后端 |
//! | [`wrap_slice`] / [`wrap_slice_in`] | 字节切片 | 是 |
//! | [`wrap_hex`] / [`wrap_hex_in`] | 十六进制文本 | 解码后拷贝 |
//! | [`wrap_buf`] | 任意 [`bytes::Buf`] | 是 |

use std::{ptr::NonNull, sync::Arc};

use bytes::Buf;

use crate::{
    accessor::RawCapability,
    allocator::{Allocation, MemoryAllocator, default_allocator},
    arena::Arena,
    buffer::{Bounds, Buffer, BufferParts, Role},
    config::MemoryConfig,
    error::{MemoryError, Result},
    region::{Backing, ManagedRegion, NativeRegion},
};

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        MemoryError::illegal_argument(format!("size: {len} (expected: <= {})", u32::MAX))
    })
}

fn readable_parts(len: u32, checking: bool, config: MemoryConfig) -> BufferParts {
    BufferParts {
        capacity: len,
        max_capacity: len,
        reader_index: 0,
        writer_index: len,
        bounds: Bounds::select(checking, &config),
        config,
    }
}

/// 包装一块外部原生内存，不拷贝也不接管释放。
///
/// 原生访问不可用（平台不支持或配置了 `force_managed`）时返回
/// [`MemoryError::UnsupportedBackend`]；`size == 0` 返回 [`MemoryError::IllegalArgument`]。
///
/// 包装得到的缓冲无法扩容：任何需要扩大物理区域的写入都会失败。
///
/// # Safety
/// `[ptr, ptr + size)` 必须在返回的缓冲及其全部切片、副本存活期间保持可读写，
/// 可以从任意线程访问，且不被其它代码并发访问。
pub unsafe fn wrap_address(
    ptr: NonNull<u8>,
    size: u32,
    config: MemoryConfig,
    checking: bool,
) -> Result<Buffer> {
    let RawCapability::Available(accessor) = RawCapability::probe(&config) else {
        return Err(MemoryError::UnsupportedBackend {
            operation: "wrap_address",
        });
    };
    if size == 0 {
        return Err(MemoryError::illegal_argument("size: 0 (expected: > 0)"));
    }
    // SAFETY: 由调用方保证区间在缓冲存活期间有效。
    let region = unsafe { NativeRegion::external(ptr, size as usize) };
    let arena = Arena::new(Backing::Native { region, accessor });
    Ok(Buffer::from_arena(
        Arc::new(arena),
        0,
        readable_parts(size, checking, config),
        Role::Owner,
    ))
}

/// 接管 `bytes` 作为托管后端的存储，不拷贝。
pub fn wrap_vec(bytes: Vec<u8>, config: MemoryConfig, checking: bool) -> Result<Buffer> {
    let len = len_u32(bytes.len())?;
    let arena = Arena::new(Backing::Managed(ManagedRegion::from_vec(bytes)));
    Ok(Buffer::from_arena(
        Arc::new(arena),
        0,
        readable_parts(len, checking, config),
        Role::Owner,
    ))
}

/// 用默认分配器拷贝一份 `bytes`。
pub fn wrap_slice(bytes: &[u8], checking: bool) -> Result<Buffer> {
    wrap_slice_in(default_allocator(), bytes, checking)
}

/// 用指定分配器拷贝一份 `bytes`。
pub fn wrap_slice_in(allocator: &dyn MemoryAllocator, bytes: &[u8], checking: bool) -> Result<Buffer> {
    let len = len_u32(bytes.len())?;
    let mut buffer = allocator.allocate_with(Allocation::new(len).with_checking(checking))?;
    buffer.write_bytes(bytes)?;
    Ok(buffer)
}

/// 解码十六进制文本并用默认分配器包装。
///
/// 忽略 ASCII 空白，大小写不敏感；奇数位数或非十六进制字符返回 [`MemoryError::IllegalArgument`]。
pub fn wrap_hex(hex: &str, checking: bool) -> Result<Buffer> {
    wrap_hex_in(default_allocator(), hex, checking)
}

/// 解码十六进制文本并用指定分配器包装。
pub fn wrap_hex_in(allocator: &dyn MemoryAllocator, hex: &str, checking: bool) -> Result<Buffer> {
    let digits: String = hex.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = hex::decode(&digits)
        .map_err(|err| MemoryError::illegal_argument(format!("hex: {err}")))?;
    wrap_slice_in(allocator, &bytes, checking)
}

/// 拷贝 `buf` 中剩余的全部字节，并消费 `buf`。
pub fn wrap_buf<B: Buf>(mut buf: B, checking: bool) -> Result<Buffer> {
    let len = len_u32(buf.remaining())?;
    let mut buffer = default_allocator().allocate_with(Allocation::new(len).with_checking(checking))?;
    while buf.has_remaining() {
        let chunk = buf.chunk();
        let consumed = chunk.len();
        buffer.write_bytes(chunk)?;
        buf.advance(consumed);
    }
    Ok(buffer)
}
