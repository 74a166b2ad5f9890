//! `spark-memory` 提供面向手动内存管理的游标式字节缓冲与池化分配器。
//!
//! # 模块定位（Why）
//! - 协议编解码需要在一段连续内存上按网络序读写定宽整数、批量搬运字节，并在零拷贝前提下
//!   派生切片与副本；
//! - 高频、等尺寸的短生命周期缓冲需要复用而不是反复向系统申请。
//!
//! # 设计概要（How）
//! - `accessor`：原生地址上的定宽读写原语，平台差异只在这里出现一次；
//! - `region` / `arena`：原生区域与托管数组两种存储，以及它们在缓冲之间共享的引用计数记录；
//! - `buffer`：[`Buffer`] 的游标模型、类型化读写、扩容与派生视图；
//! - `allocator` / `pool`：[`DefaultAllocator`] 与按 `max_capacity` 分键复用的 [`PooledAllocator`]；
//! - `wrap`：把地址、字节数组、十六进制文本包装成缓冲。
//!
//! # 使用示例
//! ```
//! use spark_memory::{DefaultAllocator, MemoryAllocator, MemoryConfig};
//!
//! let allocator = DefaultAllocator::new(MemoryConfig::new());
//! let mut buffer = allocator.allocate_bounded(8, 64)?;
//! buffer.write_u32(0xCAFE_BABE)?;
//! buffer.write_u16_le(7)?;
//! assert_eq!(buffer.read_u32()?, 0xCAFE_BABE);
//! assert_eq!(buffer.read_u16_le()?, 7);
//! buffer.release();
//! # Ok::<(), spark_memory::MemoryError>(())
//! ```
//!
//! # 并发约定（What）
//! - [`Buffer`] 可以在线程间移交；切片与副本可以交给其它线程，底层存储由读写锁保护，
//!   跨线程的扩容与读写都是内存安全的，但多个写者之间的内容顺序需要调用方协调；
//! - 分配器与池注册表可在任意线程共享。

pub mod accessor;
mod allocator;
mod arena;
mod buffer;
pub mod config;
pub mod error;
pub mod pool;
mod region;
pub mod wrap;

pub use allocator::{Allocation, DefaultAllocator, MemoryAllocator, PooledAllocator, default_allocator};
pub use buffer::{Bounds, Buffer, calculate_new_capacity};
pub use config::{MemoryConfig, PoolConfig};
pub use error::{MemoryError, Result};
pub use pool::{PoolRegistry, PoolStats};
pub use region::Backend;
pub use wrap::{wrap_address, wrap_buf, wrap_hex, wrap_hex_in, wrap_slice, wrap_slice_in, wrap_vec};
