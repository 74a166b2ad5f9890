//! 原生地址上的基础读写原语。
//!
//! # 模块定位（Why）
//! - 所有上层缓冲最终都落到“给定地址读写固定宽度整数”与“区间拷贝”两类动作，
//!   本模块把它们集中在一处，并且**不做任何边界检查**；
//! - 平台差异只在这里出现一次：x86 家族允许非对齐访问，直接整字读写；其它架构按对齐情况
//!   选择整字读写或逐字节拼装。
//!
//! # 设计概要（How）
//! - [`Word`] 抽象 8/16/32/64 位无符号整数；有符号、浮点与布尔值由缓冲层按位转换得到；
//! - [`MemoryAccessor`] 只处理“主机字节序”的位模式，[`ByteOrder`] 负责按需翻转；
//! - [`AccessorKind::detect`] 在进程内只探测一次，结果缓存于 `OnceLock`。
//!
//! # 契约说明（What）
//! - 所有 `unsafe fn` 要求调用方保证 `[addr, addr + W::WIDTH)` 落在一块存活的分配内，
//!   且没有其它引用同时持有该区间的 `&mut`。

mod aligned;
mod unaligned;

use std::{env, ptr, sync::OnceLock};

pub use aligned::AlignedAccessor;
pub use unaligned::UnalignedAccessor;

use crate::config::MemoryConfig;

mod sealed {
    pub trait Sealed {}
}

/// 固定宽度的无符号整数。
pub trait Word: Copy + Default + sealed::Sealed + 'static {
    /// 字节宽度。
    const WIDTH: usize;

    /// 翻转字节序。
    fn swap_bytes(self) -> Self;

    /// 从恰好 `WIDTH` 字节的大端切片解码。
    fn from_be_slice(bytes: &[u8]) -> Self;

    /// 从恰好 `WIDTH` 字节的小端切片解码。
    fn from_le_slice(bytes: &[u8]) -> Self;

    /// 以大端写入恰好 `WIDTH` 字节的切片。
    fn write_be(self, out: &mut [u8]);

    /// 以小端写入恰好 `WIDTH` 字节的切片。
    fn write_le(self, out: &mut [u8]);
}

macro_rules! impl_word {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Word for $ty {
                const WIDTH: usize = core::mem::size_of::<$ty>();

                #[inline]
                fn swap_bytes(self) -> Self {
                    <$ty>::swap_bytes(self)
                }

                #[inline]
                fn from_be_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; core::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_be_bytes(raw)
                }

                #[inline]
                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; core::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }

                #[inline]
                fn write_be(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_be_bytes());
                }

                #[inline]
                fn write_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_word!(u8, u16, u32, u64);

/// 多字节值在内存中的排列顺序。
///
/// 缓冲层的默认入口使用 [`ByteOrder::BigEndian`]（网络序），`_le` 后缀入口使用
/// [`ByteOrder::LittleEndian`]。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    #[inline]
    fn matches_host(self) -> bool {
        match self {
            ByteOrder::BigEndian => cfg!(target_endian = "big"),
            ByteOrder::LittleEndian => cfg!(target_endian = "little"),
        }
    }

    /// 在主机序位模式与目标序之间转换；该变换是自反的，读写共用。
    #[inline]
    pub fn convert<W: Word>(self, value: W) -> W {
        if self.matches_host() {
            value
        } else {
            value.swap_bytes()
        }
    }

    /// 从字节切片按本字节序解码。
    #[inline]
    pub fn decode<W: Word>(self, bytes: &[u8]) -> W {
        match self {
            ByteOrder::BigEndian => W::from_be_slice(bytes),
            ByteOrder::LittleEndian => W::from_le_slice(bytes),
        }
    }

    /// 按本字节序编码到字节切片。
    #[inline]
    pub fn encode<W: Word>(self, value: W, out: &mut [u8]) {
        match self {
            ByteOrder::BigEndian => value.write_be(out),
            ByteOrder::LittleEndian => value.write_le(out),
        }
    }
}

/// 原生地址读写原语。
///
/// # 契约说明（What）
/// - `load`/`store` 读写主机序位模式，不做字节序转换；
/// - 批量拷贝允许源与目标重叠（语义同 `ptr::copy`）。
pub trait MemoryAccessor {
    /// 读取 `addr` 处的一个 `W`。
    ///
    /// # Safety
    /// `[addr, addr + W::WIDTH)` 必须位于一块存活且可读的分配内。
    unsafe fn load<W: Word>(addr: *const u8) -> W;

    /// 向 `addr` 写入一个 `W`。
    ///
    /// # Safety
    /// `[addr, addr + W::WIDTH)` 必须位于一块存活且可写的分配内，且不存在其它活跃引用。
    unsafe fn store<W: Word>(addr: *mut u8, value: W);

    /// 区间到区间拷贝。
    ///
    /// # Safety
    /// 两个区间都必须位于存活分配内。
    #[inline]
    unsafe fn copy_memory(src: *const u8, dst: *mut u8, len: usize) {
        // SAFETY: 由调用方保证两个区间有效；`ptr::copy` 容忍重叠。
        unsafe { ptr::copy(src, dst, len) }
    }

    /// 区间到字节数组拷贝。
    ///
    /// # Safety
    /// `[src, src + dst.len())` 必须位于存活分配内，且不与 `dst` 重叠。
    #[inline]
    unsafe fn copy_to_slice(src: *const u8, dst: &mut [u8]) {
        // SAFETY: 由调用方保证源区间有效；`dst` 是独占借用，不可能与源重叠。
        unsafe { ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) }
    }

    /// 字节数组到区间拷贝。
    ///
    /// # Safety
    /// `[dst, dst + src.len())` 必须位于存活分配内，且不与 `src` 重叠。
    #[inline]
    unsafe fn copy_from_slice(src: &[u8], dst: *mut u8) {
        // SAFETY: 同上。
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) }
    }
}

/// 进程启动时选定的访问器实现。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessorKind {
    /// 允许非对齐整字访问的平台（x86 / x64 / amd64）。
    Unaligned,
    /// 其它平台：对齐时整字访问，否则逐字节拼装。
    Aligned,
}

static DETECTED: OnceLock<AccessorKind> = OnceLock::new();

impl AccessorKind {
    /// 按架构名选择访问器，匹配规则与大小写无关。
    pub fn for_arch(arch: &str) -> Self {
        let arch = arch.trim().to_ascii_lowercase();
        if arch.starts_with("x86") || arch.starts_with("x64") || arch.starts_with("amd64") {
            AccessorKind::Unaligned
        } else {
            AccessorKind::Aligned
        }
    }

    /// 探测当前进程的访问器；只在第一次调用时真正执行。
    pub fn detect() -> Self {
        *DETECTED.get_or_init(|| {
            let kind = Self::for_arch(env::consts::ARCH);
            tracing::debug!(
                target: "spark_memory::accessor",
                arch = env::consts::ARCH,
                accessor = ?kind,
                "selected raw memory accessor"
            );
            kind
        })
    }

    /// 按字节序读取一个 `W`。
    ///
    /// # Safety
    /// 同 [`MemoryAccessor::load`]。
    #[inline]
    pub unsafe fn get<W: Word>(self, addr: *const u8, order: ByteOrder) -> W {
        // SAFETY: 前置条件透传给调用方。
        let raw = unsafe {
            match self {
                AccessorKind::Unaligned => UnalignedAccessor::load::<W>(addr),
                AccessorKind::Aligned => AlignedAccessor::load::<W>(addr),
            }
        };
        order.convert(raw)
    }

    /// 按字节序写入一个 `W`。
    ///
    /// # Safety
    /// 同 [`MemoryAccessor::store`]。
    #[inline]
    pub unsafe fn set<W: Word>(self, addr: *mut u8, value: W, order: ByteOrder) {
        let raw = order.convert(value);
        // SAFETY: 前置条件透传给调用方。
        unsafe {
            match self {
                AccessorKind::Unaligned => UnalignedAccessor::store(addr, raw),
                AccessorKind::Aligned => AlignedAccessor::store(addr, raw),
            }
        }
    }
}

/// 原生内存访问能力的探测结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RawCapability {
    Available(AccessorKind),
    Unavailable,
}

impl RawCapability {
    /// 结合配置探测能力：`force_managed` 时视为不可用，调用方应回退到托管后端。
    pub fn probe(config: &MemoryConfig) -> Self {
        if config.force_managed() {
            RawCapability::Unavailable
        } else {
            RawCapability::Available(AccessorKind::detect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_family_selects_unaligned_accessor() {
        for arch in ["x86", "x86_64", "X64", "amd64"] {
            assert_eq!(AccessorKind::for_arch(arch), AccessorKind::Unaligned, "{arch}");
        }
        for arch in ["aarch64", "arm", "riscv64", "powerpc64", "s390x"] {
            assert_eq!(AccessorKind::for_arch(arch), AccessorKind::Aligned, "{arch}");
        }
    }

    #[test]
    fn both_accessors_agree_on_unaligned_offsets() {
        let mut storage = [0u8; 24];
        let base = storage.as_mut_ptr();
        for kind in [AccessorKind::Unaligned, AccessorKind::Aligned] {
            for offset in 0..8usize {
                // SAFETY: offset + 8 <= 24，区间位于栈数组内。
                unsafe {
                    kind.set::<u64>(base.add(offset), 0x0102_0304_0506_0708, ByteOrder::BigEndian);
                    assert_eq!(
                        kind.get::<u64>(base.add(offset), ByteOrder::BigEndian),
                        0x0102_0304_0506_0708
                    );
                    assert_eq!(
                        kind.get::<u64>(base.add(offset), ByteOrder::LittleEndian),
                        0x0807_0605_0403_0201
                    );
                }
                assert_eq!(storage[offset], 0x01);
                assert_eq!(storage[offset + 7], 0x08);
            }
        }
    }

    #[test]
    fn forced_managed_reports_unavailable() {
        let config = MemoryConfig::new().with_force_managed(true);
        assert_eq!(RawCapability::probe(&config), RawCapability::Unavailable);
        assert!(matches!(
            RawCapability::probe(&MemoryConfig::new()),
            RawCapability::Available(_)
        ));
    }
}
