use std::{mem::MaybeUninit, ptr};

use super::{MemoryAccessor, Word};

/// 对齐敏感平台上的访问器。
///
/// 地址按 `W::WIDTH` 对齐时走整字读写，否则逐字节拷贝到栈上的临时值，
/// 保证在禁止非对齐访问的架构上同样正确。
#[derive(Clone, Copy, Debug, Default)]
pub struct AlignedAccessor;

impl AlignedAccessor {
    #[inline]
    fn is_aligned<W: Word>(addr: *const u8) -> bool {
        (addr as usize) % W::WIDTH == 0
    }
}

impl MemoryAccessor for AlignedAccessor {
    #[inline]
    unsafe fn load<W: Word>(addr: *const u8) -> W {
        if Self::is_aligned::<W>(addr) {
            // SAFETY: 地址已对齐，区间有效性由调用方保证。
            return unsafe { ptr::read(addr.cast::<W>()) };
        }
        let mut value = MaybeUninit::<W>::uninit();
        // SAFETY: 目标是栈上未初始化的 `W`，写满 `W::WIDTH` 字节后即完成初始化；
        // 整数类型的任意位模式都是合法值。
        unsafe {
            ptr::copy_nonoverlapping(addr, value.as_mut_ptr().cast::<u8>(), W::WIDTH);
            value.assume_init()
        }
    }

    #[inline]
    unsafe fn store<W: Word>(addr: *mut u8, value: W) {
        if Self::is_aligned::<W>(addr) {
            // SAFETY: 地址已对齐，区间有效性由调用方保证。
            unsafe { ptr::write(addr.cast::<W>(), value) };
            return;
        }
        // SAFETY: 源为栈上的 `value`，与目标区间不可能重叠。
        unsafe {
            ptr::copy_nonoverlapping((&value as *const W).cast::<u8>(), addr, W::WIDTH);
        }
    }
}
