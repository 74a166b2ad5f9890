use std::ptr;

use super::{MemoryAccessor, Word};

/// 直接以非对齐整字读写的访问器，仅在 x86 家族上被选中。
#[derive(Clone, Copy, Debug, Default)]
pub struct UnalignedAccessor;

impl MemoryAccessor for UnalignedAccessor {
    #[inline]
    unsafe fn load<W: Word>(addr: *const u8) -> W {
        // SAFETY: 区间有效性由调用方保证；`read_unaligned` 不要求对齐。
        unsafe { ptr::read_unaligned(addr.cast::<W>()) }
    }

    #[inline]
    unsafe fn store<W: Word>(addr: *mut u8, value: W) {
        // SAFETY: 同上。
        unsafe { ptr::write_unaligned(addr.cast::<W>(), value) }
    }
}
