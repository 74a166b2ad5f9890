use std::{
    fmt,
    slice,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use spin::RwLock;

use crate::{
    accessor::{ByteOrder, MemoryAccessor, UnalignedAccessor, Word},
    error::{MemoryError, Result},
    region::{Backend, Backing, ManagedRegion, NativeRegion},
};

/// `Arena` 是一次底层分配的共享记录。
///
/// # 角色定位（Why）
/// - 切片与副本需要与父缓冲共享同一块内存，但各自维护游标；把内存放进引用计数的
///   记录里，就不再需要“由最外层切片负责释放祖先地址”这种隐式约定；
/// - 物理内存在最后一个 `Arc<Arena>` 销毁时释放，恰好一次。
///
/// # 结构设计（How）
/// - `backing`：读写锁保护的存储。读取持有读锁，写入、搬运与调整大小持有写锁，
///   因此副本在其它线程扩容时，不会读到已被 `realloc` 归还的地址；
/// - 锁只在单次方法调用内持有，不向外泄露对存储的引用；
/// - `freed`：逻辑释放标记。显式 `release` 会置位，开启可访问性检查的缓冲据此快速失败；
///   标记置位后内存依旧存活，未检查的访问读到的是陈旧但有效的字节。
///
/// # 契约说明（What）
/// - 所有偏移量都是相对区域起点的物理偏移，越过物理长度一律返回
///   [`MemoryError::OutOfRange`]；物理长度在持锁后读取，与随后的访问保持一致；
/// - 跨线程共享同一块内存是内存安全的，但多个写者之间的内容交错由调用方自行协调。
pub(crate) struct Arena {
    backing: RwLock<Backing>,
    freed: AtomicBool,
}

#[inline]
fn check_physical(physical: usize, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= physical => Ok(()),
        _ => Err(MemoryError::out_of_range(format!(
            "offset: {offset}, length: {len} (expected: range(0, {physical}))"
        ))),
    }
}

/// 把 `src` 写入 `backing` 的 `offset` 处，调用方已持有写锁并完成物理校验。
fn copy_in(backing: &mut Backing, offset: usize, src: &[u8]) {
    match backing {
        // SAFETY: 物理区间已校验；`src` 不与区域重叠（同一区域内的搬运走 `copy_memory`）。
        Backing::Native { region, .. } => unsafe {
            UnalignedAccessor::copy_from_slice(src, region.as_ptr().add(offset))
        },
        Backing::Managed(region) => {
            region.bytes_mut()[offset..offset + src.len()].copy_from_slice(src)
        }
    }
}

impl Arena {
    pub(crate) fn new(backing: Backing) -> Self {
        Self {
            backing: RwLock::new(backing),
            freed: AtomicBool::new(false),
        }
    }

    pub(crate) fn allocate(backend: Backend, len: usize) -> Result<Self> {
        Ok(Self::new(backend.allocate(len)?))
    }

    /// 进程内共享的零长度区域，用于在 `Drop` 中把真实区域移交出去后占位。
    pub(crate) fn placeholder() -> Arc<Arena> {
        static EMPTY: OnceLock<Arc<Arena>> = OnceLock::new();
        Arc::clone(EMPTY.get_or_init(|| Arc::new(Arena::new(Backing::Managed(ManagedRegion::default())))))
    }

    pub(crate) fn len(&self) -> usize {
        self.backing.read().len()
    }

    pub(crate) fn backend(&self) -> Backend {
        self.backing.read().kind()
    }

    /// 原生后端的基地址，托管后端返回 `None`。扩容可能移动区域，地址只用于诊断。
    pub(crate) fn address(&self) -> Option<usize> {
        match &*self.backing.read() {
            Backing::Native { region, .. } => Some(region.as_ptr() as usize),
            Backing::Managed(_) => None,
        }
    }

    pub(crate) fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }

    /// 标记为已释放；返回本次调用是否完成了状态跃迁。
    pub(crate) fn mark_freed(&self) -> bool {
        !self.freed.swap(true, Ordering::AcqRel)
    }

    /// 仅在物理长度不足时扩展存储。
    pub(crate) fn reserve(&self, len: usize) -> Result<()> {
        let mut backing = self.backing.write();
        if len > backing.len() {
            backing.resize(len)?;
        }
        Ok(())
    }

    /// 精确调整物理长度，只应在独占持有时调用。
    pub(crate) fn resize(&self, len: usize) -> Result<()> {
        self.backing.write().resize(len)
    }

    pub(crate) fn get<W: Word>(&self, offset: usize, order: ByteOrder) -> Result<W> {
        let backing = self.backing.read();
        check_physical(backing.len(), offset, W::WIDTH)?;
        Ok(match &*backing {
            // SAFETY: 物理区间已校验，读锁期间区域不会被移动或释放。
            Backing::Native { region, accessor } => unsafe {
                accessor.get::<W>(region.as_ptr().add(offset), order)
            },
            Backing::Managed(region) => order.decode(&region.bytes()[offset..offset + W::WIDTH]),
        })
    }

    pub(crate) fn set<W: Word>(&self, offset: usize, value: W, order: ByteOrder) -> Result<()> {
        let mut backing = self.backing.write();
        check_physical(backing.len(), offset, W::WIDTH)?;
        match &mut *backing {
            // SAFETY: 物理区间已校验，写锁保证独占。
            Backing::Native { region, accessor } => unsafe {
                accessor.set::<W>(region.as_ptr().add(offset), value, order)
            },
            Backing::Managed(region) => {
                order.encode(value, &mut region.bytes_mut()[offset..offset + W::WIDTH])
            }
        }
        Ok(())
    }

    pub(crate) fn read_into(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let backing = self.backing.read();
        check_physical(backing.len(), offset, dst.len())?;
        match &*backing {
            // SAFETY: 物理区间已校验；`dst` 为调用方独占的外部切片。
            Backing::Native { region, .. } => unsafe {
                UnalignedAccessor::copy_to_slice(region.as_ptr().add(offset), dst)
            },
            Backing::Managed(region) => {
                dst.copy_from_slice(&region.bytes()[offset..offset + dst.len()])
            }
        }
        Ok(())
    }

    pub(crate) fn write_from(&self, offset: usize, src: &[u8]) -> Result<()> {
        let mut backing = self.backing.write();
        check_physical(backing.len(), offset, src.len())?;
        copy_in(&mut backing, offset, src);
        Ok(())
    }

    /// 在两个区域之间搬运字节，允许是同一个区域（例如原缓冲与其副本）。
    pub(crate) fn transfer(
        src: &Arena,
        src_offset: usize,
        dst: &Arena,
        dst_offset: usize,
        len: usize,
    ) -> Result<()> {
        if std::ptr::eq(src, dst) {
            let mut backing = src.backing.write();
            check_physical(backing.len(), src_offset, len)?;
            check_physical(backing.len(), dst_offset, len)?;
            if len == 0 {
                return Ok(());
            }
            match &mut *backing {
                // SAFETY: 两个区间均已校验；`copy_memory` 容忍重叠。
                Backing::Native { region, .. } => unsafe {
                    let base = region.as_ptr();
                    UnalignedAccessor::copy_memory(base.add(src_offset), base.add(dst_offset), len)
                },
                Backing::Managed(region) => region
                    .bytes_mut()
                    .copy_within(src_offset..src_offset + len, dst_offset),
            }
            return Ok(());
        }
        // 两把锁按地址顺序获取，反向的并发搬运不会互相等待。
        let (source, mut target) = if (src as *const Arena) < (dst as *const Arena) {
            let source = src.backing.read();
            (source, dst.backing.write())
        } else {
            let target = dst.backing.write();
            (src.backing.read(), target)
        };
        check_physical(source.len(), src_offset, len)?;
        check_physical(target.len(), dst_offset, len)?;
        let bytes: &[u8] = match &*source {
            // SAFETY: 物理区间已校验；读锁期间源区域不会变化，不同 `Arena` 的存储互不重叠。
            Backing::Native { region, .. } => unsafe {
                slice::from_raw_parts(region.as_ptr().add(src_offset), len)
            },
            Backing::Managed(region) => &region.bytes()[src_offset..src_offset + len],
        };
        copy_in(&mut target, dst_offset, bytes);
        Ok(())
    }

    /// 复制出 `[offset, offset + len)` 作为新区域的初始内容。
    pub(crate) fn clone_range(&self, offset: usize, len: usize, capacity: usize) -> Result<Arena> {
        let backing = match self.backend() {
            Backend::Native(accessor) => Backing::Native {
                region: NativeRegion::allocate(capacity.max(len))?,
                accessor,
            },
            Backend::Managed => Backing::Managed(ManagedRegion::allocate(capacity.max(len))),
        };
        let arena = Arena::new(backing);
        Arena::transfer(self, offset, &arena, 0, len)?;
        Ok(arena)
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("backend", &self.backend())
            .field("len", &self.len())
            .field("freed", &self.is_freed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::AccessorKind;

    fn arenas() -> [Arena; 2] {
        [
            Arena::allocate(Backend::Native(AccessorKind::detect()), 16).expect("原生分配"),
            Arena::allocate(Backend::Managed, 16).expect("托管分配"),
        ]
    }

    #[test]
    fn typed_access_is_backend_independent() {
        for arena in arenas() {
            arena.set::<u32>(3, 0xDEAD_BEEF, ByteOrder::BigEndian).expect("写入");
            assert_eq!(arena.get::<u8>(3, ByteOrder::BigEndian).expect("读取"), 0xDE);
            assert_eq!(
                arena.get::<u32>(3, ByteOrder::LittleEndian).expect("读取"),
                0xEFBE_ADDE
            );
        }
    }

    #[test]
    fn physical_guard_rejects_overflowing_offsets() {
        for arena in arenas() {
            assert!(arena.get::<u64>(9, ByteOrder::BigEndian).is_err());
            assert!(arena.get::<u8>(usize::MAX, ByteOrder::BigEndian).is_err());
            assert!(arena.write_from(15, &[1, 2]).is_err());
        }
    }

    #[test]
    fn transfer_within_the_same_arena_handles_overlap() {
        for arena in arenas() {
            arena.write_from(0, &[1, 2, 3, 4, 5]).expect("写入");
            Arena::transfer(&arena, 0, &arena, 2, 5).expect("区域内搬运");
            let mut out = [0u8; 7];
            arena.read_into(0, &mut out).expect("读取");
            assert_eq!(out, [1, 2, 1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn opposite_transfers_on_two_threads_complete() {
        let [left, right] = arenas();
        left.write_from(0, &[1; 16]).expect("写入");
        right.write_from(0, &[2; 16]).expect("写入");
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..10_000 {
                    Arena::transfer(&left, 0, &right, 8, 8).expect("左到右");
                }
            });
            scope.spawn(|| {
                for _ in 0..10_000 {
                    Arena::transfer(&right, 0, &left, 8, 8).expect("右到左");
                }
            });
        });
        assert_eq!(left.get::<u8>(0, ByteOrder::BigEndian).expect("读取"), 1);
        assert_eq!(right.get::<u8>(0, ByteOrder::BigEndian).expect("读取"), 2);
    }

    #[test]
    fn reads_on_another_thread_survive_reallocation() {
        let arena = Arena::allocate(Backend::Native(AccessorKind::detect()), 64).expect("分配");
        arena.write_from(0, &[9; 64]).expect("写入");
        let done = AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    assert_eq!(arena.get::<u8>(0, ByteOrder::BigEndian).expect("读取"), 9);
                }
            });
            for step in 1..=256usize {
                arena.reserve(64 + step * 4096).expect("扩容");
            }
            done.store(true, Ordering::Release);
        });
        assert_eq!(arena.len(), 64 + 256 * 4096);
    }

    #[test]
    fn freed_flag_transitions_once() {
        let [arena, _] = arenas();
        assert!(arena.mark_freed());
        assert!(!arena.mark_freed());
        assert!(arena.is_freed());
    }
}
