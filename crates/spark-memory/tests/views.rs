//! 派生视图集成测试：副本、切片、拷贝之间的可见性与释放责任。

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use spark_memory::{Buffer, DefaultAllocator, MemoryAllocator, MemoryConfig, error::codes};

fn strict() -> DefaultAllocator {
    DefaultAllocator::new(MemoryConfig::new().with_check_accessible(true))
}

fn filled(len: u8) -> Buffer {
    let mut buffer = strict().allocate(u32::from(len)).expect("分配");
    let payload: Vec<u8> = (0..len).collect();
    buffer.write_bytes(&payload).expect("写满");
    buffer
}

/// 副本共享内容但游标独立。
#[test]
fn duplicate_shares_bytes_not_cursors() {
    let mut source = filled(8);
    let mut duplicate = source.duplicate().expect("副本");
    duplicate.read_u32().expect("读取");
    assert_eq!(source.reader_index(), 0);
    assert_eq!(duplicate.reader_index(), 4);

    source.set_u8(5, 0xFF).expect("写入");
    assert_eq!(duplicate.get_u8(5).expect("读取"), 0xFF);
    duplicate.set_u16(0, 0x0102).expect("写入");
    assert_eq!(source.read_u16().expect("读取"), 0x0102);
}

/// 拷贝与源缓冲互不影响，释放源缓冲后拷贝依然可用。
#[test]
fn copy_survives_source_release() {
    let source = filled(6);
    let mut copy = source.copy_range(2, 4).expect("拷贝");
    assert_eq!(copy.capacity(), 4);
    assert_eq!(copy.writer_index(), 4);
    source.release();
    assert!(!copy.is_freed());
    assert_eq!(copy.read_u8().expect("读取"), 2);
    copy.set_u8(0, 0).expect("写入");
}

/// 切片的切片按累计偏移定位。
#[test]
fn nested_slices_accumulate_offsets() {
    let source = filled(16);
    let outer = source.slice_range(4, 8).expect("外层切片");
    let inner = outer.slice_range(2, 4).expect("内层切片");
    assert_eq!(inner.get_u8(0).expect("读取"), 6);
    assert_eq!(inner.get_u32(0).expect("读取"), 0x0607_0809);
    assert_eq!(
        inner.get_u8(4).expect_err("越过内层容量").code(),
        codes::OUT_OF_RANGE
    );
    assert!(outer.slice_range(6, 4).is_err());
}

/// 切片沿用源缓冲的上限，扩容只在共享区域尾部追加空间。
#[test]
fn slice_growth_extends_the_shared_region() {
    let mut source = strict().allocate_bounded(8, 64).expect("分配");
    source.write_u64(1).expect("写满");
    let mut slice = source.slice_range(4, 4).expect("切片");
    assert_eq!(slice.max_capacity(), 64);
    slice.set_writer_index(4).expect("写游标在容量内");
    slice.write_u32(0xAABB_CCDD).expect("扩容写入");
    assert!(slice.capacity() >= 8);
    assert_eq!(slice.get_u32(4).expect("读取"), 0xAABB_CCDD);
    assert_eq!(source.get_u64(0).expect("源内容不变"), 1);
}

/// 切片释放会标记整块内存，多次释放是幂等的。
#[test]
fn release_is_idempotent_across_handles() {
    let source = filled(8);
    let slice = source.slice().expect("切片");
    let duplicate = source.duplicate().expect("副本");
    slice.release();
    assert!(source.is_freed());
    assert_eq!(
        source.get_u8(0).expect_err("已释放").code(),
        codes::USE_AFTER_FREE
    );
    assert!(duplicate.slice().is_err(), "已释放的内存不能再派生视图");
    duplicate.release();
    source.release();
}

/// 副本的释放不影响源缓冲。
#[test]
fn releasing_a_duplicate_keeps_the_source_alive() {
    let source = filled(4);
    source.duplicate().expect("副本").release();
    assert!(!source.is_freed());
    assert_eq!(source.get_u32(0).expect("读取"), 0x0001_0203);
}

/// 副本在另一个线程持续读取，所有者在本线程反复扩容，读取始终落在有效内存上。
#[test]
fn duplicate_on_another_thread_survives_owner_growth() {
    const KIB: u32 = 1024;
    let allocator = DefaultAllocator::new(MemoryConfig::new());
    let mut owner = allocator
        .allocate_bounded(64 * KIB, 64 * KIB * KIB)
        .expect("分配");
    owner.set_u8(0, 1).expect("写入首字节");
    let reader = owner.duplicate().expect("副本");
    let stop = Arc::new(AtomicBool::new(false));
    let worker = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                assert_eq!(reader.get_u8(0).expect("副本容量内的读取"), 1);
            }
            reader.capacity()
        })
    };
    let chunk = vec![1u8; (256 * KIB) as usize];
    for _ in 0..64 {
        owner.write_bytes(&chunk).expect("扩容写入");
    }
    stop.store(true, Ordering::Release);
    let reader_capacity = worker.join().expect("读线程没有崩溃");
    assert_eq!(reader_capacity, 64 * KIB, "副本的逻辑容量不随所有者扩容");
    assert_eq!(owner.writer_index(), 64 * 256 * KIB);
    assert!(owner.capacity() >= owner.writer_index());
}
