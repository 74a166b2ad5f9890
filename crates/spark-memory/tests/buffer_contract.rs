//! `buffer_contract` 集成测试：从公开 API 验证游标模型、检查策略与扩容规则。
//!
//! # 测试目标（Why）
//! - 游标不变量、越界与释放后访问的失败语义是调用方依赖的契约，任何重构都不得改变；
//! - 扩容规则的具体数值是可观测行为，必须逐项锁定。
//!
//! # 结构安排（How）
//! - 每个测试覆盖一条契约，失败信息使用中文描述期望；
//! - 只通过 `spark_memory` 的公开导出访问，避免耦合内部实现。

use spark_memory::{
    Bounds, DefaultAllocator, MemoryAllocator, MemoryConfig, MemoryError, error::codes,
};

fn checked() -> DefaultAllocator {
    DefaultAllocator::new(MemoryConfig::new())
}

/// 新分配的缓冲游标归零，整段容量可写。
#[test]
fn fresh_buffers_start_empty() {
    let buffer = checked().allocate_bounded(8, 16).expect("分配");
    assert_eq!((buffer.reader_index(), buffer.writer_index()), (0, 0));
    assert_eq!(buffer.readable_bytes(), 0);
    assert_eq!(buffer.writable_bytes(), 8);
    assert_eq!(buffer.max_writable_bytes(), 16);
    assert!(!buffer.is_readable());
    assert!(buffer.is_writable());
    assert!(buffer.has_writable(8));
    assert!(!buffer.has_writable(9));
}

/// 游标设置遵循 `0 <= reader <= writer <= capacity`，失败时状态不变。
#[test]
fn cursor_setters_enforce_the_invariant() {
    let mut buffer = checked().allocate(8).expect("分配");
    assert_eq!(
        buffer.set_reader_index(1).expect_err("读游标不能越过写游标").code(),
        codes::OUT_OF_RANGE
    );
    buffer.set_writer_index(6).expect("写游标在容量内");
    buffer.set_reader_index(2).expect("读游标在写游标内");
    assert!(buffer.set_writer_index(1).is_err(), "写游标不能回退到读游标之前");
    assert!(buffer.set_writer_index(9).is_err(), "写游标不能越过容量");
    assert!(buffer.set_index(5, 4).is_err());
    assert_eq!((buffer.reader_index(), buffer.writer_index()), (2, 6));
    buffer.set_index(0, 8).expect("合法组合");
    buffer.clear();
    assert_eq!((buffer.reader_index(), buffer.writer_index()), (0, 0));
}

/// 标记与恢复各保存一份快照，不受中间读写影响。
#[test]
fn mark_and_reset_restore_exact_positions() {
    let mut buffer = checked().allocate(16).expect("分配");
    buffer.write_u32(7).expect("写入");
    buffer.mark_writer_index();
    buffer.mark_reader_index();
    buffer.write_u64(9).expect("写入");
    buffer.read_u32().expect("读取");
    buffer.reset_reader_index().expect("恢复读游标");
    assert_eq!(buffer.reader_index(), 0);
    buffer.reset_writer_index().expect("恢复写游标");
    assert_eq!(buffer.writer_index(), 4);
    assert_eq!(buffer.read_u32().expect("再次读取"), 7);
}

/// 容量 8、上限 16 的检查缓冲：写满后切片，越界访问两侧都失败。
#[test]
fn slice_of_a_full_buffer_rebases_to_the_reader_index() {
    let mut buffer = checked().allocate_bounded_checked(8, 16, true).expect("分配");
    buffer.write_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]).expect("写满");
    buffer.set_reader_index(1).expect("移动读游标");
    let slice = buffer.slice().expect("切片");
    assert_eq!(slice.capacity(), 7);
    assert_eq!(slice.get_u8(0).expect("读取"), 2);
    assert_eq!(slice.max_capacity(), 16);
    for handle in [&buffer, &slice] {
        let err = handle.get_u8(8).expect_err("越界访问");
        assert_eq!(err.code(), codes::OUT_OF_RANGE);
    }
}

/// 写入 4 MiB + 1 字节时，容量从 4 MiB 扩到 8 MiB。
#[test]
fn growth_past_the_threshold_adds_one_step() {
    const MIB: u32 = 1024 * 1024;
    let mut buffer = checked().allocate_bounded(4 * MIB, 16 * MIB).expect("分配");
    let payload = vec![0x5Au8; (4 * MIB + 1) as usize];
    buffer.write_bytes(&payload).expect("扩容写入");
    assert_eq!(buffer.capacity(), 8 * MIB);
    assert_eq!(buffer.get_u8(4 * MIB).expect("读取末字节"), 0x5A);
}

/// 小容量按 64 起步翻倍，写入超过上限时报告所需容量。
#[test]
fn growth_doubles_and_stops_at_max_capacity() {
    let mut buffer = checked().allocate_bounded(4, 100).expect("分配");
    buffer.write_bytes(&[0; 5]).expect("扩容");
    assert_eq!(buffer.capacity(), 64);
    buffer.write_bytes(&[0; 60]).expect("扩容");
    assert_eq!(buffer.capacity(), 100);
    let err = buffer.write_bytes(&[0; 36]).expect_err("超过上限");
    assert_eq!(
        err,
        MemoryError::CapacityExceeded {
            required: 101,
            max_capacity: 100
        }
    );
    assert_eq!(buffer.writer_index(), 65, "失败的写入不移动游标");
}

/// 显式缩容截断游标，扩容部分读取为 0。
#[test]
fn set_capacity_clamps_cursors() {
    let mut buffer = checked().allocate_bounded(8, 32).expect("分配");
    buffer.write_bytes(&[1, 2, 3, 4, 5, 6]).expect("写入");
    buffer.set_reader_index(5).expect("移动读游标");
    buffer.set_capacity(4).expect("缩容");
    assert_eq!(
        (buffer.reader_index(), buffer.writer_index(), buffer.capacity()),
        (4, 4, 4)
    );
    buffer.set_capacity(16).expect("扩容");
    assert_eq!(buffer.get_u8(3).expect("保留原内容"), 4);
    assert_eq!(buffer.get_u8(12).expect("新区域"), 0);
    assert_eq!(
        buffer.set_capacity(33).expect_err("超过上限").code(),
        codes::ILLEGAL_ARGUMENT
    );
}

/// 不检查模式跳过逻辑边界，但物理边界依旧生效。
#[test]
fn unchecked_buffers_keep_the_physical_guard() {
    let allocator = checked();
    let mut buffer = allocator.allocate_bounded_checked(4, 64, false).expect("分配");
    assert_eq!(buffer.bounds(), Bounds::Unchecked);
    buffer.write_u32(0x0A0B_0C0D).expect("写入");
    buffer.set_capacity(2).expect("缩容");
    assert!(buffer.get_u8(100).is_err(), "越过物理分配必须失败");
    assert_eq!(buffer.read_u16().expect("截断后剩余两字节"), 0x0A0B);
    assert!(buffer.read_u8().is_err(), "游标读取仍受写游标约束");
}

/// 开启可访问性检查后，释放后的访问立即失败。
#[test]
fn use_after_free_is_detected_when_enabled() {
    let strict = DefaultAllocator::new(MemoryConfig::new().with_check_accessible(true));
    let buffer = strict.allocate(8).expect("分配");
    let view = buffer.duplicate().expect("副本");
    buffer.release();
    assert!(view.is_freed());
    assert_eq!(
        view.get_u32(0).expect_err("释放后访问").code(),
        codes::USE_AFTER_FREE
    );

    let lenient = checked().allocate(8).expect("分配");
    let view = lenient.duplicate().expect("副本");
    lenient.release();
    assert_eq!(view.get_u32(0).expect("未开启检查时读取陈旧字节"), 0);
}

/// 诊断输出包含容量、游标与释放标记。
#[test]
fn display_reports_state() {
    let mut buffer = checked().allocate_bounded(8, 16).expect("分配");
    buffer.write_u16(1).expect("写入");
    let rendered = buffer.to_string();
    assert!(rendered.contains("ridx: 0"), "{rendered}");
    assert!(rendered.contains("widx: 2"), "{rendered}");
    assert!(rendered.contains("cap: 8/16"), "{rendered}");
    assert!(rendered.contains("freed: false"), "{rendered}");
}
