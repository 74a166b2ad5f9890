//! 扩容策略与显式容量调整。

use std::sync::Arc;

use crate::error::{MemoryError, Result};

use super::{Buffer, Role};

/// 分段扩容的阈值：4 MiB。
const CAPACITY_THRESHOLD: u64 = 4 * 1024 * 1024;

/// 小容量阶段的起始值。
const MIN_GROWTH: u64 = 64;

/// 计算满足 `min_new_capacity` 的新容量。
///
/// # 契约说明（What）
/// - `min_new_capacity > max_capacity` 时返回 [`MemoryError::CapacityExceeded`]；
/// - 恰好等于 4 MiB 时返回 4 MiB；
/// - 超过 4 MiB 时先向下取整到 4 MiB 的倍数，再加一个 4 MiB；若结果会越过
///   `max_capacity - 4 MiB`，直接取 `max_capacity`；
/// - 低于 4 MiB 时从 64 开始翻倍，直到不小于需求，最终不超过 `max_capacity`。
pub fn calculate_new_capacity(min_new_capacity: u64, max_capacity: u32) -> Result<u32> {
    let max = u64::from(max_capacity);
    if min_new_capacity > max {
        return Err(MemoryError::CapacityExceeded {
            required: min_new_capacity,
            max_capacity,
        });
    }
    if min_new_capacity == CAPACITY_THRESHOLD {
        return Ok(CAPACITY_THRESHOLD as u32);
    }
    let new_capacity = if min_new_capacity > CAPACITY_THRESHOLD {
        let floor = min_new_capacity / CAPACITY_THRESHOLD * CAPACITY_THRESHOLD;
        if floor > max.saturating_sub(CAPACITY_THRESHOLD) {
            max
        } else {
            floor + CAPACITY_THRESHOLD
        }
    } else {
        let mut capacity = MIN_GROWTH;
        while capacity < min_new_capacity {
            capacity <<= 1;
        }
        capacity.min(max)
    };
    // 两个分支的结果都不超过 `max`，因此能放进 `u32`。
    Ok(new_capacity as u32)
}

impl Buffer {
    /// 确保至少还能写入 `min_writable` 字节，不足时扩容。
    ///
    /// # 契约说明（What）
    /// - `min_writable > max_capacity - writer_index` 时返回 [`MemoryError::CapacityExceeded`]，
    ///   缓冲状态不变；
    /// - 扩容目标为 `calculate_new_capacity(writer_index + min_writable, max_capacity)`。
    pub fn ensure_writable(&mut self, min_writable: u32) -> Result<()> {
        if min_writable <= self.writable_bytes() {
            return Ok(());
        }
        let required = u64::from(self.writer_index) + u64::from(min_writable);
        if min_writable > self.max_writable_bytes() {
            return Err(MemoryError::CapacityExceeded {
                required,
                max_capacity: self.max_capacity,
            });
        }
        let new_capacity = calculate_new_capacity(required, self.max_capacity)?;
        self.set_capacity(new_capacity)
    }

    /// 调整逻辑容量。
    ///
    /// # 契约说明（What）
    /// - `new_capacity > max_capacity` 返回 [`MemoryError::IllegalArgument`]；
    /// - 缩容时写游标被截断到新容量，读游标与两个标记随之截断，已有内容在新容量内保持不变；
    /// - 扩容部分读取为 0（池化缓冲复用的区域除外，其中可能残留上一任使用者的字节）。
    ///
    /// # 物理区域的处理
    /// - 非池化且独占整块区域的所有者：按新容量精确调整物理大小；
    /// - 池化缓冲或存在其它共享句柄时：物理区域只增不减，缩容仅修改逻辑容量。
    pub fn set_capacity(&mut self, new_capacity: u32) -> Result<()> {
        if new_capacity > self.max_capacity {
            return Err(MemoryError::illegal_argument(format!(
                "newCapacity: {new_capacity} (expected: 0-{})",
                self.max_capacity
            )));
        }
        self.ensure_accessible()?;
        let physical = self.offset_of(new_capacity);
        let exclusive = !self.pooled
            && self.role == Role::Owner
            && self.offset == 0
            && Arc::strong_count(&self.arena) == 1;
        if exclusive {
            self.arena.resize(physical)?;
        } else {
            self.arena.reserve(physical)?;
        }
        if new_capacity > self.capacity {
            tracing::debug!(
                target: "spark_memory::buffer",
                from = self.capacity,
                to = new_capacity,
                max_capacity = self.max_capacity,
                "buffer capacity grown"
            );
        }
        self.capacity = new_capacity;
        self.writer_index = self.writer_index.min(new_capacity);
        self.reader_index = self.reader_index.min(self.writer_index);
        self.marked_writer_index = self.marked_writer_index.min(new_capacity);
        self.marked_reader_index = self.marked_reader_index.min(self.marked_writer_index);
        Ok(())
    }
}
