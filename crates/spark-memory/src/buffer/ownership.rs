//! 派生视图与释放。
//!
//! # 设计概要（How）
//! - `copy*` 分配独立内存，与源缓冲再无关联；
//! - `slice*` 与 `duplicate` 共享源缓冲的 [`Arena`]，只拥有各自的游标；
//! - 物理内存随最后一个共享句柄销毁，`release` 只负责逻辑释放标记与池化归还。
//!
//! # 释放语义（What）
//!
//! | 句柄 | `release` 的效果 |
//! | --- | --- |
//! | 非池化所有者、非池化切片 | 标记整块内存已释放（幂等），放弃自身句柄 |
//! | 副本、池化缓冲的派生视图 | 只放弃自身句柄 |
//! | 池化所有者 | 交回所属池，由池决定复用还是丢弃 |

use std::{mem, sync::Arc};

use crate::{
    arena::Arena,
    error::{MemoryError, Result},
    pool::ReclaimedBuffer,
};

use super::{Buffer, BufferParts, Role};

impl Buffer {
    /// 复制整个 `[0, capacity)`，游标与源缓冲一致。
    pub fn copy(&self) -> Result<Buffer> {
        self.copy_range(0, self.capacity)
    }

    /// 复制 `[index, index + length)` 到一块新分配的内存。
    ///
    /// 新缓冲容量为 `length`，`max_capacity` 沿用源缓冲（不小于 `length`），游标沿用源缓冲的值并截断到
    /// `length` 以内。结果总是非池化的所有者。
    pub fn copy_range(&self, index: u32, length: u32) -> Result<Buffer> {
        self.guard(index, length as usize)?;
        let arena = self
            .arena
            .clone_range(self.offset_of(index), length as usize, length as usize)?;
        let writer_index = self.writer_index.min(length);
        let parts = BufferParts {
            capacity: length,
            max_capacity: self.max_capacity.max(length),
            reader_index: self.reader_index.min(writer_index),
            writer_index,
            bounds: self.bounds,
            config: self.config,
        };
        Ok(Buffer::from_arena(Arc::new(arena), 0, parts, Role::Owner))
    }

    /// 共享内存的可读区间视图，等价于 `slice_range(reader_index, readable_bytes)`。
    pub fn slice(&self) -> Result<Buffer> {
        self.slice_range(self.reader_index, self.readable_bytes())
    }

    /// 以 `index` 为新起点、`length` 为容量的共享视图。
    ///
    /// # 契约说明（What）
    /// - 视图的 0 号字节就是源缓冲的 `index` 号字节，双方写入互相可见；
    /// - 视图的游标由源缓冲的游标平移 `index` 后截断到 `[0, length]` 得到；
    /// - `max_capacity` 沿用源缓冲；视图扩容只会增大共享区域，不会移动它。
    pub fn slice_range(&self, index: u32, length: u32) -> Result<Buffer> {
        self.ensure_accessible()?;
        // 视图的起点一旦越界就无法再校验，因此不检查模式同样拒绝。
        if u64::from(index) + u64::from(length) > u64::from(self.capacity) {
            return Err(MemoryError::out_of_range(format!(
                "index: {index}, length: {length} (expected: range(0, {}))",
                self.capacity
            )));
        }
        let writer_index = self.writer_index.saturating_sub(index).min(length);
        let parts = BufferParts {
            capacity: length,
            max_capacity: self.max_capacity.max(length),
            reader_index: self.reader_index.saturating_sub(index).min(writer_index),
            writer_index,
            bounds: self.bounds,
            config: self.config,
        };
        let role = if self.pooled { Role::View } else { Role::Slice };
        Ok(self.derive(self.offset_of(index), parts, role))
    }

    /// 共享全部内容与当前游标的副本，此后两者的游标各自独立。
    pub fn duplicate(&self) -> Result<Buffer> {
        self.ensure_accessible()?;
        Ok(self.derive(self.offset, self.parts(), Role::View))
    }

    fn derive(&self, offset: usize, parts: BufferParts, role: Role) -> Buffer {
        let mut view = Buffer::from_arena(Arc::clone(&self.arena), offset, parts, role);
        view.pooled = self.pooled;
        view
    }

    /// 放弃本句柄，按句柄角色处理底层内存，见模块文档中的表格。
    pub fn release(self) {
        // 池化所有者在 `Drop` 中归还。
        let responsible = !self.pooled && matches!(self.role, Role::Owner | Role::Slice);
        if responsible && self.arena.mark_freed() {
            tracing::trace!(
                target: "spark_memory::buffer",
                address = ?self.memory_address(),
                capacity = self.capacity,
                role = ?self.role,
                "buffer released"
            );
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let Some(recycler) = self.recycler.take() else {
            return;
        };
        let arena = mem::replace(&mut self.arena, Arena::placeholder());
        recycler.reclaim(ReclaimedBuffer::new(arena, self.parts()));
    }
}
