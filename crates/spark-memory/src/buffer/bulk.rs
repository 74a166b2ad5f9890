//! 批量搬运：字节切片与缓冲之间、缓冲与缓冲之间。
//!
//! 与另一块缓冲交换数据时，按索引的变体不移动任何游标；以游标为起点的变体会推进
//! 源缓冲的读游标和/或目标缓冲的写游标。

use bytes::Bytes;

use crate::{
    arena::Arena,
    error::{MemoryError, Result},
};

use super::Buffer;

fn to_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        MemoryError::out_of_range(format!("length: {len} (expected: <= {})", u32::MAX))
    })
}

impl Buffer {
    /// 把 `index` 起的 `dst.len()` 字节复制到 `dst`。
    pub fn get_bytes(&self, index: u32, dst: &mut [u8]) -> Result<()> {
        self.guard(index, dst.len())?;
        self.arena.read_into(self.offset_of(index), dst)
    }

    /// 把 `index` 起的 `length` 字节追加到 `dst` 的写游标处，并推进 `dst` 的写游标。
    pub fn get_bytes_to(&self, index: u32, dst: &mut Buffer, length: u32) -> Result<()> {
        dst.ensure_writable(length)?;
        let dst_index = dst.writer_index;
        self.get_bytes_at(index, dst, dst_index, length)?;
        dst.writer_index += length;
        Ok(())
    }

    /// 把 `index` 起的 `length` 字节复制到 `dst` 的 `dst_index` 处，不移动任何游标。
    pub fn get_bytes_at(&self, index: u32, dst: &mut Buffer, dst_index: u32, length: u32) -> Result<()> {
        let len = length as usize;
        self.guard(index, len)?;
        dst.guard(dst_index, len)?;
        Arena::transfer(
            &self.arena,
            self.offset_of(index),
            &dst.arena,
            dst.offset_of(dst_index),
            len,
        )
    }

    /// 把 `src` 写入 `index` 起的区间。
    pub fn set_bytes(&mut self, index: u32, src: &[u8]) -> Result<()> {
        self.guard(index, src.len())?;
        self.arena.write_from(self.offset_of(index), src)
    }

    /// 从 `src` 的读游标取 `length` 字节写到 `index` 处，并推进 `src` 的读游标。
    pub fn set_bytes_from(&mut self, index: u32, src: &mut Buffer, length: u32) -> Result<()> {
        if length > src.readable_bytes() {
            return Err(MemoryError::out_of_range(format!(
                "length({length}) exceeds src.readableBytes({}) where src is: {src}",
                src.readable_bytes()
            )));
        }
        self.set_bytes_at(index, src, src.reader_index, length)?;
        src.reader_index += length;
        Ok(())
    }

    /// 从 `src` 的 `src_index` 处取 `length` 字节写到 `index` 处，不移动任何游标。
    pub fn set_bytes_at(&mut self, index: u32, src: &Buffer, src_index: u32, length: u32) -> Result<()> {
        let len = length as usize;
        self.guard(index, len)?;
        src.guard(src_index, len)?;
        Arena::transfer(
            &src.arena,
            src.offset_of(src_index),
            &self.arena,
            self.offset_of(index),
            len,
        )
    }

    /// 从读游标消费 `dst.len()` 字节。
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        self.check_readable(dst.len())?;
        self.get_bytes(self.reader_index, dst)?;
        self.reader_index += dst.len() as u32;
        Ok(())
    }

    /// 从读游标消费 `length` 字节并追加到 `dst`，两侧游标同时推进。
    pub fn read_bytes_to(&mut self, dst: &mut Buffer, length: u32) -> Result<()> {
        self.check_readable(length as usize)?;
        self.get_bytes_to(self.reader_index, dst, length)?;
        self.reader_index += length;
        Ok(())
    }

    /// 在写游标追加 `src`，空间不足时扩容。
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        let length = to_u32(src.len())?;
        self.ensure_writable(length)?;
        self.set_bytes(self.writer_index, src)?;
        self.writer_index += length;
        Ok(())
    }

    /// 从 `src` 的读游标取 `length` 字节追加到本缓冲，两侧游标同时推进。
    pub fn write_bytes_from(&mut self, src: &mut Buffer, length: u32) -> Result<()> {
        self.ensure_writable(length)?;
        self.set_bytes_from(self.writer_index, src, length)?;
        self.writer_index += length;
        Ok(())
    }

    /// 跳过 `length` 个可读字节。
    pub fn skip_bytes(&mut self, length: u32) -> Result<()> {
        self.check_readable(length as usize)?;
        self.reader_index += length;
        Ok(())
    }

    /// 可读区间的快照，游标不变。
    ///
    /// 返回的 [`Bytes`] 拥有独立的副本，之后对缓冲的写入不会反映到快照里。
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut snapshot = vec![0u8; self.readable_bytes() as usize];
        self.get_bytes(self.reader_index, &mut snapshot)?;
        Ok(Bytes::from(snapshot))
    }

    /// 可读区间的小写十六进制表示，游标不变。
    pub fn hex_dump(&self) -> Result<String> {
        Ok(hex::encode(self.to_bytes()?))
    }
}

#[cfg(test)]
mod tests {
    use crate::{DefaultAllocator, MemoryAllocator, MemoryConfig};

    fn allocator() -> DefaultAllocator {
        DefaultAllocator::new(MemoryConfig::new())
    }

    #[test]
    fn buffer_to_buffer_moves_both_cursors() {
        let allocator = allocator();
        let mut src = allocator.allocate(8).expect("分配");
        src.write_bytes(&[1, 2, 3, 4, 5]).expect("写入");
        let mut dst = allocator.allocate_bounded(2, 64).expect("分配");
        src.read_bytes_to(&mut dst, 4).expect("搬运");
        assert_eq!(src.reader_index(), 4);
        assert_eq!(dst.writer_index(), 4);
        assert!(dst.capacity() >= 4);
        assert_eq!(dst.hex_dump().expect("快照"), "01020304");
    }

    #[test]
    fn indexed_copies_leave_cursors_alone() {
        let allocator = allocator();
        let mut a = allocator.allocate(8).expect("分配");
        let mut b = allocator.allocate(8).expect("分配");
        a.set_bytes(0, &[9, 8, 7]).expect("写入");
        a.get_bytes_at(0, &mut b, 5, 3).expect("搬运");
        assert_eq!((b.reader_index(), b.writer_index()), (0, 0));
        assert_eq!(b.get_u8(7).expect("读取"), 7);
        assert!(a.get_bytes_at(0, &mut b, 6, 3).is_err());
    }

    #[test]
    fn write_bytes_from_requires_enough_readable_source() {
        let allocator = allocator();
        let mut src = allocator.allocate(4).expect("分配");
        src.write_u16(0xABCD).expect("写入");
        let mut dst = allocator.allocate(4).expect("分配");
        assert!(dst.write_bytes_from(&mut src, 3).is_err());
        dst.write_bytes_from(&mut src, 2).expect("搬运");
        assert_eq!(dst.read_u16().expect("读取"), 0xABCD);
        assert!(!src.is_readable());
    }

    #[test]
    fn snapshots_are_detached_from_the_buffer() {
        let mut buffer = allocator().allocate(4).expect("分配");
        buffer.write_bytes(&[1, 2]).expect("写入");
        buffer.skip_bytes(1).expect("跳过");
        let snapshot = buffer.to_bytes().expect("快照");
        buffer.set_u8(1, 0xFF).expect("写入");
        assert_eq!(&snapshot[..], &[2]);
        assert!(buffer.skip_bytes(2).is_err());
    }
}
