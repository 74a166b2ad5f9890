//! 定宽值的 get/set/read/write。
//!
//! 有符号整数、浮点数与布尔值都按位映射到同宽的无符号 [`Word`]，底层只读写无符号位模式；
//! 无符号读取因此天然等价于“有符号读取后按位掩码”。

use crate::{
    accessor::{ByteOrder, Word},
    error::Result,
};

use super::Buffer;

/// 可以与某个 [`Word`] 做按位互转的值类型。
trait Scalar: Copy {
    type Raw: Word;

    fn from_raw(raw: Self::Raw) -> Self;

    fn into_raw(self) -> Self::Raw;
}

macro_rules! impl_scalar {
    ($($ty:ty => $raw:ty, |$r:ident| $from:expr, |$v:ident| $into:expr;)*) => {
        $(
            impl Scalar for $ty {
                type Raw = $raw;

                #[inline]
                fn from_raw($r: $raw) -> Self {
                    $from
                }

                #[inline]
                fn into_raw(self) -> $raw {
                    let $v = self;
                    $into
                }
            }
        )*
    };
}

impl_scalar! {
    u8 => u8, |r| r, |v| v;
    i8 => u8, |r| r as i8, |v| v as u8;
    u16 => u16, |r| r, |v| v;
    i16 => u16, |r| r as i16, |v| v as u16;
    u32 => u32, |r| r, |v| v;
    i32 => u32, |r| r as i32, |v| v as u32;
    u64 => u64, |r| r, |v| v;
    i64 => u64, |r| r as i64, |v| v as u64;
    f32 => u32, |r| f32::from_bits(r), |v| v.to_bits();
    f64 => u64, |r| f64::from_bits(r), |v| v.to_bits();
    bool => u8, |r| r != 0, |v| u8::from(v);
}

impl Buffer {
    #[inline]
    fn get_scalar<T: Scalar>(&self, index: u32, order: ByteOrder) -> Result<T> {
        self.guard(index, T::Raw::WIDTH)?;
        self.arena
            .get::<T::Raw>(self.offset_of(index), order)
            .map(T::from_raw)
    }

    #[inline]
    fn set_scalar<T: Scalar>(&mut self, index: u32, value: T, order: ByteOrder) -> Result<()> {
        self.guard(index, T::Raw::WIDTH)?;
        self.arena
            .set::<T::Raw>(self.offset_of(index), value.into_raw(), order)
    }

    #[inline]
    fn read_scalar<T: Scalar>(&mut self, order: ByteOrder) -> Result<T> {
        self.check_readable(T::Raw::WIDTH)?;
        let value = self.get_scalar(self.reader_index, order)?;
        self.reader_index += T::Raw::WIDTH as u32;
        Ok(value)
    }

    #[inline]
    fn write_scalar<T: Scalar>(&mut self, value: T, order: ByteOrder) -> Result<()> {
        self.ensure_writable(T::Raw::WIDTH as u32)?;
        self.set_scalar(self.writer_index, value, order)?;
        self.writer_index += T::Raw::WIDTH as u32;
        Ok(())
    }
}

macro_rules! typed_accessors {
    ($($ty:ty, $order:ident, $order_name:literal => $get:ident, $set:ident, $read:ident, $write:ident;)*) => {
        impl Buffer {
            $(
                #[doc = concat!("读取 `index` 处的 `", stringify!($ty), "`（", $order_name, "），不移动游标。")]
                #[inline]
                pub fn $get(&self, index: u32) -> Result<$ty> {
                    self.get_scalar(index, ByteOrder::$order)
                }

                #[doc = concat!("在 `index` 处写入 `", stringify!($ty), "`（", $order_name, "），不移动游标。")]
                #[inline]
                pub fn $set(&mut self, index: u32, value: $ty) -> Result<()> {
                    self.set_scalar(index, value, ByteOrder::$order)
                }

                #[doc = concat!("从读游标消费一个 `", stringify!($ty), "`（", $order_name, "）。")]
                #[inline]
                pub fn $read(&mut self) -> Result<$ty> {
                    self.read_scalar(ByteOrder::$order)
                }

                #[doc = concat!("在写游标追加一个 `", stringify!($ty), "`（", $order_name, "），空间不足时扩容。")]
                #[inline]
                pub fn $write(&mut self, value: $ty) -> Result<()> {
                    self.write_scalar(value, ByteOrder::$order)
                }
            )*
        }
    };
}

typed_accessors! {
    u8, BigEndian, "单字节" => get_u8, set_u8, read_u8, write_u8;
    i8, BigEndian, "单字节" => get_i8, set_i8, read_i8, write_i8;
    bool, BigEndian, "单字节，非零即真" => get_bool, set_bool, read_bool, write_bool;
    u16, BigEndian, "大端" => get_u16, set_u16, read_u16, write_u16;
    u16, LittleEndian, "小端" => get_u16_le, set_u16_le, read_u16_le, write_u16_le;
    i16, BigEndian, "大端" => get_i16, set_i16, read_i16, write_i16;
    i16, LittleEndian, "小端" => get_i16_le, set_i16_le, read_i16_le, write_i16_le;
    u32, BigEndian, "大端" => get_u32, set_u32, read_u32, write_u32;
    u32, LittleEndian, "小端" => get_u32_le, set_u32_le, read_u32_le, write_u32_le;
    i32, BigEndian, "大端" => get_i32, set_i32, read_i32, write_i32;
    i32, LittleEndian, "小端" => get_i32_le, set_i32_le, read_i32_le, write_i32_le;
    u64, BigEndian, "大端" => get_u64, set_u64, read_u64, write_u64;
    u64, LittleEndian, "小端" => get_u64_le, set_u64_le, read_u64_le, write_u64_le;
    i64, BigEndian, "大端" => get_i64, set_i64, read_i64, write_i64;
    i64, LittleEndian, "小端" => get_i64_le, set_i64_le, read_i64_le, write_i64_le;
    f32, BigEndian, "大端 IEEE 754" => get_f32, set_f32, read_f32, write_f32;
    f32, LittleEndian, "小端 IEEE 754" => get_f32_le, set_f32_le, read_f32_le, write_f32_le;
    f64, BigEndian, "大端 IEEE 754" => get_f64, set_f64, read_f64, write_f64;
    f64, LittleEndian, "小端 IEEE 754" => get_f64_le, set_f64_le, read_f64_le, write_f64_le;
}
