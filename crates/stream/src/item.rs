//! Fixed-size items that can live in a stream.

use byteorder::{ByteOrder, LittleEndian};

/// A plain value with a fixed little-endian encoding of `SIZE` bytes.
///
/// Blocks always hold a whole number of items, so `SIZE` must not exceed the
/// logical block size of the stream it is stored in.
pub trait Item: Copy + 'static {
    const SIZE: usize;

    /// Writes `self` into `buf[..Self::SIZE]`.
    fn encode(&self, buf: &mut [u8]);

    /// Reads a value back from `buf[..Self::SIZE]`.
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_item_le {
    ($($ty:ty => $size:expr, $write:ident, $read:ident;)*) => {
        $(
            impl Item for $ty {
                const SIZE: usize = $size;

                fn encode(&self, buf: &mut [u8]) {
                    LittleEndian::$write(&mut buf[..$size], *self);
                }

                fn decode(buf: &[u8]) -> Self {
                    LittleEndian::$read(&buf[..$size])
                }
            }
        )*
    };
}

impl_item_le! {
    u16 => 2, write_u16, read_u16;
    u32 => 4, write_u32, read_u32;
    u64 => 8, write_u64, read_u64;
    u128 => 16, write_u128, read_u128;
    i16 => 2, write_i16, read_i16;
    i32 => 4, write_i32, read_i32;
    i64 => 8, write_i64, read_i64;
    i128 => 16, write_i128, read_i128;
    f32 => 4, write_f32, read_f32;
    f64 => 8, write_f64, read_f64;
}

impl Item for u8 {
    const SIZE: usize = 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self;
    }

    fn decode(buf: &[u8]) -> Self {
        buf[0]
    }
}

impl Item for i8 {
    const SIZE: usize = 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }

    fn decode(buf: &[u8]) -> Self {
        buf[0] as i8
    }
}

impl<const N: usize> Item for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut out = [0u8; N];
        out.copy_from_slice(&buf[..N]);
        out
    }
}

/// Pairs are stored as the two encodings back to back, which makes
/// `(key, payload)` records cheap to express.
impl<A: Item, B: Item> Item for (A, B) {
    const SIZE: usize = A::SIZE + B::SIZE;

    fn encode(&self, buf: &mut [u8]) {
        self.0.encode(&mut buf[..A::SIZE]);
        self.1.encode(&mut buf[A::SIZE..A::SIZE + B::SIZE]);
    }

    fn decode(buf: &[u8]) -> Self {
        (A::decode(&buf[..A::SIZE]), B::decode(&buf[A::SIZE..A::SIZE + B::SIZE]))
    }
}
