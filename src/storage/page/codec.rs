use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::Rid;

/// Fixed-width little-endian encoding for values persisted inside page
/// layouts. The hash index's keys and values implement this; the width
/// determines how many slots fit in a bucket page.
pub trait FixedWidth: Sized {
    const WIDTH: usize;

    fn write_to(&self, buf: &mut [u8]);
    fn read_from(buf: &[u8]) -> Self;
}

impl FixedWidth for i32 {
    const WIDTH: usize = 4;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn read_from(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl FixedWidth for u32 {
    const WIDTH: usize = 4;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn read_from(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl FixedWidth for i64 {
    const WIDTH: usize = 8;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn read_from(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl FixedWidth for u64 {
    const WIDTH: usize = 8;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn read_from(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

/// Opaque fixed-length keys, e.g. the padded composite keys an executor
/// layer hands the index
impl<const N: usize> FixedWidth for [u8; N] {
    const WIDTH: usize = N;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(self);
    }

    fn read_from(buf: &[u8]) -> Self {
        let mut out = [0u8; N];
        out.copy_from_slice(&buf[..N]);
        out
    }
}

impl FixedWidth for Rid {
    const WIDTH: usize = 8;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[0..4], self.page_id);
        LittleEndian::write_u32(&mut buf[4..8], self.slot_num);
    }

    fn read_from(buf: &[u8]) -> Self {
        Rid {
            page_id: LittleEndian::read_i32(&buf[0..4]),
            slot_num: LittleEndian::read_u32(&buf[4..8]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rid_round_trip() {
        let rid = Rid::new(42, 7);
        let mut buf = [0u8; 8];
        rid.write_to(&mut buf);
        assert_eq!(Rid::read_from(&buf), rid);
    }

    #[test]
    fn negative_ints_round_trip() {
        let mut buf = [0u8; 8];
        (-123i32).write_to(&mut buf);
        assert_eq!(i32::read_from(&buf), -123);
        (-9_000_000_000i64).write_to(&mut buf);
        assert_eq!(i64::read_from(&buf), -9_000_000_000);
    }
}
