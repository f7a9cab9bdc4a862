//! Little-endian field access over page bytes.

use bytes::{Buf, BufMut};

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    (&data[offset..offset + 4]).get_u32_le()
}

pub(crate) fn read_i32(data: &[u8], offset: usize) -> i32 {
    (&data[offset..offset + 4]).get_i32_le()
}

pub(crate) fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    (&mut data[offset..offset + 4]).put_u32_le(value);
}

pub(crate) fn write_i32(data: &mut [u8], offset: usize, value: i32) {
    (&mut data[offset..offset + 4]).put_i32_le(value);
}
