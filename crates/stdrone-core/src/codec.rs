//! Little-endian field readers for fixed-offset payloads

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("Read of {width} bytes at offset {offset} exceeds buffer of {len} bytes")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },
}

fn field<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], CodecError> {
    let out_of_bounds = CodecError::OutOfBounds {
        offset,
        width: N,
        len: buf.len(),
    };
    let end = offset.checked_add(N).ok_or(out_of_bounds)?;
    buf.get(offset..end)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(out_of_bounds)
}

pub fn read_u16_le(buf: &[u8], offset: usize) -> Result<u16, CodecError> {
    field::<2>(buf, offset).map(u16::from_le_bytes)
}

pub fn read_u32_le(buf: &[u8], offset: usize) -> Result<u32, CodecError> {
    field::<4>(buf, offset).map(u32::from_le_bytes)
}

pub fn read_i16_le(buf: &[u8], offset: usize) -> Result<i16, CodecError> {
    field::<2>(buf, offset).map(i16::from_le_bytes)
}

pub fn read_i32_le(buf: &[u8], offset: usize) -> Result<i32, CodecError> {
    field::<4>(buf, offset).map(i32::from_le_bytes)
}

/// Lowercase dash-separated hex, e.g. `0a-ff`
pub fn to_hex(buf: &[u8]) -> String {
    let encoded = hex::encode(buf);
    let mut out = String::with_capacity(encoded.len() + buf.len().saturating_sub(1));
    for (i, digit) in encoded.chars().enumerate() {
        if i > 0 && i % 2 == 0 {
            out.push('-');
        }
        out.push(digit);
    }
    out
}
