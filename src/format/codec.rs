//! Varint, timestamp and fixed-width integer encoding
//!
//! Compressed unsigned integers are little-endian base-128: each byte carries
//! seven value bits and the high bit marks a continuation. Timestamps are raw
//! 8-byte little-endian `i64` microseconds.
//!
//! Decoders return `std::io::Error` so they compose with any `Read`:
//! `UnexpectedEof` means the input ended inside the value and `InvalidData`
//! means the encoding can never be valid. Neither is ever reported as zero.

use std::io::{self, Read};

/// Longest valid encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Append the varint encoding of `value` to `buf`.
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push(0x80 | (value & 0x7f) as u8);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Number of bytes `encode_varint` emits for `value`.
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decode one varint, stopping at the first byte with the high bit clear.
pub fn read_varint<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        let bits = u64::from(byte[0] & 0x7f);
        let shift = 7 * i as u32;

        // The tenth byte may only contribute the top bit of a u64.
        if i == MAX_VARINT_LEN - 1 && bits > 1 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflows u64"));
        }
        value |= bits << shift;

        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
    }

    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("varint longer than {} bytes", MAX_VARINT_LEN),
    ))
}

/// Append a capture timestamp in microseconds.
pub fn write_timestamp(time_us: i64, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&time_us.to_le_bytes());
}

/// Read a capture timestamp in microseconds.
pub fn read_timestamp<R: Read>(reader: &mut R) -> io::Result<i64> {
    let mut raw = [0u8; 8];
    reader.read_exact(&mut raw)?;
    Ok(i64::from_le_bytes(raw))
}

/// Read a little-endian `u64` (the footer's `STA` offset).
pub fn read_u64_le<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut raw = [0u8; 8];
    reader.read_exact(&mut raw)?;
    Ok(u64::from_le_bytes(raw))
}
