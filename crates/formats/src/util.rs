//! Byte-level decode helpers for the container parsers.
//!
//! Reader helpers are `read_exact`-based, so a truncated container fails
//! the read instead of yielding a short value. Slice helpers bounds-check
//! the offset against the caller's buffer.

use std::io::Read;

use crate::error::{FormatError, Result};

/// Read a little-endian `u32`.
#[inline]
pub(crate) fn le_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

/// Read a little-endian `u64`.
#[inline]
pub(crate) fn le_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

/// Read a big-endian `u32`.
#[inline]
pub(crate) fn be_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_be_bytes(b))
}

/// Read exactly `N` bytes into a fixed-size array.
#[inline]
pub(crate) fn bytesa<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut b = [0u8; N];
    r.read_exact(&mut b)?;
    Ok(b)
}

/// Read exactly `len` bytes into a `Vec`.
#[inline]
pub(crate) fn bytesv<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut b = vec![0u8; len];
    r.read_exact(&mut b)?;
    Ok(b)
}

/// Big-endian `u32` at `offset` within a slice, bounds-checked.
#[inline]
pub(crate) fn slice_u32_be(buf: &[u8], offset: usize, what: &'static str) -> Result<u32> {
    let b = buf
        .get(offset..offset + 4)
        .ok_or_else(|| FormatError::invalid(what, format!("offset {offset} out of bounds")))?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Big-endian `u64` at `offset` within a slice, bounds-checked.
#[inline]
pub(crate) fn slice_u64_be(buf: &[u8], offset: usize, what: &'static str) -> Result<u64> {
    let b = buf
        .get(offset..offset + 8)
        .ok_or_else(|| FormatError::invalid(what, format!("offset {offset} out of bounds")))?;
    Ok(u64::from_be_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

/// Lowercase hex rendering of a digest or id.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        // write! to a String cannot fail
        let _ = write!(s, "{b:02x}");
    }
    s
}
