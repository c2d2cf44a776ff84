//! MD5 fingerprinting for game content identity.
//!
//! Two regimes: binary content is hashed capped at [`MAX_HASH_BYTES`] so a
//! multi-gigabyte image fingerprints in bounded time, and text-based ROMs
//! are hashed over a line-ending-normalized copy so the same dump produced
//! on different OSes yields the same digest.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};
use questlog_core::cancel::CancelToken;

use crate::error::{FormatError, Result};
use crate::util::to_hex;

/// Hash at most this many bytes of a file. Identity databases key large
/// images on their leading span, so capping keeps results compatible.
pub const MAX_HASH_BYTES: u64 = 64 * 1024 * 1024;

/// Read chunk size for streaming digests.
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Lowercase MD5 of an in-memory buffer.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    to_hex(&hasher.finalize())
}

/// Lowercase MD5 of up to `limit` bytes from `reader`, checking for
/// cancellation between chunks.
pub fn md5_reader_capped<R: Read>(
    reader: &mut R,
    limit: u64,
    cancel: &CancelToken,
) -> Result<String> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    let mut remaining = limit;

    while remaining > 0 {
        if cancel.is_cancelled() {
            return Err(FormatError::Cancelled);
        }
        let want = buf.len().min(remaining as usize);
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }

    Ok(to_hex(&hasher.finalize()))
}

/// Lowercase MD5 of the first [`MAX_HASH_BYTES`] of a file.
pub fn md5_file_capped(path: &Path, cancel: &CancelToken) -> Result<String> {
    let mut file = File::open(path)?;
    md5_reader_capped(&mut file, MAX_HASH_BYTES, cancel)
}

/// Line-ending rewriter that can be fed input in arbitrary chunks.
///
/// A `\r\n` pair may straddle a chunk boundary, so the swallowed-`\n`
/// state has to survive between `feed` calls.
#[derive(Default)]
struct LineNormalizer {
    swallow_lf: bool,
    line_open: bool,
}

impl LineNormalizer {
    fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        for &byte in chunk {
            if self.swallow_lf {
                self.swallow_lf = false;
                // \r\n collapses into one terminator
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\r' => {
                    out.push(b'\n');
                    self.line_open = false;
                    self.swallow_lf = true;
                }
                b'\n' => {
                    out.push(b'\n');
                    self.line_open = false;
                }
                other => {
                    out.push(other);
                    self.line_open = true;
                }
            }
        }
    }

    fn finish(&self, out: &mut Vec<u8>) {
        if self.line_open {
            out.push(b'\n');
        }
    }
}

/// Rewrite every line ending (`\r\n`, `\r`, `\n`) as a single `\n` and
/// terminate the final line, so that re-saved text ROMs hash identically.
/// Empty input stays empty: no terminator is invented for zero lines.
pub fn normalize_line_endings(data: &[u8]) -> Vec<u8> {
    let mut normalizer = LineNormalizer::default();
    let mut out = Vec::with_capacity(data.len() + 1);
    normalizer.feed(data, &mut out);
    normalizer.finish(&mut out);
    out
}

/// Lowercase MD5 of up to `limit` bytes from `reader` after line-ending
/// normalization, checking for cancellation between chunks.
pub fn md5_text_reader<R: Read>(
    reader: &mut R,
    limit: u64,
    cancel: &CancelToken,
) -> Result<String> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    let mut normalized = Vec::with_capacity(HASH_BUFFER_SIZE + 1);
    let mut normalizer = LineNormalizer::default();
    let mut remaining = limit;

    while remaining > 0 {
        if cancel.is_cancelled() {
            return Err(FormatError::Cancelled);
        }
        let want = buf.len().min(remaining as usize);
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        normalized.clear();
        normalizer.feed(&buf[..n], &mut normalized);
        hasher.update(&normalized);
        remaining -= n as u64;
    }

    normalized.clear();
    normalizer.finish(&mut normalized);
    hasher.update(&normalized);
    Ok(to_hex(&hasher.finalize()))
}

/// Lowercase MD5 of a text file after line-ending normalization, streamed
/// and capped the same way as the binary variant.
pub fn md5_text_file(path: &Path, cancel: &CancelToken) -> Result<String> {
    let mut file = File::open(path)?;
    md5_text_reader(&mut file, MAX_HASH_BYTES, cancel)
}
