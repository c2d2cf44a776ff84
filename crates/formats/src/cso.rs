//! CSO/CISO compressed disc image decoding.
//!
//! A CISO file is a 24-byte header, an index of `block_count + 1` little-
//! endian u32 entries, then per-block payloads. Each index entry encodes a
//! file position (`(entry & 0x7FFF_FFFF) << index_shift`) and a top bit
//! meaning "stored, not deflated". Writers disagree on where the index
//! lives (offset 24 vs. the declared header size) and on whether positions
//! are absolute or relative to the end of the index, so the decoder tries
//! each interpretation and keeps the first one whose positions are
//! monotonic, inside the file, and past the index itself.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use questlog_core::cancel::CancelToken;
use tempfile::{NamedTempFile, TempPath};
use tracing::debug;

use crate::codec::inflate_exact;
use crate::error::{FormatError, Result};
use crate::util::{bytesa, le_u32, le_u64};

pub const CSO_MAGIC: [u8; 4] = *b"CISO";

const HEADER_LEN: u64 = 24;
const POSITION_MASK: u32 = 0x7FFF_FFFF;
const STORED_FLAG: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy)]
pub struct CsoHeader {
    pub header_size: u32,
    pub uncompressed_size: u64,
    pub block_size: u32,
    pub version: u8,
    pub index_shift: u8,
}

impl CsoHeader {
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let magic: [u8; 4] = bytesa(reader)?;
        if magic != CSO_MAGIC {
            return Err(FormatError::invalid(
                "cso header",
                format!("bad magic {magic:02x?}"),
            ));
        }
        let header_size = le_u32(reader)?;
        let uncompressed_size = le_u64(reader)?;
        let block_size = le_u32(reader)?;
        let tail: [u8; 4] = bytesa(reader)?; // version, index shift, 2 pad
        let version = tail[0];
        let index_shift = tail[1];

        if block_size == 0 || block_size > i32::MAX as u32 {
            return Err(FormatError::invalid(
                "cso header",
                format!("block size {block_size} out of range"),
            ));
        }
        if index_shift > 31 {
            return Err(FormatError::invalid(
                "cso header",
                format!("index shift {index_shift} out of range"),
            ));
        }

        Ok(Self {
            header_size,
            uncompressed_size,
            block_size,
            version,
            index_shift,
        })
    }

    pub fn block_count(&self) -> u64 {
        self.uncompressed_size.div_ceil(self.block_size as u64)
    }
}

/// Decode a CSO image into a fresh temp file.
///
/// The returned [`TempPath`] removes the file when dropped, so callers hash
/// or copy the image before letting it go. `progress` receives
/// `(bytes_written, total_bytes)` after every block.
pub fn decode_to_temp(
    path: &Path,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<TempPath> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let header = CsoHeader::parse(&mut file)?;
    let (entries, positions) = select_index(&mut file, &header, file_len)?;

    let total = header.uncompressed_size;
    let block_size = header.block_size as usize;
    let mut in_buf: Vec<u8> = Vec::new();
    let mut out_buf = vec![0u8; block_size];
    let mut tmp = NamedTempFile::new()?;
    let mut written = 0u64;

    for i in 0..header.block_count() as usize {
        if cancel.is_cancelled() {
            return Err(FormatError::Cancelled);
        }

        let expected = ((total - written).min(block_size as u64)) as usize;
        let start = positions[i];
        let stored = (positions[i + 1] - start) as usize;
        // v2 writers may leave the flag clear on blocks stored verbatim
        // because compression did not shrink them.
        let plain = entries[i] & STORED_FLAG != 0
            || (header.version >= 2 && stored >= block_size);

        file.seek(SeekFrom::Start(start))?;
        let out = &mut out_buf[..expected];
        if plain {
            if stored < expected {
                return Err(FormatError::invalid(
                    "cso block",
                    format!("block {i}: {stored} bytes stored, {expected} needed"),
                ));
            }
            file.read_exact(out)?;
        } else {
            in_buf.resize(stored, 0);
            file.read_exact(&mut in_buf)?;
            inflate_exact(&in_buf, out)?;
        }
        tmp.write_all(out)?;

        written += expected as u64;
        progress(written, total);
    }

    tmp.flush()?;
    Ok(tmp.into_temp_path())
}

/// Read the index table and resolve the one self-consistent interpretation
/// of (table offset, position base).
fn select_index(
    file: &mut File,
    header: &CsoHeader,
    file_len: u64,
) -> Result<(Vec<u32>, Vec<u64>)> {
    // An index bigger than the container can only come from a forged size
    // field; reject before any allocation.
    let index_bytes = header
        .block_count()
        .checked_add(1)
        .and_then(|count| count.checked_mul(4))
        .filter(|&len| len <= file_len)
        .ok_or_else(|| {
            FormatError::invalid(
                "cso index",
                format!(
                    "{} declared bytes need an index larger than the {file_len}-byte file",
                    header.uncompressed_size
                ),
            )
        })?;

    let mut offsets = vec![HEADER_LEN];
    let declared = header.header_size as u64;
    if declared != HEADER_LEN && declared >= HEADER_LEN {
        offsets.push(declared);
    }

    for offset in offsets {
        let Some(entries) = read_index(file, offset, index_bytes, file_len)? else {
            continue;
        };
        let index_end = offset + index_bytes;

        // Absolute positions first; the relative-to-index-end convention is
        // the fallback some emulator-era writers used.
        if let Some(positions) =
            resolve_positions(&entries, header.index_shift, 0, index_end, file_len)
        {
            debug!("cso: index at offset {offset}, absolute positions");
            return Ok((entries, positions));
        }
        if let Some(positions) =
            resolve_positions(&entries, header.index_shift, index_end, index_end, file_len)
        {
            debug!("cso: index at offset {offset}, positions relative to index end");
            return Ok((entries, positions));
        }
    }

    Err(FormatError::invalid(
        "cso index",
        "no self-consistent index interpretation".to_string(),
    ))
}

fn read_index(
    file: &mut File,
    offset: u64,
    byte_len: u64,
    file_len: u64,
) -> Result<Option<Vec<u32>>> {
    // Caller guarantees byte_len <= file_len, so this cannot underflow.
    if file_len - byte_len < offset {
        return Ok(None);
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut raw = vec![0u8; byte_len as usize];
    file.read_exact(&mut raw)?;

    let mut entries = Vec::with_capacity(raw.len() / 4);
    for chunk in raw.chunks_exact(4) {
        entries.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(Some(entries))
}

/// Decode every index entry to a byte position under one candidate
/// interpretation. `None` when any position falls before `floor`, past the
/// end of the file, or out of order.
fn resolve_positions(
    entries: &[u32],
    shift: u8,
    base: u64,
    floor: u64,
    file_len: u64,
) -> Option<Vec<u64>> {
    let mut positions = Vec::with_capacity(entries.len());
    let mut prev = 0u64;
    for (i, &entry) in entries.iter().enumerate() {
        let pos = base + (((entry & POSITION_MASK) as u64) << shift);
        if pos < floor || pos > file_len {
            return None;
        }
        if i > 0 && pos < prev {
            return None;
        }
        prev = pos;
        positions.push(pos);
    }
    Some(positions)
}
