//! RVZ/WIA compressed disc image decoding.
//!
//! Both formats share one layout: two checksummed headers, a partition
//! table (always plain), then raw-data and group tables stored with the
//! file's compression method. Disc bytes live in fixed-size groups tiling
//! each data range from its 0x8000-aligned start. RVZ additionally packs
//! group payloads, replacing console junk-data runs with a 17-word seed for
//! the lagged Fibonacci generator in [`lfg`].
//!
//! Wii images whose partition contents need hash and encryption
//! reconstruction are rejected loudly rather than decoded wrong.

pub mod lfg;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use questlog_core::cancel::CancelToken;
use sha1::{Digest, Sha1};
use tempfile::{NamedTempFile, TempPath};
use tracing::debug;

use crate::codec::{zstd_backend, CodecBackend};
use crate::error::{FormatError, Result};
use crate::rvz::lfg::{LaggedFibonacci, SEED_SIZE};
use crate::util::{slice_u32_be, slice_u64_be};

pub const RVZ_MAGIC: [u8; 4] = *b"RVZ\x01";
pub const WIA_MAGIC: [u8; 4] = *b"WIA\x01";

const HEADER_1_LEN: usize = 0x48;
const HEADER_1_HASHED_LEN: usize = 0x34;
const HEADER_2_MIN_LEN: usize = 0xDC;
const DISC_HEADER_LEN: usize = 0x80;
const PARTITION_ENTRY_LEN: u32 = 0x30;
const RAW_DATA_ENTRY_LEN: usize = 0x18;
const GROUP_ENTRY_LEN_RVZ: usize = 0xC;
const GROUP_ENTRY_LEN_WIA: usize = 0x8;

const SECTOR_SIZE: u64 = 0x8000;
const MAX_CHUNK_SIZE: u32 = 0x0800_0000;
const DISC_TYPE_WII: u32 = 2;

const RVZ_VERSION: u32 = 0x0100_0000;
const RVZ_READ_COMPATIBLE: u32 = 0x0003_0000;
const WIA_VERSION: u32 = 0x0100_0000;
const WIA_READ_COMPATIBLE: u32 = 0x0008_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WiaCompression {
    None,
    Purge,
    Bzip2,
    Lzma,
    Lzma2,
    Zstd,
}

impl WiaCompression {
    fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Self::None),
            1 => Ok(Self::Purge),
            2 => Ok(Self::Bzip2),
            3 => Ok(Self::Lzma),
            4 => Ok(Self::Lzma2),
            5 => Ok(Self::Zstd),
            other => Err(FormatError::invalid(
                "rvz header",
                format!("unknown compression method {other}"),
            )),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Purge => "purge",
            Self::Bzip2 => "bzip2",
            Self::Lzma => "lzma",
            Self::Lzma2 => "lzma2",
            Self::Zstd => "zstd",
        }
    }
}

#[derive(Debug)]
struct Header1 {
    is_rvz: bool,
    header_2_size: u32,
    header_2_hash: [u8; 20],
    iso_file_size: u64,
    wia_file_size: u64,
}

#[derive(Debug)]
struct Header2 {
    disc_type: u32,
    compression: WiaCompression,
    chunk_size: u32,
    disc_header: [u8; DISC_HEADER_LEN],
    num_partition_entries: u32,
    partition_entry_size: u32,
    partition_entries_offset: u64,
    partition_entries_hash: [u8; 20],
    num_raw_data: u32,
    raw_data_offset: u64,
    raw_data_size: u32,
    num_group_entries: u32,
    group_entries_offset: u64,
    group_entries_size: u32,
}

#[derive(Debug, Clone, Copy)]
struct GroupEntry {
    data_offset: u32,
    data_size: u32,
    rvz_packed_size: u32,
}

/// A contiguous span of disc bytes backed by a window of group entries.
#[derive(Debug, Clone, Copy)]
struct OutputRange {
    offset: u64,
    size: u64,
    group_index: u32,
    num_groups: u32,
}

/// Decode an RVZ or WIA image into a fresh temp file.
///
/// The returned [`TempPath`] removes the file when dropped. `progress`
/// receives `(bytes_done, total_bytes)` after every group.
pub fn decode_to_temp(
    path: &Path,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<TempPath> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let mut raw_h1 = [0u8; HEADER_1_LEN];
    file.read_exact(&mut raw_h1)?;
    let header_1 = parse_header_1(&raw_h1)?;
    if header_1.wia_file_size != file_len {
        return Err(FormatError::invalid(
            "rvz header",
            format!(
                "container size {} declared, file is {file_len}",
                header_1.wia_file_size
            ),
        ));
    }

    let h2_len = header_1.header_2_size as usize;
    if h2_len < HEADER_2_MIN_LEN {
        return Err(FormatError::invalid(
            "rvz header",
            format!("second header is {h2_len} bytes, expected at least {HEADER_2_MIN_LEN}"),
        ));
    }
    let raw_h2 = read_exact_at(&mut file, HEADER_1_LEN as u64, h2_len, file_len, "rvz header")?;
    if Sha1::digest(&raw_h2).as_slice() != header_1.header_2_hash {
        return Err(FormatError::Checksum("rvz second header"));
    }
    let header_2 = parse_header_2(&raw_h2)?;

    match header_2.compression {
        WiaCompression::Bzip2 | WiaCompression::Lzma | WiaCompression::Lzma2 => {
            return Err(FormatError::Unsupported(format!(
                "rvz compression method {}",
                header_2.compression.name()
            )));
        }
        _ => {}
    }
    let codec = zstd_backend();

    let partitions = read_partition_spans(&mut file, &header_2, file_len)?;
    if header_2.disc_type == DISC_TYPE_WII && !partitions.is_empty() {
        return Err(FormatError::Unsupported(
            "wii partition reconstruction".to_string(),
        ));
    }

    let raw_ranges = read_raw_data_ranges(&mut file, &header_2, codec.as_ref(), file_len)?;
    let groups = read_group_entries(
        &mut file,
        &header_2,
        header_1.is_rvz,
        codec.as_ref(),
        file_len,
    )?;

    let iso_size = header_1.iso_file_size;
    let chunk = header_2.chunk_size as u64;
    let ranges = assemble_ranges(partitions, raw_ranges, &groups, chunk, iso_size)?;

    let mut tmp = NamedTempFile::new()?;
    tmp.as_file().set_len(iso_size)?;

    let header_prefix = (iso_size as usize).min(DISC_HEADER_LEN);
    tmp.write_all(&header_2.disc_header[..header_prefix])?;

    for range in &ranges {
        decode_range(
            &mut file,
            file_len,
            tmp.as_file_mut(),
            range,
            &groups,
            &header_2,
            header_1.is_rvz,
            codec.as_ref(),
            iso_size,
            cancel,
            progress,
        )?;
    }

    tmp.flush()?;
    Ok(tmp.into_temp_path())
}

fn parse_header_1(buf: &[u8; HEADER_1_LEN]) -> Result<Header1> {
    let is_rvz = match &buf[0..4] {
        m if m == RVZ_MAGIC => true,
        m if m == WIA_MAGIC => false,
        other => {
            return Err(FormatError::invalid(
                "rvz header",
                format!("bad magic {other:02x?}"),
            ));
        }
    };

    let mut expected_hash = [0u8; 20];
    expected_hash.copy_from_slice(&buf[0x34..HEADER_1_LEN]);
    if Sha1::digest(&buf[..HEADER_1_HASHED_LEN]).as_slice() != expected_hash {
        return Err(FormatError::Checksum("rvz first header"));
    }

    let version = slice_u32_be(buf, 0x04, "rvz header")?;
    let version_compatible = slice_u32_be(buf, 0x08, "rvz header")?;
    let (current, read_compatible) = if is_rvz {
        (RVZ_VERSION, RVZ_READ_COMPATIBLE)
    } else {
        (WIA_VERSION, WIA_READ_COMPATIBLE)
    };
    if version < read_compatible || version_compatible > current {
        return Err(FormatError::Unsupported(format!(
            "rvz version {version:#010x} (compatible {version_compatible:#010x})"
        )));
    }

    let mut header_2_hash = [0u8; 20];
    header_2_hash.copy_from_slice(&buf[0x10..0x24]);

    Ok(Header1 {
        is_rvz,
        header_2_size: slice_u32_be(buf, 0x0C, "rvz header")?,
        header_2_hash,
        iso_file_size: slice_u64_be(buf, 0x24, "rvz header")?,
        wia_file_size: slice_u64_be(buf, 0x2C, "rvz header")?,
    })
}

fn parse_header_2(buf: &[u8]) -> Result<Header2> {
    let what = "rvz second header";
    if buf.len() < HEADER_2_MIN_LEN {
        return Err(FormatError::invalid(
            what,
            format!("{} bytes, expected at least {HEADER_2_MIN_LEN}", buf.len()),
        ));
    }
    let compression = WiaCompression::from_raw(slice_u32_be(buf, 0x04, what)?)?;

    let chunk_size = slice_u32_be(buf, 0x0C, what)?;
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(FormatError::invalid(
            what,
            format!("chunk size {chunk_size} out of range"),
        ));
    }

    let mut disc_header = [0u8; DISC_HEADER_LEN];
    disc_header.copy_from_slice(&buf[0x10..0x10 + DISC_HEADER_LEN]);
    let mut partition_entries_hash = [0u8; 20];
    partition_entries_hash.copy_from_slice(&buf[0xA0..0xB4]);

    let compressor_data_len = buf[0xD4];
    if compressor_data_len > 7 {
        return Err(FormatError::invalid(
            what,
            format!("compressor data length {compressor_data_len}"),
        ));
    }

    Ok(Header2 {
        disc_type: slice_u32_be(buf, 0x00, what)?,
        compression,
        chunk_size,
        disc_header,
        num_partition_entries: slice_u32_be(buf, 0x90, what)?,
        partition_entry_size: slice_u32_be(buf, 0x94, what)?,
        partition_entries_offset: slice_u64_be(buf, 0x98, what)?,
        partition_entries_hash,
        num_raw_data: slice_u32_be(buf, 0xB4, what)?,
        raw_data_offset: slice_u64_be(buf, 0xB8, what)?,
        raw_data_size: slice_u32_be(buf, 0xC0, what)?,
        num_group_entries: slice_u32_be(buf, 0xC4, what)?,
        group_entries_offset: slice_u64_be(buf, 0xC8, what)?,
        group_entries_size: slice_u32_be(buf, 0xD0, what)?,
    })
}

/// Partition table entries, flattened to their data spans. The table is
/// stored plain with its own SHA-1.
fn read_partition_spans(
    file: &mut File,
    header_2: &Header2,
    file_len: u64,
) -> Result<Vec<OutputRange>> {
    let count = header_2.num_partition_entries as usize;
    if count == 0 {
        return Ok(Vec::new());
    }
    if header_2.partition_entry_size != PARTITION_ENTRY_LEN {
        return Err(FormatError::invalid(
            "rvz partition table",
            format!("entry size {}", header_2.partition_entry_size),
        ));
    }

    let table_len = count * PARTITION_ENTRY_LEN as usize;
    let raw = read_exact_at(
        file,
        header_2.partition_entries_offset,
        table_len,
        file_len,
        "rvz partition table",
    )?;
    if Sha1::digest(&raw).as_slice() != header_2.partition_entries_hash {
        return Err(FormatError::Checksum("rvz partition table"));
    }

    let mut spans = Vec::new();
    for i in 0..count {
        let entry = i * PARTITION_ENTRY_LEN as usize;
        // 16-byte partition key, then two data spans.
        for span in 0..2 {
            let base = entry + 16 + span * 16;
            let first_sector = slice_u32_be(&raw, base, "rvz partition table")?;
            let num_sectors = slice_u32_be(&raw, base + 4, "rvz partition table")?;
            if num_sectors == 0 {
                continue;
            }
            spans.push(OutputRange {
                offset: first_sector as u64 * SECTOR_SIZE,
                size: num_sectors as u64 * SECTOR_SIZE,
                group_index: slice_u32_be(&raw, base + 8, "rvz partition table")?,
                num_groups: slice_u32_be(&raw, base + 12, "rvz partition table")?,
            });
        }
    }
    Ok(spans)
}

fn read_raw_data_ranges(
    file: &mut File,
    header_2: &Header2,
    codec: &dyn CodecBackend,
    file_len: u64,
) -> Result<Vec<OutputRange>> {
    let count = header_2.num_raw_data as usize;
    if count == 0 {
        return Ok(Vec::new());
    }

    let expected = count * RAW_DATA_ENTRY_LEN;
    let raw = read_exact_at(
        file,
        header_2.raw_data_offset,
        header_2.raw_data_size as usize,
        file_len,
        "rvz raw data table",
    )?;
    let table = decompress_blob(raw, expected, header_2.compression, codec, "rvz raw data table")?;
    if table.len() != expected {
        return Err(FormatError::invalid(
            "rvz raw data table",
            format!("{} bytes decoded, expected {expected}", table.len()),
        ));
    }

    let mut ranges = Vec::with_capacity(count);
    for i in 0..count {
        let base = i * RAW_DATA_ENTRY_LEN;
        let size = slice_u64_be(&table, base + 8, "rvz raw data table")?;
        if size == 0 {
            continue;
        }
        ranges.push(OutputRange {
            offset: slice_u64_be(&table, base, "rvz raw data table")?,
            size,
            group_index: slice_u32_be(&table, base + 16, "rvz raw data table")?,
            num_groups: slice_u32_be(&table, base + 20, "rvz raw data table")?,
        });
    }
    Ok(ranges)
}

fn read_group_entries(
    file: &mut File,
    header_2: &Header2,
    is_rvz: bool,
    codec: &dyn CodecBackend,
    file_len: u64,
) -> Result<Vec<GroupEntry>> {
    let count = header_2.num_group_entries as usize;
    let entry_len = if is_rvz {
        GROUP_ENTRY_LEN_RVZ
    } else {
        GROUP_ENTRY_LEN_WIA
    };
    let expected = count * entry_len;

    let raw = read_exact_at(
        file,
        header_2.group_entries_offset,
        header_2.group_entries_size as usize,
        file_len,
        "rvz group table",
    )?;
    let table = decompress_blob(raw, expected, header_2.compression, codec, "rvz group table")?;
    if table.len() != expected {
        return Err(FormatError::invalid(
            "rvz group table",
            format!("{} bytes decoded, expected {expected}", table.len()),
        ));
    }

    let mut groups = Vec::with_capacity(count);
    for i in 0..count {
        let base = i * entry_len;
        groups.push(GroupEntry {
            data_offset: slice_u32_be(&table, base, "rvz group table")?,
            data_size: slice_u32_be(&table, base + 4, "rvz group table")?,
            rvz_packed_size: if is_rvz {
                slice_u32_be(&table, base + 8, "rvz group table")?
            } else {
                0
            },
        });
    }
    Ok(groups)
}

/// Merge partition and raw-data spans into one ascending, non-overlapping
/// plan, checking every range's group window against the group table.
fn assemble_ranges(
    partitions: Vec<OutputRange>,
    raw: Vec<OutputRange>,
    groups: &[GroupEntry],
    chunk: u64,
    iso_size: u64,
) -> Result<Vec<OutputRange>> {
    let mut ranges = partitions;
    ranges.extend(raw);
    ranges.sort_by_key(|r| r.offset);

    let mut prev_end = iso_size.min(DISC_HEADER_LEN as u64);
    for range in &ranges {
        let end = range.offset.checked_add(range.size).ok_or_else(|| {
            FormatError::invalid("rvz layout", format!("range at {:#x} overflows", range.offset))
        })?;
        if end > iso_size {
            return Err(FormatError::invalid(
                "rvz layout",
                format!("range {:#x}..{end:#x} exceeds disc size {iso_size:#x}", range.offset),
            ));
        }
        if range.offset < prev_end && range.offset >= DISC_HEADER_LEN as u64 {
            return Err(FormatError::invalid(
                "rvz layout",
                format!("range at {:#x} overlaps previous data", range.offset),
            ));
        }
        if range.offset > prev_end {
            debug!(
                "rvz: {} bytes at {prev_end:#x} not covered, zero-filled",
                range.offset - prev_end
            );
        }

        let aligned_start = range.offset - range.offset % SECTOR_SIZE;
        let span = end - aligned_start;
        let needed_groups = span.div_ceil(chunk);
        if needed_groups != range.num_groups as u64 {
            return Err(FormatError::invalid(
                "rvz layout",
                format!(
                    "range at {:#x} declares {} groups, tiling needs {needed_groups}",
                    range.offset, range.num_groups
                ),
            ));
        }
        let window_end = range.group_index as u64 + range.num_groups as u64;
        if window_end > groups.len() as u64 {
            return Err(FormatError::invalid(
                "rvz layout",
                format!("range at {:#x} references groups past the table", range.offset),
            ));
        }

        prev_end = end.max(prev_end);
    }
    Ok(ranges)
}

#[allow(clippy::too_many_arguments)]
fn decode_range(
    file: &mut File,
    file_len: u64,
    out: &mut File,
    range: &OutputRange,
    groups: &[GroupEntry],
    header_2: &Header2,
    is_rvz: bool,
    codec: &dyn CodecBackend,
    iso_size: u64,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<()> {
    let chunk = header_2.chunk_size as u64;
    let aligned_start = range.offset - range.offset % SECTOR_SIZE;
    let data_end = range.offset + range.size;

    for g in 0..range.num_groups as u64 {
        if cancel.is_cancelled() {
            return Err(FormatError::Cancelled);
        }

        let group_start = aligned_start + g * chunk;
        let span_end = (group_start + chunk).min(data_end);
        let capacity = (span_end - group_start) as usize;
        let entry = groups[range.group_index as usize + g as usize];

        if entry.data_size == 0 {
            // All-zero group; the sparse output already reads as zeroes.
            progress(span_end, iso_size);
            continue;
        }

        let (stored_len, compressed) = if is_rvz {
            (
                (entry.data_size & 0x7FFF_FFFF) as usize,
                entry.data_size & 0x8000_0000 != 0,
            )
        } else {
            (
                entry.data_size as usize,
                header_2.compression != WiaCompression::None,
            )
        };
        if compressed && header_2.compression == WiaCompression::None {
            return Err(FormatError::invalid(
                "rvz group",
                "compressed flag set but no compression method declared".to_string(),
            ));
        }

        let stored_offset = entry.data_offset as u64 * 4;
        let raw = read_exact_at(file, stored_offset, stored_len, file_len, "rvz group")?;

        let packed_len = entry.rvz_packed_size as usize;
        let intermediate_len = if packed_len != 0 { packed_len } else { capacity };
        let data = if compressed {
            decompress_blob(raw, intermediate_len, header_2.compression, codec, "rvz group")?
        } else {
            raw
        };

        let payload = if packed_len != 0 {
            rvz_unpack(&data, group_start, capacity)?
        } else {
            if data.len() > capacity {
                return Err(FormatError::invalid(
                    "rvz group",
                    format!("{} bytes for a {capacity}-byte group", data.len()),
                ));
            }
            data
        };

        // Group 0 may start before the range due to sector alignment; those
        // leading bytes are filler and never written.
        let write_start = group_start.max(range.offset);
        let skip = (write_start - group_start) as usize;
        if skip < payload.len() {
            out.seek(SeekFrom::Start(write_start))?;
            out.write_all(&payload[skip..])?;
        }

        progress(span_end, iso_size);
    }
    Ok(())
}

fn read_exact_at(
    file: &mut File,
    offset: u64,
    len: usize,
    file_len: u64,
    what: &'static str,
) -> Result<Vec<u8>> {
    let end = offset
        .checked_add(len as u64)
        .ok_or_else(|| FormatError::invalid(what, "offset overflow".to_string()))?;
    if end > file_len {
        return Err(FormatError::invalid(
            what,
            format!("{len} bytes at {offset:#x} extend past end of file"),
        ));
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Decode a stored blob with the file's compression method. Output is at
/// most `expected` bytes; producers may trim trailing zeroes.
fn decompress_blob(
    data: Vec<u8>,
    expected: usize,
    method: WiaCompression,
    codec: &dyn CodecBackend,
    what: &'static str,
) -> Result<Vec<u8>> {
    match method {
        WiaCompression::None => {
            if data.len() > expected {
                return Err(FormatError::invalid(
                    what,
                    format!("{} bytes stored, at most {expected} expected", data.len()),
                ));
            }
            Ok(data)
        }
        WiaCompression::Purge => purge_decode(&data, expected),
        WiaCompression::Zstd => codec.decompress(&data, expected),
        WiaCompression::Bzip2 | WiaCompression::Lzma | WiaCompression::Lzma2 => {
            Err(FormatError::Unsupported(format!(
                "rvz compression method {}",
                method.name()
            )))
        }
    }
}

/// Decode a purge stream: `{offset u32 BE, size u32 BE, bytes}` segments
/// over an implicit zero canvas, with a trailing SHA-1 of everything before
/// it.
fn purge_decode(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    if data.len() < 20 {
        return Err(FormatError::invalid(
            "rvz purge stream",
            format!("{} bytes, no room for the checksum", data.len()),
        ));
    }
    let (body, stored_hash) = data.split_at(data.len() - 20);
    if Sha1::digest(body).as_slice() != stored_hash {
        return Err(FormatError::Checksum("rvz purge stream"));
    }

    let mut out = vec![0u8; expected];
    let mut pos = 0usize;
    while pos < body.len() {
        let offset = slice_u32_be(body, pos, "rvz purge stream")? as usize;
        let size = slice_u32_be(body, pos + 4, "rvz purge stream")? as usize;
        pos += 8;
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= expected)
            .ok_or_else(|| {
                FormatError::invalid(
                    "rvz purge stream",
                    format!("segment {offset}+{size} outside {expected}-byte output"),
                )
            })?;
        if pos + size > body.len() {
            return Err(FormatError::invalid(
                "rvz purge stream",
                "truncated segment data".to_string(),
            ));
        }
        out[offset..end].copy_from_slice(&body[pos..pos + size]);
        pos += size;
    }
    Ok(out)
}

/// Expand an RVZ-packed stream. Each segment is a u32 BE length; the top
/// bit marks a junk run whose bytes come from the lagged Fibonacci
/// generator, reseeded from the 17 words that follow and advanced to the
/// run's offset within its sector.
fn rvz_unpack(packed: &[u8], base_offset: u64, max_out: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(max_out);
    let mut pos = 0usize;

    while pos < packed.len() {
        let size_word = slice_u32_be(packed, pos, "rvz packed stream")?;
        pos += 4;
        let run_len = (size_word & 0x7FFF_FFFF) as usize;
        if run_len == 0 {
            return Err(FormatError::invalid(
                "rvz packed stream",
                "zero-length segment".to_string(),
            ));
        }
        if out.len() + run_len > max_out {
            return Err(FormatError::invalid(
                "rvz packed stream",
                format!("segment overflows {max_out}-byte group"),
            ));
        }

        if size_word & 0x8000_0000 != 0 {
            let mut seed = [0u32; SEED_SIZE];
            for word in seed.iter_mut() {
                *word = slice_u32_be(packed, pos, "rvz junk seed")?;
                pos += 4;
            }
            let mut generator = LaggedFibonacci::from_seed(&seed);
            generator.skip(((base_offset + out.len() as u64) % SECTOR_SIZE) as usize);
            let start = out.len();
            out.resize(start + run_len, 0);
            generator.fill(&mut out[start..]);
        } else {
            if pos + run_len > packed.len() {
                return Err(FormatError::invalid(
                    "rvz packed stream",
                    "truncated literal segment".to_string(),
                ));
            }
            out.extend_from_slice(&packed[pos..pos + run_len]);
            pos += run_len;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_header_1(
        magic: [u8; 4],
        version: u32,
        compatible: u32,
        iso_size: u64,
        wia_size: u64,
    ) -> [u8; HEADER_1_LEN] {
        let mut out = [0u8; HEADER_1_LEN];
        out[0..4].copy_from_slice(&magic);
        out[0x04..0x08].copy_from_slice(&version.to_be_bytes());
        out[0x08..0x0C].copy_from_slice(&compatible.to_be_bytes());
        out[0x0C..0x10].copy_from_slice(&(HEADER_2_MIN_LEN as u32).to_be_bytes());
        // header_2_hash left zeroed; parse_header_1 does not check it.
        out[0x24..0x2C].copy_from_slice(&iso_size.to_be_bytes());
        out[0x2C..0x34].copy_from_slice(&wia_size.to_be_bytes());
        let digest = Sha1::digest(&out[..HEADER_1_HASHED_LEN]);
        out[0x34..HEADER_1_LEN].copy_from_slice(&digest);
        out
    }

    #[test]
    fn test_header_1_parses_rvz_and_wia() {
        let rvz = build_header_1(RVZ_MAGIC, RVZ_VERSION, RVZ_READ_COMPATIBLE, 100, 50);
        let parsed = parse_header_1(&rvz).unwrap();
        assert!(parsed.is_rvz);
        assert_eq!(parsed.iso_file_size, 100);
        assert_eq!(parsed.wia_file_size, 50);

        let wia = build_header_1(WIA_MAGIC, WIA_VERSION, WIA_READ_COMPATIBLE, 100, 50);
        assert!(!parse_header_1(&wia).unwrap().is_rvz);
    }

    #[test]
    fn test_header_1_rejects_bad_magic() {
        let header = build_header_1(*b"ISO\x01", RVZ_VERSION, RVZ_READ_COMPATIBLE, 0, 0);
        assert!(matches!(
            parse_header_1(&header),
            Err(FormatError::Invalid { .. })
        ));
    }

    #[test]
    fn test_header_1_rejects_corrupt_hash() {
        let mut header = build_header_1(RVZ_MAGIC, RVZ_VERSION, RVZ_READ_COMPATIBLE, 0, 0);
        header[0x20] ^= 0xFF;
        assert!(matches!(
            parse_header_1(&header),
            Err(FormatError::Checksum(_))
        ));
    }

    #[test]
    fn test_header_1_rejects_future_version() {
        let header = build_header_1(RVZ_MAGIC, 0x0200_0000, 0x0200_0000, 0, 0);
        assert!(matches!(
            parse_header_1(&header),
            Err(FormatError::Unsupported(_))
        ));
    }

    #[test]
    fn test_purge_decode_places_segments_and_zero_fills() {
        let mut body = Vec::new();
        body.extend_from_slice(&4u32.to_be_bytes());
        body.extend_from_slice(&3u32.to_be_bytes());
        body.extend_from_slice(b"abc");
        body.extend_from_slice(&10u32.to_be_bytes());
        body.extend_from_slice(&2u32.to_be_bytes());
        body.extend_from_slice(b"xy");
        let mut stream = body.clone();
        stream.extend_from_slice(&Sha1::digest(&body));

        let out = purge_decode(&stream, 16).unwrap();
        assert_eq!(&out[..4], &[0, 0, 0, 0]);
        assert_eq!(&out[4..7], b"abc");
        assert_eq!(&out[7..10], &[0, 0, 0]);
        assert_eq!(&out[10..12], b"xy");
        assert_eq!(&out[12..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_purge_decode_rejects_bad_hash() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&1u32.to_be_bytes());
        body.push(b'z');
        let mut stream = body.clone();
        stream.extend_from_slice(&Sha1::digest(&body));
        stream[0] ^= 1;
        assert!(matches!(
            purge_decode(&stream, 8),
            Err(FormatError::Checksum(_))
        ));
    }

    #[test]
    fn test_purge_decode_rejects_out_of_bounds_segment() {
        let mut body = Vec::new();
        body.extend_from_slice(&6u32.to_be_bytes());
        body.extend_from_slice(&4u32.to_be_bytes());
        body.extend_from_slice(b"1234");
        let mut stream = body.clone();
        stream.extend_from_slice(&Sha1::digest(&body));
        assert!(purge_decode(&stream, 8).is_err());
    }

    fn junk_seed_words() -> [u32; SEED_SIZE] {
        let mut words = [0u32; SEED_SIZE];
        for (i, word) in words.iter_mut().enumerate() {
            *word = (i as u32 + 1) * 0x0101_0101;
        }
        words
    }

    #[test]
    fn test_unpack_literal_then_junk_is_deterministic() {
        let mut packed = Vec::new();
        packed.extend_from_slice(&5u32.to_be_bytes());
        packed.extend_from_slice(b"hello");
        packed.extend_from_slice(&(0x8000_0000u32 | 100).to_be_bytes());
        for word in junk_seed_words() {
            packed.extend_from_slice(&word.to_be_bytes());
        }

        let first = rvz_unpack(&packed, 0x18000, 4096).unwrap();
        let second = rvz_unpack(&packed, 0x18000, 4096).unwrap();
        assert_eq!(first.len(), 105);
        assert_eq!(&first[..5], b"hello");
        assert_eq!(first, second);

        // A different disc offset changes where the generator starts.
        let elsewhere = rvz_unpack(&packed, 0x18000 + 64, 4096).unwrap();
        assert_ne!(first[5..], elsewhere[5..]);
    }

    #[test]
    fn test_unpack_rejects_group_overflow() {
        let mut packed = Vec::new();
        packed.extend_from_slice(&32u32.to_be_bytes());
        packed.extend_from_slice(&[0u8; 32]);
        assert!(rvz_unpack(&packed, 0, 16).is_err());
    }

    #[test]
    fn test_unpack_rejects_truncated_literal() {
        let mut packed = Vec::new();
        packed.extend_from_slice(&32u32.to_be_bytes());
        packed.extend_from_slice(&[0u8; 8]);
        assert!(rvz_unpack(&packed, 0, 64).is_err());
    }

    #[test]
    fn test_assemble_rejects_overlap() {
        let groups = vec![
            GroupEntry {
                data_offset: 0,
                data_size: 0,
                rvz_packed_size: 0,
            };
            4
        ];
        let ranges = vec![
            OutputRange {
                offset: 0x8000,
                size: 0x8000,
                group_index: 0,
                num_groups: 2,
            },
            OutputRange {
                offset: 0xC000,
                size: 0x8000,
                group_index: 2,
                num_groups: 2,
            },
        ];
        let result = assemble_ranges(Vec::new(), ranges, &groups, 0x4000, 0x2_0000);
        assert!(matches!(result, Err(FormatError::Invalid { .. })));
    }

    #[test]
    fn test_assemble_rejects_group_count_mismatch() {
        let groups = vec![
            GroupEntry {
                data_offset: 0,
                data_size: 0,
                rvz_packed_size: 0,
            };
            8
        ];
        let ranges = vec![OutputRange {
            offset: 0x8000,
            size: 0x10000,
            group_index: 0,
            num_groups: 1,
        }];
        let result = assemble_ranges(Vec::new(), ranges, &groups, 0x8000, 0x2_0000);
        assert!(matches!(result, Err(FormatError::Invalid { .. })));
    }

    #[test]
    fn test_assemble_rejects_forged_near_max_disc_size() {
        let groups = vec![
            GroupEntry {
                data_offset: 0,
                data_size: 0,
                rvz_packed_size: 0,
            };
            4
        ];
        // Tiling a span this long must fail the group-count check, not
        // overflow while counting groups.
        let ranges = vec![OutputRange {
            offset: 0x100,
            size: u64::MAX - 0x100,
            group_index: 0,
            num_groups: 4,
        }];
        let result = assemble_ranges(Vec::new(), ranges, &groups, 0x8000, u64::MAX);
        assert!(matches!(result, Err(FormatError::Invalid { .. })));
    }

    struct RvzFixture {
        data: Vec<u8>,
        seed: [u32; SEED_SIZE],
        group0: Vec<u8>,
        iso_size: u64,
    }

    /// Recompute both header hashes and the container size after the file
    /// bytes change.
    fn refresh_headers(data: &mut [u8]) {
        let h2_digest = Sha1::digest(&data[HEADER_1_LEN..HEADER_1_LEN + HEADER_2_MIN_LEN]);
        data[0x10..0x24].copy_from_slice(&h2_digest);
        let len = data.len() as u64;
        data[0x2C..0x34].copy_from_slice(&len.to_be_bytes());
        let h1_digest = Sha1::digest(&data[..HEADER_1_HASHED_LEN]);
        data[0x34..HEADER_1_LEN].copy_from_slice(&h1_digest);
    }

    /// A complete three-sector RVZ with no compression: one plain group,
    /// one junk-packed group, one all-zero group.
    fn build_plain_rvz() -> RvzFixture {
        let iso_size = 3 * SECTOR_SIZE;
        let sector = SECTOR_SIZE as usize;

        let disc_header: [u8; DISC_HEADER_LEN] =
            std::array::from_fn(|i| (i as u8).wrapping_mul(3) ^ 0x5A);
        let mut group0 = vec![0u8; sector];
        for (i, byte) in group0.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(7).wrapping_add(1);
        }
        group0[..DISC_HEADER_LEN].copy_from_slice(&disc_header);

        let seed = junk_seed_words();
        let mut packed = Vec::new();
        packed.extend_from_slice(&(0x8000_0000u32 | SECTOR_SIZE as u32).to_be_bytes());
        for word in seed {
            packed.extend_from_slice(&word.to_be_bytes());
        }

        let raw_table_offset = (HEADER_1_LEN + HEADER_2_MIN_LEN) as u64;
        let group_table_offset = raw_table_offset + RAW_DATA_ENTRY_LEN as u64;
        let group0_offset = group_table_offset + 3 * GROUP_ENTRY_LEN_RVZ as u64;
        let group1_offset = group0_offset + group0.len() as u64;

        let mut h2 = vec![0u8; HEADER_2_MIN_LEN];
        h2[0x00..0x04].copy_from_slice(&1u32.to_be_bytes());
        h2[0x0C..0x10].copy_from_slice(&(SECTOR_SIZE as u32).to_be_bytes());
        h2[0x10..0x10 + DISC_HEADER_LEN].copy_from_slice(&disc_header);
        h2[0x94..0x98].copy_from_slice(&PARTITION_ENTRY_LEN.to_be_bytes());
        h2[0xB4..0xB8].copy_from_slice(&1u32.to_be_bytes());
        h2[0xB8..0xC0].copy_from_slice(&raw_table_offset.to_be_bytes());
        h2[0xC0..0xC4].copy_from_slice(&(RAW_DATA_ENTRY_LEN as u32).to_be_bytes());
        h2[0xC4..0xC8].copy_from_slice(&3u32.to_be_bytes());
        h2[0xC8..0xD0].copy_from_slice(&group_table_offset.to_be_bytes());
        h2[0xD0..0xD4].copy_from_slice(&(3 * GROUP_ENTRY_LEN_RVZ as u32).to_be_bytes());

        let range_offset = DISC_HEADER_LEN as u64;
        let mut raw_entry = [0u8; RAW_DATA_ENTRY_LEN];
        raw_entry[0..8].copy_from_slice(&range_offset.to_be_bytes());
        raw_entry[8..16].copy_from_slice(&(iso_size - range_offset).to_be_bytes());
        raw_entry[20..24].copy_from_slice(&3u32.to_be_bytes());

        let mut group_table = Vec::new();
        group_table.extend_from_slice(&((group0_offset / 4) as u32).to_be_bytes());
        group_table.extend_from_slice(&(group0.len() as u32).to_be_bytes());
        group_table.extend_from_slice(&0u32.to_be_bytes());
        group_table.extend_from_slice(&((group1_offset / 4) as u32).to_be_bytes());
        group_table.extend_from_slice(&(packed.len() as u32).to_be_bytes());
        group_table.extend_from_slice(&(packed.len() as u32).to_be_bytes());
        group_table.extend_from_slice(&[0u8; GROUP_ENTRY_LEN_RVZ]);

        let mut data = vec![0u8; HEADER_1_LEN];
        data.extend_from_slice(&h2);
        data.extend_from_slice(&raw_entry);
        data.extend_from_slice(&group_table);
        data.extend_from_slice(&group0);
        data.extend_from_slice(&packed);

        data[0..4].copy_from_slice(&RVZ_MAGIC);
        data[0x04..0x08].copy_from_slice(&RVZ_VERSION.to_be_bytes());
        data[0x08..0x0C].copy_from_slice(&RVZ_READ_COMPATIBLE.to_be_bytes());
        data[0x0C..0x10].copy_from_slice(&(HEADER_2_MIN_LEN as u32).to_be_bytes());
        data[0x24..0x2C].copy_from_slice(&iso_size.to_be_bytes());
        refresh_headers(&mut data);

        RvzFixture {
            data,
            seed,
            group0,
            iso_size,
        }
    }

    fn write_rvz(data: &[u8]) -> tempfile::NamedTempFile {
        let mut temp = tempfile::Builder::new().suffix(".rvz").tempfile().unwrap();
        temp.write_all(data).unwrap();
        temp.flush().unwrap();
        temp
    }

    #[test]
    fn test_decode_plain_rvz_end_to_end() {
        let fixture = build_plain_rvz();
        let temp = write_rvz(&fixture.data);

        let mut updates = Vec::new();
        let decoded_path = decode_to_temp(temp.path(), &CancelToken::new(), &mut |done, total| {
            updates.push((done, total));
        })
        .unwrap();
        let decoded = std::fs::read(&decoded_path).unwrap();

        let sector = SECTOR_SIZE as usize;
        let mut expected = vec![0u8; fixture.iso_size as usize];
        expected[..sector].copy_from_slice(&fixture.group0);
        let mut generator = LaggedFibonacci::from_seed(&fixture.seed);
        generator.fill(&mut expected[sector..2 * sector]);

        assert_eq!(decoded.len(), expected.len());
        assert!(decoded == expected, "decoded bytes differ from the source image");
        assert_eq!(updates.last(), Some(&(fixture.iso_size, fixture.iso_size)));
    }

    #[test]
    fn test_decode_rejects_tampered_second_header() {
        let mut data = build_plain_rvz().data;
        data[HEADER_1_LEN + 0x0E] ^= 1;
        let temp = write_rvz(&data);
        assert!(matches!(
            decode_to_temp(temp.path(), &CancelToken::new(), &mut |_, _| {}),
            Err(FormatError::Checksum(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_container_size() {
        let mut data = build_plain_rvz().data;
        data.push(0);
        let temp = write_rvz(&data);
        assert!(matches!(
            decode_to_temp(temp.path(), &CancelToken::new(), &mut |_, _| {}),
            Err(FormatError::Invalid { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_wii_with_partitions() {
        let fixture = build_plain_rvz();
        let mut data = fixture.data;
        // disc_type = Wii.
        data[HEADER_1_LEN + 0x03] = 2;

        let table_offset = data.len() as u64;
        let mut entry = [0u8; PARTITION_ENTRY_LEN as usize];
        entry[16..20].copy_from_slice(&1u32.to_be_bytes());
        entry[20..24].copy_from_slice(&1u32.to_be_bytes());
        entry[28..32].copy_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&entry);

        let h2 = HEADER_1_LEN;
        data[h2 + 0x90..h2 + 0x94].copy_from_slice(&1u32.to_be_bytes());
        data[h2 + 0x98..h2 + 0xA0].copy_from_slice(&table_offset.to_be_bytes());
        let table_hash = Sha1::digest(&entry);
        data[h2 + 0xA0..h2 + 0xB4].copy_from_slice(&table_hash);
        refresh_headers(&mut data);

        let temp = write_rvz(&data);
        assert!(matches!(
            decode_to_temp(temp.path(), &CancelToken::new(), &mut |_, _| {}),
            Err(FormatError::Unsupported(_))
        ));
    }

    #[test]
    fn test_decode_honors_cancellation() {
        let fixture = build_plain_rvz();
        let temp = write_rvz(&fixture.data);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            decode_to_temp(temp.path(), &cancel, &mut |_, _| {}),
            Err(FormatError::Cancelled)
        ));
    }
}
