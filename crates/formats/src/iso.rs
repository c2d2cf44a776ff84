//! Minimal read-only ISO9660 access.
//!
//! Just enough of the filesystem to pull named files out of a disc image:
//! the primary volume descriptor, directory extent iteration, and path
//! lookup. Mastering tools disagree on identifier case and on the `;1`
//! version suffix, so each path component is resolved exact first, then
//! case-insensitive, then with the version suffix appended.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{FormatError, Result};

const SECTOR_SIZE: u64 = 2048;
const PVD_SECTOR: u64 = 16;
const PVD_ROOT_RECORD_OFFSET: usize = 156;
const DIR_RECORD_FIXED_LEN: usize = 33;

/// Directories are read whole; anything past this is not a directory.
const MAX_DIR_BYTES: u32 = 4 * 1024 * 1024;
/// Refuse to pull absurdly large single files into memory.
const MAX_FILE_BYTES: u32 = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
struct DirRecord {
    name: String,
    extent: u32,
    size: u32,
    is_dir: bool,
}

pub struct IsoReader<R> {
    reader: R,
    root: DirRecord,
}

impl IsoReader<File> {
    pub fn open(path: &Path) -> Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> IsoReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let mut pvd = vec![0u8; SECTOR_SIZE as usize];
        reader.seek(SeekFrom::Start(PVD_SECTOR * SECTOR_SIZE))?;
        reader.read_exact(&mut pvd)?;

        if pvd[0] != 1 || &pvd[1..6] != b"CD001" {
            return Err(FormatError::invalid(
                "iso volume",
                "no primary volume descriptor at sector 16".to_string(),
            ));
        }

        let root = parse_record(&pvd[PVD_ROOT_RECORD_OFFSET..])?.ok_or_else(|| {
            FormatError::invalid("iso volume", "empty root directory record".to_string())
        })?;
        if !root.is_dir {
            return Err(FormatError::invalid(
                "iso volume",
                "root record is not a directory".to_string(),
            ));
        }

        Ok(Self { reader, root })
    }

    /// Read the file at a `/`-separated path like `PSP_GAME/PARAM.SFO`.
    pub fn read_path(&mut self, path: &str) -> Result<Vec<u8>> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            return Err(FormatError::invalid("iso path", "empty path".to_string()));
        }

        let mut current = self.root.clone();
        for (i, component) in components.iter().enumerate() {
            if !current.is_dir {
                return Err(FormatError::invalid(
                    "iso path",
                    format!("{} is not a directory", components[..i].join("/")),
                ));
            }
            let entries = self.read_dir(&current)?;
            current = find_entry(&entries, component).ok_or_else(|| {
                FormatError::invalid("iso path", format!("{path}: {component} not found"))
            })?;
        }

        if current.is_dir {
            return Err(FormatError::invalid(
                "iso path",
                format!("{path} is a directory"),
            ));
        }
        self.read_extent(&current, MAX_FILE_BYTES)
    }

    fn read_dir(&mut self, dir: &DirRecord) -> Result<Vec<DirRecord>> {
        let raw = self.read_extent(dir, MAX_DIR_BYTES)?;
        let mut entries = Vec::new();

        // Records never straddle sector boundaries; a zero length byte means
        // the rest of the sector is padding.
        for sector in raw.chunks(SECTOR_SIZE as usize) {
            let mut pos = 0usize;
            while pos < sector.len() {
                match parse_record(&sector[pos..])? {
                    None => break,
                    Some(record) => {
                        let len = sector[pos] as usize;
                        // "." and ".." carry single-byte identifiers 0 and 1.
                        if !(record.name.len() == 1
                            && matches!(record.name.as_bytes()[0], 0x00 | 0x01))
                        {
                            entries.push(record);
                        }
                        pos += len;
                    }
                }
            }
        }
        Ok(entries)
    }

    fn read_extent(&mut self, record: &DirRecord, limit: u32) -> Result<Vec<u8>> {
        if record.size > limit {
            return Err(FormatError::invalid(
                "iso extent",
                format!("{} is {} bytes, limit {limit}", record.name, record.size),
            ));
        }
        self.reader
            .seek(SeekFrom::Start(record.extent as u64 * SECTOR_SIZE))?;
        let mut buf = vec![0u8; record.size as usize];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Parse one directory record. `Ok(None)` when the length byte is zero
/// (sector padding).
fn parse_record(buf: &[u8]) -> Result<Option<DirRecord>> {
    let Some(&len) = buf.first() else {
        return Ok(None);
    };
    if len == 0 {
        return Ok(None);
    }
    let len = len as usize;
    if len < DIR_RECORD_FIXED_LEN || len > buf.len() {
        return Err(FormatError::invalid(
            "iso directory record",
            format!("record length {len} out of range"),
        ));
    }

    let name_len = buf[32] as usize;
    if DIR_RECORD_FIXED_LEN + name_len > len {
        return Err(FormatError::invalid(
            "iso directory record",
            format!("identifier length {name_len} exceeds record"),
        ));
    }

    let name_bytes = &buf[DIR_RECORD_FIXED_LEN..DIR_RECORD_FIXED_LEN + name_len];
    Ok(Some(DirRecord {
        name: String::from_utf8_lossy(name_bytes).into_owned(),
        extent: u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
        size: u32::from_le_bytes([buf[10], buf[11], buf[12], buf[13]]),
        is_dir: buf[25] & 0x02 != 0,
    }))
}

fn find_entry(entries: &[DirRecord], component: &str) -> Option<DirRecord> {
    let versioned = format!("{component};1");
    entries
        .iter()
        .find(|e| e.name == component)
        .or_else(|| entries.iter().find(|e| e.name.eq_ignore_ascii_case(component)))
        .or_else(|| entries.iter().find(|e| e.name == versioned))
        .or_else(|| {
            entries
                .iter()
                .find(|e| e.name.eq_ignore_ascii_case(&versioned))
        })
        .cloned()
}
