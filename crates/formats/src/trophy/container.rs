//! TRP container files (TROPHY.TRP).
//!
//! A TRP is a flat big-endian archive: fixed header, a table of fixed-width
//! entries, then raw file payloads. It bundles the trophy definition XML
//! with icon assets; only named-entry reads are needed here.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::error::{FormatError, Result};
use crate::util::{bytesa, slice_u32_be, slice_u64_be};

const TRP_MAGIC: u32 = 0xDCA2_4D00;
const HEADER_LEN: usize = 0x40;
const ENTRY_LEN: usize = 0x40;
const ENTRY_NAME_LEN: usize = 32;

/// One named file inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrpEntry {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

/// An opened container with its entry table decoded and bounds-checked.
pub struct TrpContainer {
    file: File,
    pub version: u32,
    entries: Vec<TrpEntry>,
}

impl TrpContainer {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let header: [u8; HEADER_LEN] = bytesa(&mut file)?;
        let magic = slice_u32_be(&header, 0, "trp header")?;
        if magic != TRP_MAGIC {
            return Err(FormatError::invalid(
                "trp container",
                format!("bad magic {magic:#010x}"),
            ));
        }
        let version = slice_u32_be(&header, 0x04, "trp header")?;
        let declared_len = slice_u64_be(&header, 0x08, "trp header")?;
        if declared_len != file_len {
            debug!("trp container declares {declared_len} bytes, file has {file_len}");
        }
        let entry_count = slice_u32_be(&header, 0x10, "trp header")? as usize;
        let entry_size = slice_u32_be(&header, 0x14, "trp header")? as usize;
        if entry_size != ENTRY_LEN {
            return Err(FormatError::invalid(
                "trp container",
                format!("unsupported entry size {entry_size:#x}"),
            ));
        }
        let table_end = HEADER_LEN as u64 + (entry_count as u64) * ENTRY_LEN as u64;
        if table_end > file_len {
            return Err(FormatError::invalid(
                "trp container",
                format!("entry table for {entry_count} entries exceeds file size"),
            ));
        }

        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let raw: [u8; ENTRY_LEN] = bytesa(&mut file)?;
            let name_end = raw[..ENTRY_NAME_LEN]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(ENTRY_NAME_LEN);
            let name = String::from_utf8_lossy(&raw[..name_end]).into_owned();
            let offset = slice_u64_be(&raw, ENTRY_NAME_LEN, "trp entry")?;
            let size = slice_u64_be(&raw, ENTRY_NAME_LEN + 8, "trp entry")?;
            let end = offset.checked_add(size).ok_or_else(|| {
                FormatError::invalid("trp entry", format!("{name}: offset overflow"))
            })?;
            if end > file_len {
                return Err(FormatError::invalid(
                    "trp entry",
                    format!("{name}: {size} bytes at {offset:#x} exceeds file size"),
                ));
            }
            entries.push(TrpEntry { name, offset, size });
        }

        Ok(Self {
            file,
            version,
            entries,
        })
    }

    pub fn entries(&self) -> &[TrpEntry] {
        &self.entries
    }

    /// Read the full payload of the entry with exactly this name.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| {
                FormatError::invalid("trp container", format!("no entry named {name}"))
            })?;
        let size = usize::try_from(entry.size)
            .map_err(|_| FormatError::invalid("trp entry", format!("{name}: size too large")))?;
        self.file.seek(SeekFrom::Start(entry.offset))?;
        let mut data = vec![0u8; size];
        self.file.read_exact(&mut data)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_trp(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let data_start = HEADER_LEN + entries.len() * ENTRY_LEN;
        let total_len =
            data_start + entries.iter().map(|(_, d)| d.len()).sum::<usize>();

        let mut out = vec![0u8; HEADER_LEN];
        out[0x00..0x04].copy_from_slice(&TRP_MAGIC.to_be_bytes());
        out[0x04..0x08].copy_from_slice(&3u32.to_be_bytes());
        out[0x08..0x10].copy_from_slice(&(total_len as u64).to_be_bytes());
        out[0x10..0x14].copy_from_slice(&(entries.len() as u32).to_be_bytes());
        out[0x14..0x18].copy_from_slice(&(ENTRY_LEN as u32).to_be_bytes());

        let mut offset = data_start as u64;
        for (name, data) in entries {
            let mut raw = [0u8; ENTRY_LEN];
            raw[..name.len()].copy_from_slice(name.as_bytes());
            raw[ENTRY_NAME_LEN..ENTRY_NAME_LEN + 8].copy_from_slice(&offset.to_be_bytes());
            raw[ENTRY_NAME_LEN + 8..ENTRY_NAME_LEN + 16]
                .copy_from_slice(&(data.len() as u64).to_be_bytes());
            out.extend_from_slice(&raw);
            offset += data.len() as u64;
        }
        for (_, data) in entries {
            out.extend_from_slice(data);
        }
        out
    }

    fn write_temp(data: &[u8]) -> tempfile::NamedTempFile {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(data).unwrap();
        temp.flush().unwrap();
        temp
    }

    #[test]
    fn test_lists_and_reads_entries() {
        let conf = b"<trophyconf></trophyconf>";
        let icon = [0x89u8, b'P', b'N', b'G'];
        let temp = write_temp(&build_trp(&[
            ("TROPCONF.SFM", conf.as_slice()),
            ("ICON0.PNG", icon.as_slice()),
        ]));

        let mut trp = TrpContainer::open(temp.path()).unwrap();
        assert_eq!(trp.version, 3);
        let names: Vec<&str> = trp.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["TROPCONF.SFM", "ICON0.PNG"]);
        assert_eq!(trp.entries()[1].size, icon.len() as u64);

        assert_eq!(trp.read_entry("TROPCONF.SFM").unwrap(), conf);
        assert_eq!(trp.read_entry("ICON0.PNG").unwrap(), icon);
    }

    #[test]
    fn test_unknown_entry_name_fails() {
        let temp = write_temp(&build_trp(&[("TROPCONF.SFM", b"x".as_slice())]));
        let mut trp = TrpContainer::open(temp.path()).unwrap();
        assert!(trp.read_entry("TROP.SFM").is_err());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut data = build_trp(&[("TROPCONF.SFM", b"x".as_slice())]);
        data[0] = 0xFF;
        let temp = write_temp(&data);
        assert!(matches!(
            TrpContainer::open(temp.path()),
            Err(FormatError::Invalid { .. })
        ));
    }

    #[test]
    fn test_unsupported_entry_size_rejected() {
        let mut data = build_trp(&[("TROPCONF.SFM", b"x".as_slice())]);
        data[0x14..0x18].copy_from_slice(&0x20u32.to_be_bytes());
        let temp = write_temp(&data);
        assert!(TrpContainer::open(temp.path()).is_err());
    }

    #[test]
    fn test_entry_past_end_of_file_rejected() {
        let mut data = build_trp(&[("TROPCONF.SFM", b"abc".as_slice())]);
        // Inflate the recorded size beyond the payload.
        let size_at = HEADER_LEN + ENTRY_NAME_LEN + 8;
        data[size_at..size_at + 8].copy_from_slice(&1024u64.to_be_bytes());
        let temp = write_temp(&data);
        assert!(TrpContainer::open(temp.path()).is_err());
    }
}
