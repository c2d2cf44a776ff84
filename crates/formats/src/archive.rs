//! Candidate enumeration and extraction for zip/7z/rar archives.
//!
//! A ROM archive usually holds one payload plus sidecar files (nfo, scans,
//! checksum lists). Listing keeps non-empty regular entries, drops known
//! sidecar extensions, and orders the rest largest-first so the payload is
//! tried before the leftovers.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sevenz_rust::{Password, SevenZReader};
use unrar::Archive as RarArchive;
use zip::ZipArchive;

use crate::error::{FormatError, Result};

/// One extractable entry: the in-archive key plus its unpacked size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    SevenZ,
    Rar,
}

/// Companion-file extensions that are never the game payload.
const SIDECAR_EXTENSIONS: &[&str] = &[
    "txt", "nfo", "diz", "md", "rtf", "htm", "html", "pdf", "jpg", "jpeg", "png", "gif", "bmp",
    "ico", "md5", "sfv", "sha1", "crc",
];

pub fn detect_kind(path: &Path) -> Option<ArchiveKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "zip" => Some(ArchiveKind::Zip),
        "7z" => Some(ArchiveKind::SevenZ),
        "rar" => Some(ArchiveKind::Rar),
        _ => None,
    }
}

fn is_sidecar(key: &str) -> bool {
    match key.rsplit_once('.') {
        Some((_, ext)) => SIDECAR_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// List payload candidates: regular entries with data, sidecars dropped,
/// largest first, capped at `max`. Equal sizes order by key so repeat scans
/// try candidates in the same order.
pub fn list_candidates(path: &Path, max: usize) -> Result<Vec<ArchiveEntry>> {
    let kind = detect_kind(path).ok_or_else(|| {
        FormatError::invalid(
            "archive",
            format!("{} is not a supported archive", path.display()),
        )
    })?;

    let mut entries = match kind {
        ArchiveKind::Zip => list_zip(path)?,
        ArchiveKind::SevenZ => list_sevenz(path)?,
        ArchiveKind::Rar => list_rar(path)?,
    };
    entries.retain(|e| e.size > 0 && !is_sidecar(&e.key));
    entries.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.key.cmp(&b.key)));
    entries.truncate(max);
    Ok(entries)
}

/// Extract one entry's bytes by the key reported in [`list_candidates`].
pub fn read_entry(path: &Path, key: &str) -> Result<Vec<u8>> {
    let kind = detect_kind(path).ok_or_else(|| {
        FormatError::invalid(
            "archive",
            format!("{} is not a supported archive", path.display()),
        )
    })?;
    match kind {
        ArchiveKind::Zip => read_zip_entry(path, key),
        ArchiveKind::SevenZ => read_sevenz_entry(path, key),
        ArchiveKind::Rar => read_rar_entry(path, key),
    }
}

fn missing_entry(path: &Path, key: &str) -> FormatError {
    FormatError::invalid(
        "archive entry",
        format!("{key} not found in {}", path.display()),
    )
}

fn list_zip(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut archive = ZipArchive::new(File::open(path)?)
        .map_err(|e| FormatError::invalid("zip archive", e.to_string()))?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| FormatError::invalid("zip archive", e.to_string()))?;
        if entry.is_file() {
            entries.push(ArchiveEntry {
                key: entry.name().to_string(),
                size: entry.size(),
            });
        }
    }
    Ok(entries)
}

fn read_zip_entry(path: &Path, key: &str) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(File::open(path)?)
        .map_err(|e| FormatError::invalid("zip archive", e.to_string()))?;
    let mut entry = archive
        .by_name(key)
        .map_err(|_| missing_entry(path, key))?;
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut data)?;
    Ok(data)
}

fn list_sevenz(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let reader = SevenZReader::open(path, Password::empty())
        .map_err(|e| FormatError::invalid("7z archive", e.to_string()))?;
    Ok(reader
        .archive()
        .files
        .iter()
        .filter(|f| !f.is_directory())
        .map(|f| ArchiveEntry {
            key: f.name().to_string(),
            size: f.size(),
        })
        .collect())
}

fn read_sevenz_entry(path: &Path, key: &str) -> Result<Vec<u8>> {
    let mut reader = SevenZReader::open(path, Password::empty())
        .map_err(|e| FormatError::invalid("7z archive", e.to_string()))?;
    let mut data: Option<Vec<u8>> = None;
    reader
        .for_each_entries(|entry, entry_reader| {
            if entry.name() == key && !entry.is_directory() {
                let mut buf = Vec::with_capacity(entry.size() as usize);
                entry_reader.read_to_end(&mut buf)?;
                data = Some(buf);
                Ok(false) // stop iterating
            } else {
                Ok(true)
            }
        })
        .map_err(|e| FormatError::invalid("7z archive", e.to_string()))?;
    data.ok_or_else(|| missing_entry(path, key))
}

fn list_rar(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let archive = RarArchive::new(path)
        .open_for_listing()
        .map_err(|e| FormatError::invalid("rar archive", e.to_string()))?;
    let mut entries = Vec::new();
    for header in archive {
        let header = header.map_err(|e| FormatError::invalid("rar archive", e.to_string()))?;
        if header.is_file() {
            entries.push(ArchiveEntry {
                key: header.filename.to_string_lossy().into_owned(),
                size: header.unpacked_size as u64,
            });
        }
    }
    Ok(entries)
}

fn read_rar_entry(path: &Path, key: &str) -> Result<Vec<u8>> {
    let mut archive = RarArchive::new(path)
        .open_for_processing()
        .map_err(|e| FormatError::invalid("rar archive", e.to_string()))?;
    while let Some(header) = archive
        .read_header()
        .map_err(|e| FormatError::invalid("rar archive", e.to_string()))?
    {
        if header.entry().is_file() && header.entry().filename.to_string_lossy() == key {
            let (data, _rest) = header
                .read()
                .map_err(|e| FormatError::invalid("rar archive", e.to_string()))?;
            return Ok(data);
        }
        archive = header
            .skip()
            .map_err(|e| FormatError::invalid("rar archive", e.to_string()))?;
    }
    Err(missing_entry(path, key))
}

/// Per-scan memo of candidate listings keyed by archive path.
///
/// Listing a solid 7z or rar is not free, and the identity pass may touch
/// the same archive for several library entries. Built lazily during a
/// scan, read-only semantics afterwards, dropped or cleared between scans.
#[derive(Debug, Default)]
pub struct ArchiveEntryCache {
    entries: Mutex<HashMap<PathBuf, Arc<[ArchiveEntry]>>>,
}

impl ArchiveEntryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached candidate list for `path`, listing the archive on first use.
    pub fn candidates(&self, path: &Path, max: usize) -> Result<Arc<[ArchiveEntry]>> {
        if let Some(hit) = self.entries.lock().unwrap().get(path) {
            return Ok(Arc::clone(hit));
        }
        let listed: Arc<[ArchiveEntry]> = list_candidates(path, max)?.into();
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), Arc::clone(&listed));
        Ok(listed)
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
