//! Game file identity hashing.
//!
//! An identity is a lowercase MD5 string computed so that the same dump
//! produces the same hash regardless of how it is stored: compressed disc
//! images are decoded to a temp file first, archives are hashed by their
//! most plausible entry, text programs are newline-normalized, and
//! everything else is hashed whole up to the size cap.

use std::io::Cursor;
use std::path::Path;

use md5::{Digest, Md5};
use tracing::debug;

use questlog_core::cancel::CancelToken;
use questlog_core::consoles::{ConsoleCategory, ConsoleMapping};
use questlog_core::settings::ScanSettings;

use crate::archive::{self, ArchiveEntryCache};
use crate::error::{FormatError, Result};
use crate::hash::{self, MAX_HASH_BYTES};
use crate::iso::IsoReader;
use crate::util::to_hex;
use crate::{cso, rvz};

const PSP_PARAM_PATH: &str = "PSP_GAME/PARAM.SFO";
const PSP_EBOOT_PATH: &str = "PSP_GAME/SYSDIR/EBOOT.BIN";

/// Compute the identity hash for a game file.
///
/// The file extension picks the container handling; the console's hash
/// category picks how the underlying image bytes are digested. `progress`
/// receives (done, total) byte counts while a compressed image decodes.
pub fn compute_identity(
    path: &Path,
    console: &ConsoleMapping,
    settings: &ScanSettings,
    archives: &ArchiveEntryCache,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "cso" | "ciso" => {
            let temp = cso::decode_to_temp(path, cancel, progress)?;
            hash_image(&temp, console.category, cancel)
        }
        "rvz" | "wia" => {
            let temp = rvz::decode_to_temp(path, cancel, progress)?;
            hash_image(&temp, console.category, cancel)
        }
        "zip" | "7z" | "rar" => hash_archive(path, console.category, settings, archives, cancel),
        _ => hash_image(path, console.category, cancel),
    }
}

/// Hash an uncompressed image or loose file per its console category.
pub fn hash_image(path: &Path, category: ConsoleCategory, cancel: &CancelToken) -> Result<String> {
    match category {
        ConsoleCategory::PspIso => psp_iso_hash(path, cancel),
        ConsoleCategory::TextRom => hash::md5_text_file(path, cancel),
        ConsoleCategory::Rom | ConsoleCategory::Disc => hash::md5_file_capped(path, cancel),
    }
}

/// PSP identity: MD5 over PARAM.SFO followed by EBOOT.BIN, both read from
/// inside the ISO filesystem. Hashing whole PSP discs would be dominated
/// by multi-GB movie/audio data that repacks routinely rewrite.
fn psp_iso_hash(path: &Path, cancel: &CancelToken) -> Result<String> {
    let mut iso = IsoReader::open(path)?;
    let param = iso.read_path(PSP_PARAM_PATH)?;
    if cancel.is_cancelled() {
        return Err(FormatError::Cancelled);
    }
    let eboot = iso.read_path(PSP_EBOOT_PATH)?;

    let mut hasher = Md5::new();
    hasher.update(&param);
    hasher.update(&eboot);
    Ok(to_hex(&hasher.finalize()))
}

/// Hash an archive by its candidate entries, largest first. Entries are
/// digested as plain payload bytes; nested containers are not unpacked.
fn hash_archive(
    path: &Path,
    category: ConsoleCategory,
    settings: &ScanSettings,
    archives: &ArchiveEntryCache,
    cancel: &CancelToken,
) -> Result<String> {
    let candidates = archives.candidates(path, settings.max_archive_candidates)?;
    if candidates.is_empty() {
        return Err(FormatError::invalid(
            "archive",
            format!("{} has no hashable entries", path.display()),
        ));
    }

    let mut last_err = None;
    for candidate in candidates.iter() {
        if cancel.is_cancelled() {
            return Err(FormatError::Cancelled);
        }
        match hash_archive_entry(path, &candidate.key, category, cancel) {
            Ok(identity) => return Ok(identity),
            Err(FormatError::Cancelled) => return Err(FormatError::Cancelled),
            Err(e) => {
                debug!(
                    "candidate {} in {} failed: {e}",
                    candidate.key,
                    path.display()
                );
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        FormatError::invalid("archive", format!("{}: every candidate failed", path.display()))
    }))
}

fn hash_archive_entry(
    path: &Path,
    key: &str,
    category: ConsoleCategory,
    cancel: &CancelToken,
) -> Result<String> {
    let data = archive::read_entry(path, key)?;
    if cancel.is_cancelled() {
        return Err(FormatError::Cancelled);
    }
    match category {
        ConsoleCategory::TextRom => {
            hash::md5_text_reader(&mut Cursor::new(data), MAX_HASH_BYTES, cancel)
        }
        _ => hash::md5_reader_capped(&mut Cursor::new(data), MAX_HASH_BYTES, cancel),
    }
}
