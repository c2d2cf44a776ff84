//! Finding trophy data on disk and pairing it with an installed game.
//!
//! Trophy sets live in per-set folders named by NPCommID (e.g.
//! `NPWR01234_00`). Nothing ties an installed game to its folder directly,
//! so resolution tries progressively weaker signals: a serial embedded in
//! the install path, a definition bundled with the game files, and finally
//! a fuzzy title match against the cached folders.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use questlog_core::matching;

use crate::trophy::config;
use crate::trophy::container::TrpContainer;

pub const DEFINITION_FILE: &str = "TROPCONF.SFM";
pub const CONTAINER_FILE: &str = "TROPHY.TRP";
pub const LEDGER_FILE: &str = "TROPUSR.DAT";

/// How deep below the install dir to look for bundled trophy files.
const COMPANION_SEARCH_DEPTH: usize = 3;

/// One trophy set folder found under the data root.
#[derive(Debug, Clone)]
pub struct TrophyFolder {
    pub npcommid: String,
    pub title: Option<String>,
    pub path: PathBuf,
}

/// All trophy set folders under a data root, scanned once per refresh.
#[derive(Debug, Default)]
pub struct TrophyFolderCache {
    folders: Vec<TrophyFolder>,
}

impl TrophyFolderCache {
    /// Walk `root` and index every folder holding a trophy definition.
    /// Folders with unreadable definitions are still indexed under their
    /// directory name, which by convention is the NPCommID itself.
    pub fn build(root: &Path, language: Option<&str>) -> Self {
        let mut folders = Vec::new();
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file()
                || !entry
                    .file_name()
                    .to_string_lossy()
                    .eq_ignore_ascii_case(DEFINITION_FILE)
            {
                continue;
            }
            let Some(dir) = entry.path().parent() else {
                continue;
            };
            let dir_name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let parsed = std::fs::read_to_string(entry.path())
                .ok()
                .and_then(|xml| config::parse_definition(&xml, language).ok());
            let (npcommid, title) = match parsed {
                Some(def) => (def.npcommid.unwrap_or_else(|| dir_name.clone()), def.title_name),
                None => {
                    debug!("unreadable trophy definition in {}", dir.display());
                    (dir_name.clone(), None)
                }
            };
            if npcommid.is_empty() {
                continue;
            }
            folders.push(TrophyFolder {
                npcommid,
                title,
                path: dir.to_path_buf(),
            });
        }
        folders.sort_by(|a, b| a.npcommid.cmp(&b.npcommid));
        debug!("indexed {} trophy folders under {}", folders.len(), root.display());
        Self { folders }
    }

    pub fn folders(&self) -> &[TrophyFolder] {
        &self.folders
    }

    pub fn find_by_id(&self, npcommid: &str) -> Option<&TrophyFolder> {
        self.folders
            .iter()
            .find(|f| f.npcommid.eq_ignore_ascii_case(npcommid))
    }

    pub fn clear(&mut self) {
        self.folders.clear();
    }
}

fn serial_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"NPWR\d{5}_\d{2}").expect("valid serial pattern"))
}

/// Extract an NPCommID serial embedded anywhere in the path.
pub fn id_from_path(path: &Path) -> Option<String> {
    serial_regex()
        .find(&path.to_string_lossy())
        .map(|m| m.as_str().to_owned())
}

/// Look for a definition bundled with the game files themselves, either
/// packed in a TROPHY.TRP container or as a loose TROPCONF.SFM.
pub fn id_from_companion(install_dir: &Path, language: Option<&str>) -> Option<String> {
    for entry in WalkDir::new(install_dir)
        .max_depth(COMPANION_SEARCH_DEPTH)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let xml = if name.eq_ignore_ascii_case(CONTAINER_FILE) {
            match TrpContainer::open(entry.path())
                .and_then(|mut trp| trp.read_entry(DEFINITION_FILE))
            {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    debug!("skipping {}: {e}", entry.path().display());
                    continue;
                }
            }
        } else if name.eq_ignore_ascii_case(DEFINITION_FILE) {
            match std::fs::read_to_string(entry.path()) {
                Ok(xml) => xml,
                Err(e) => {
                    debug!("skipping {}: {e}", entry.path().display());
                    continue;
                }
            }
        } else {
            continue;
        };

        match config::parse_definition(&xml, language) {
            Ok(def) => {
                if let Some(id) = def.npcommid {
                    return Some(id);
                }
            }
            Err(e) => debug!("bad definition in {}: {e}", entry.path().display()),
        }
    }
    None
}

/// Fuzzy-match an install title against the cached folder titles.
pub fn id_from_title<'a>(
    title: &str,
    cache: &'a TrophyFolderCache,
    min_score: u32,
) -> Option<&'a TrophyFolder> {
    let candidates = cache
        .folders()
        .iter()
        .filter_map(|f| f.title.as_deref().map(|t| (f.npcommid.as_str(), t)));
    let (npcommid, score) = matching::best_match(title, candidates, min_score)?;
    debug!("matched title {title:?} to {npcommid} with score {score}");
    cache.find_by_id(npcommid)
}

/// Resolve the NPCommID for an installed game, strongest signal first.
///
/// A serial taken from the path must exist in the cache to count; install
/// paths routinely embed serials of re-releases whose trophy data lives
/// under a different set. Companion definitions are authoritative as-is.
pub fn discover_id(
    install_path: &Path,
    title: &str,
    cache: &TrophyFolderCache,
    language: Option<&str>,
    fuzzy_min_score: u32,
) -> Option<String> {
    if let Some(serial) = id_from_path(install_path) {
        if cache.find_by_id(&serial).is_some() {
            return Some(serial);
        }
        debug!("path serial {serial} has no trophy folder, trying weaker signals");
    }

    let install_dir = if install_path.is_dir() {
        Some(install_path.to_path_buf())
    } else {
        install_path.parent().map(Path::to_path_buf)
    };
    if let Some(dir) = install_dir {
        if let Some(id) = id_from_companion(&dir, language) {
            return Some(id);
        }
    }

    id_from_title(title, cache, fuzzy_min_score).map(|folder| folder.npcommid.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    fn definition_xml(npcommid: &str, title: &str) -> String {
        format!(
            r#"<trophyconf>
  <npcommid>{npcommid}</npcommid>
  <title-name>{title}</title-name>
  <trophy id="0" hidden="no" ttype="P" pid="-1">
    <name>All done</name>
    <detail>Earn everything.</detail>
  </trophy>
</trophyconf>"#
        )
    }

    fn make_folder(root: &Path, dir_name: &str, xml: &str) {
        let dir = root.join(dir_name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(DEFINITION_FILE), xml).unwrap();
    }

    fn write_trp_with_definition(path: &Path, xml: &str) {
        let data_start = 0x40u64 + 0x40;
        let mut out = vec![0u8; 0x40];
        out[0x00..0x04].copy_from_slice(&0xDCA2_4D00u32.to_be_bytes());
        out[0x04..0x08].copy_from_slice(&3u32.to_be_bytes());
        out[0x08..0x10].copy_from_slice(&(data_start + xml.len() as u64).to_be_bytes());
        out[0x10..0x14].copy_from_slice(&1u32.to_be_bytes());
        out[0x14..0x18].copy_from_slice(&0x40u32.to_be_bytes());
        let mut raw = [0u8; 0x40];
        raw[..DEFINITION_FILE.len()].copy_from_slice(DEFINITION_FILE.as_bytes());
        raw[32..40].copy_from_slice(&data_start.to_be_bytes());
        raw[40..48].copy_from_slice(&(xml.len() as u64).to_be_bytes());
        out.extend_from_slice(&raw);
        out.extend_from_slice(xml.as_bytes());
        let mut file = fs::File::create(path).unwrap();
        file.write_all(&out).unwrap();
    }

    #[test]
    fn test_cache_indexes_definition_folders() {
        let root = tempfile::tempdir().unwrap();
        make_folder(
            root.path(),
            "NPWR00001_00",
            &definition_xml("NPWR00001_00", "Shadow Realm"),
        );
        make_folder(root.path(), "NPWR00002_00", "not xml at all");

        let cache = TrophyFolderCache::build(root.path(), None);
        assert_eq!(cache.folders().len(), 2);
        assert_eq!(
            cache.find_by_id("npwr00001_00").unwrap().title.as_deref(),
            Some("Shadow Realm")
        );
        // Unreadable definition falls back to the directory name.
        let fallback = cache.find_by_id("NPWR00002_00").unwrap();
        assert_eq!(fallback.title, None);
    }

    #[test]
    fn test_cache_clear() {
        let root = tempfile::tempdir().unwrap();
        make_folder(
            root.path(),
            "NPWR00003_00",
            &definition_xml("NPWR00003_00", "Anything"),
        );
        let mut cache = TrophyFolderCache::build(root.path(), None);
        assert!(!cache.folders().is_empty());
        cache.clear();
        assert!(cache.folders().is_empty());
    }

    #[test]
    fn test_id_from_path() {
        assert_eq!(
            id_from_path(Path::new("/games/NPWR12345_00/USRDIR/EBOOT.BIN")),
            Some("NPWR12345_00".to_owned())
        );
        assert_eq!(id_from_path(Path::new("/games/plain-title")), None);
    }

    #[test]
    fn test_companion_loose_definition() {
        let install = tempfile::tempdir().unwrap();
        let nested = install.path().join("PS3_GAME").join("TROPDIR");
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            nested.join(DEFINITION_FILE),
            definition_xml("NPWR09999_00", "Nested Game"),
        )
        .unwrap();

        assert_eq!(
            id_from_companion(install.path(), None),
            Some("NPWR09999_00".to_owned())
        );
    }

    #[test]
    fn test_companion_trp_container() {
        let install = tempfile::tempdir().unwrap();
        write_trp_with_definition(
            &install.path().join(CONTAINER_FILE),
            &definition_xml("NPWR08888_00", "Packed Game"),
        );

        assert_eq!(
            id_from_companion(install.path(), None),
            Some("NPWR08888_00".to_owned())
        );
    }

    #[test]
    fn test_companion_respects_depth_limit() {
        let install = tempfile::tempdir().unwrap();
        let deep = install.path().join("a").join("b").join("c").join("d");
        fs::create_dir_all(&deep).unwrap();
        fs::write(
            deep.join(DEFINITION_FILE),
            definition_xml("NPWR07777_00", "Too Deep"),
        )
        .unwrap();

        assert_eq!(id_from_companion(install.path(), None), None);
    }

    #[test]
    fn test_discover_id_falls_back_to_title_match() {
        let root = tempfile::tempdir().unwrap();
        make_folder(
            root.path(),
            "NPWR00010_00",
            &definition_xml("NPWR00010_00", "Galaxy Racer Deluxe"),
        );
        let cache = TrophyFolderCache::build(root.path(), None);

        // Path carries a serial that is not in the cache; title wins.
        let install = tempfile::tempdir().unwrap();
        let game_dir = install.path().join("NPWR99999_99");
        fs::create_dir_all(&game_dir).unwrap();

        let id = discover_id(&game_dir, "Galaxy Racer Deluxe", &cache, None, 70);
        assert_eq!(id, Some("NPWR00010_00".to_owned()));
    }

    #[test]
    fn test_discover_id_prefers_cached_path_serial() {
        let root = tempfile::tempdir().unwrap();
        make_folder(
            root.path(),
            "NPWR00020_00",
            &definition_xml("NPWR00020_00", "Some Game"),
        );
        let cache = TrophyFolderCache::build(root.path(), None);

        let install = tempfile::tempdir().unwrap();
        let game_dir = install.path().join("NPWR00020_00");
        fs::create_dir_all(&game_dir).unwrap();

        let id = discover_id(&game_dir, "Entirely Different", &cache, None, 70);
        assert_eq!(id, Some("NPWR00020_00".to_owned()));
    }
}
