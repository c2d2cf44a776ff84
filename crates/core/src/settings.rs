//! Scan settings
//!
//! Hosts load these once per session and pass them into the scan and
//! identity layers. Kept deliberately flat so a TOML file stays readable.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QuestlogError, Result};
use crate::rarity::RarityThresholds;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Preferred language tag for trophy names/descriptions, e.g. "en".
    /// None takes each file's untagged default text.
    #[serde(default)]
    pub trophy_language: Option<String>,

    /// How many entries inside an archive to try hashing before giving up.
    #[serde(default = "default_max_archive_candidates")]
    pub max_archive_candidates: usize,

    /// Minimum fuzzy-match score (0-100) for title-based identity fallback.
    #[serde(default = "default_fuzzy_min_score")]
    pub fuzzy_min_score: u32,

    #[serde(default)]
    pub rarity: RarityThresholds,
}

fn default_max_archive_candidates() -> usize {
    25
}

fn default_fuzzy_min_score() -> u32 {
    70
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            trophy_language: None,
            max_archive_candidates: default_max_archive_candidates(),
            fuzzy_min_score: default_fuzzy_min_score(),
            rarity: RarityThresholds::default(),
        }
    }
}

impl ScanSettings {
    /// Loads settings from a TOML file, falling back to defaults when the
    /// file is missing or malformed.
    pub fn load_or_default(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!("Failed to parse settings {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No settings at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| QuestlogError::Config(format!("serialize settings: {e}")))?;
        fs::write(path, raw)
            .map_err(|e| QuestlogError::Config(format!("write {}: {e}", path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = ScanSettings::default();
        assert_eq!(s.trophy_language, None);
        assert_eq!(s.max_archive_candidates, 25);
        assert_eq!(s.fuzzy_min_score, 70);
        assert_eq!(s.rarity, RarityThresholds::default());
    }

    #[test]
    fn test_partial_toml_fills_in_defaults() {
        let s: ScanSettings = toml::from_str("trophy_language = \"en\"").unwrap();
        assert_eq!(s.trophy_language.as_deref(), Some("en"));
        assert_eq!(s.max_archive_candidates, 25);
        assert_eq!(s.fuzzy_min_score, 70);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut s = ScanSettings::default();
        s.fuzzy_min_score = 85;
        s.rarity.rare = 12.5;
        let raw = toml::to_string_pretty(&s).unwrap();
        let back: ScanSettings = toml::from_str(&raw).unwrap();
        assert_eq!(back.fuzzy_min_score, 85);
        assert_eq!(back.rarity.rare, 12.5);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let s = ScanSettings::load_or_default(Path::new("/nonexistent/questlog.toml"));
        assert_eq!(s.max_archive_candidates, 25);
    }
}
