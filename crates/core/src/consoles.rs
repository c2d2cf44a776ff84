//! Console registry and platform resolver
//!
//! Emulated platforms arrive as free-form label strings ("Sony PSP",
//! "SNES", "PC Engine CD"). The registry maps those labels onto stable
//! console ids plus a hashing category, and knows which platforms are
//! explicitly out of scope (modern PC/console storefronts).
//!
//! The registry ships embedded in the binary but can also be loaded
//! from JSON so deployments can extend it without a rebuild.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{QuestlogError, Result};

/// Embedded registry data, versioned alongside the code.
const BUILTIN_REGISTRY: &str = include_str!("consoles.json");

/// How game files for a console are turned into an identity hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleCategory {
    /// Plain ROM dump, hashed whole (up to the size cap).
    Rom,
    /// Optical disc image, decoded from its container first if needed.
    Disc,
    /// PSP disc image, hashed from PARAM.SFO + EBOOT.BIN inside the ISO.
    PspIso,
    /// Text-based program, hashed after newline normalization.
    TextRom,
}

/// A single console entry in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleMapping {
    pub id: u32,
    pub name: String,
    /// Label fragments that identify this console.
    pub keywords: Vec<String>,
    /// Higher priority entries are tried first.
    pub priority: u32,
    /// When set, a keyword hit only counts if no higher-priority
    /// mapping also matches the label (guards substring collisions
    /// like Cassette Vision inside Super Cassette Vision).
    #[serde(default)]
    pub requires_exclusion_check: bool,
    pub category: ConsoleCategory,
}

#[derive(Debug, Clone, Deserialize)]
struct RegistryFile {
    version: u32,
    excluded_platforms: Vec<String>,
    consoles: Vec<ConsoleMapping>,
}

/// Parsed console registry with mappings pre-sorted for resolution.
#[derive(Debug, Clone)]
pub struct ConsoleIndex {
    version: u32,
    excluded: Vec<String>,
    /// Sorted by descending priority; original order breaks ties.
    mappings: Vec<ConsoleMapping>,
}

impl ConsoleIndex {
    /// Loads the registry embedded in the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_REGISTRY)
    }

    /// Parses a registry from JSON, validating version and id uniqueness.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(raw)
            .map_err(|e| QuestlogError::Registry(format!("invalid registry JSON: {e}")))?;
        if file.version != 1 {
            return Err(QuestlogError::Registry(format!(
                "unsupported registry version {}",
                file.version
            )));
        }
        if file.consoles.is_empty() {
            return Err(QuestlogError::Registry("registry has no consoles".into()));
        }
        let mut seen = HashSet::new();
        for mapping in &file.consoles {
            if !seen.insert(mapping.id) {
                return Err(QuestlogError::Registry(format!(
                    "duplicate console id {}",
                    mapping.id
                )));
            }
        }
        let mut mappings = file.consoles;
        mappings.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(Self {
            version: file.version,
            excluded: file.excluded_platforms,
            mappings,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn mappings(&self) -> &[ConsoleMapping] {
        &self.mappings
    }

    /// True when the platform label names a system we deliberately skip.
    pub fn is_excluded(&self, platform: &str) -> bool {
        let squashed = squash(platform);
        let tokens = tokenize(platform);
        self.excluded
            .iter()
            .any(|kw| keyword_matches(kw, &squashed, &tokens))
    }

    /// Resolves a platform label to a console mapping.
    ///
    /// Excluded platforms and unknown labels both come back as `None`;
    /// callers that care about the difference can ask [`Self::is_excluded`]
    /// first.
    pub fn resolve(&self, platform: &str) -> Option<&ConsoleMapping> {
        let squashed = squash(platform);
        if squashed.is_empty() {
            return None;
        }
        let tokens = tokenize(platform);
        if self.is_excluded(platform) {
            tracing::debug!(platform, "platform is excluded from resolution");
            return None;
        }

        for (idx, mapping) in self.mappings.iter().enumerate() {
            if !mapping_matches(mapping, &squashed, &tokens) {
                continue;
            }
            // Ambiguous keywords only win when nothing above them in the
            // priority order also claims the label.
            if mapping.requires_exclusion_check {
                let shadowed = self.mappings[..idx]
                    .iter()
                    .any(|other| mapping_matches(other, &squashed, &tokens));
                if shadowed {
                    continue;
                }
            }
            return Some(mapping);
        }
        None
    }

    /// Resolves a label to the console id alone.
    pub fn resolve_id(&self, platform: &str) -> Option<u32> {
        self.resolve(platform).map(|m| m.id)
    }
}

fn mapping_matches(mapping: &ConsoleMapping, squashed: &str, tokens: &[String]) -> bool {
    mapping
        .keywords
        .iter()
        .any(|kw| keyword_matches(kw, squashed, tokens))
}

/// Keyword match runs three tiers: exact squashed equality, whole-token
/// sequence, and (for keywords of 4+ chars) plain substring.
fn keyword_matches(keyword: &str, squashed_input: &str, input_tokens: &[String]) -> bool {
    let kw_squashed = squash(keyword);
    if kw_squashed.is_empty() {
        return false;
    }
    if kw_squashed == squashed_input {
        return true;
    }
    let kw_tokens = tokenize(keyword);
    if !kw_tokens.is_empty()
        && input_tokens
            .windows(kw_tokens.len())
            .any(|window| window == kw_tokens.as_slice())
    {
        return true;
    }
    kw_squashed.len() >= 4 && squashed_input.contains(&kw_squashed)
}

/// Lowercases and drops everything that is not alphanumeric.
fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Lowercase tokens split on non-alphanumeric runs.
fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> ConsoleIndex {
        ConsoleIndex::builtin().unwrap()
    }

    #[test]
    fn test_builtin_registry_parses() {
        let idx = index();
        assert_eq!(idx.version(), 1);
        assert!(!idx.mappings().is_empty());
    }

    #[test]
    fn test_common_labels_resolve() {
        let idx = index();
        assert_eq!(idx.resolve_id("Sony PSP"), Some(41));
        assert_eq!(idx.resolve_id("SNES"), Some(3));
        assert_eq!(idx.resolve_id("Sega Mega Drive"), Some(1));
        assert_eq!(idx.resolve_id("Nintendo GameCube"), Some(16));
        assert_eq!(idx.resolve_id("playstation"), Some(12));
    }

    #[test]
    fn test_modern_platforms_are_excluded() {
        let idx = index();
        assert!(idx.is_excluded("PC (Windows)"));
        assert!(idx.is_excluded("Nintendo Switch"));
        assert!(idx.is_excluded("Sony PlayStation 4"));
        assert_eq!(idx.resolve("Xbox Series X"), None);
    }

    #[test]
    fn test_substring_collision_prefers_specific_console() {
        let idx = index();
        assert_eq!(idx.resolve_id("Super Cassette Vision"), Some(68));
        assert_eq!(idx.resolve_id("Cassette Vision"), Some(67));
        assert_eq!(idx.resolve_id("Game Boy Advance"), Some(5));
        assert_eq!(idx.resolve_id("Game Boy"), Some(4));
    }

    #[test]
    fn test_short_keywords_never_match_as_substring() {
        let idx = index();
        // "nes" would otherwise hit inside e.g. "genesis".
        assert_eq!(idx.resolve_id("Genesis"), Some(1));
        assert_eq!(idx.resolve_id("NES"), Some(7));
    }

    #[test]
    fn test_pc_engine_is_not_swallowed_by_exclusions() {
        let idx = index();
        assert!(!idx.is_excluded("PC Engine"));
        assert_eq!(idx.resolve_id("PC Engine"), Some(8));
        assert_eq!(idx.resolve_id("PC Engine CD"), Some(76));
    }

    #[test]
    fn test_unknown_label_resolves_to_none() {
        let idx = index();
        assert_eq!(idx.resolve("Holographic Quantum Deck"), None);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let raw = r#"{
            "version": 1,
            "excluded_platforms": [],
            "consoles": [
                {"id": 1, "name": "A", "keywords": ["a1"], "priority": 1, "category": "rom"},
                {"id": 1, "name": "B", "keywords": ["b1"], "priority": 1, "category": "rom"}
            ]
        }"#;
        assert!(ConsoleIndex::from_json(raw).is_err());
    }
}
