//! Shared data models used across providers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trophy grade assigned by disc-console providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrophyTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl TrophyTier {
    /// Score contribution toward the provider level ladder
    pub fn points(&self) -> u32 {
        match self {
            TrophyTier::Bronze => 15,
            TrophyTier::Silver => 30,
            TrophyTier::Gold => 90,
            TrophyTier::Platinum => 300,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrophyTier::Bronze => "Bronze",
            TrophyTier::Silver => "Silver",
            TrophyTier::Gold => "Gold",
            TrophyTier::Platinum => "Platinum",
        }
    }

    /// Parse the single-letter `ttype` tag used by trophy definition files
    pub fn from_type_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "B" => Some(TrophyTier::Bronze),
            "S" => Some(TrophyTier::Silver),
            "G" => Some(TrophyTier::Gold),
            "P" => Some(TrophyTier::Platinum),
            _ => None,
        }
    }
}

/// One unlockable item in normalized form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementDetail {
    /// Stable identifier within the owning game's achievement set
    pub api_name: String,
    pub name: String,
    pub description: Option<String>,
    pub icon_unlocked: Option<String>,
    pub icon_locked: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    pub unlocked: bool,
    /// Null means locked; locked items must carry a null timestamp
    pub unlock_time_utc: Option<DateTime<Utc>>,
    /// Share of all players holding this item, 0-100
    pub rarity_percent: Option<f64>,
    pub tier: Option<TrophyTier>,
    /// Set on the top-tier item whose unlock implies full completion
    #[serde(default)]
    pub capstone: bool,
    /// Grouping label, e.g. the DLC pack a trophy belongs to
    pub category: Option<String>,
}

/// Per-game achievement snapshot produced by one provider refresh pass.
///
/// Constructed fresh on every refresh and never mutated afterwards; a new
/// pass supersedes the previous value instead of editing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameAchievementData {
    pub provider: String,
    pub source_name: String,
    pub game_id: String,
    pub no_achievements: bool,
    pub items: Vec<AchievementDetail>,
    pub last_updated: DateTime<Utc>,
}

impl GameAchievementData {
    pub fn new(
        provider: impl Into<String>,
        source_name: impl Into<String>,
        game_id: impl Into<String>,
        items: Vec<AchievementDetail>,
    ) -> Self {
        Self {
            provider: provider.into(),
            source_name: source_name.into(),
            game_id: game_id.into(),
            no_achievements: items.is_empty(),
            items,
            last_updated: Utc::now(),
        }
    }

    /// The "no data" value returned when a game has nothing to report
    pub fn empty(
        provider: impl Into<String>,
        source_name: impl Into<String>,
        game_id: impl Into<String>,
    ) -> Self {
        Self::new(provider, source_name, game_id, Vec::new())
    }

    pub fn total_count(&self) -> usize {
        self.items.len()
    }

    pub fn unlocked_count(&self) -> usize {
        self.items.iter().filter(|a| a.unlocked).count()
    }

    /// Completion as a 0-100 percentage rounded to 2 decimals
    pub fn completion_percent(&self) -> Option<f64> {
        let total = self.total_count();
        if total == 0 {
            return None;
        }
        let raw = self.unlocked_count() as f64 * 100.0 / total as f64;
        Some((raw * 100.0).round() / 100.0)
    }

    pub fn is_fully_completed(&self) -> bool {
        let total = self.total_count();
        total > 0 && self.unlocked_count() == total
    }

    /// Unlocked items ordered by unlock time, undated unlocks last.
    ///
    /// The relative order of equal timestamps follows the item list.
    pub fn unlocks_in_order(&self) -> Vec<&AchievementDetail> {
        let mut unlocked: Vec<&AchievementDetail> =
            self.items.iter().filter(|a| a.unlocked).collect();
        unlocked.sort_by_key(|a| match a.unlock_time_utc {
            Some(t) => (0, t.timestamp_micros()),
            None => (1, 0),
        });
        unlocked
    }
}
