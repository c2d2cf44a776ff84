//! Catalog provider DTOs
//!
//! Wire shapes for the ROM-achievement catalog service (RetroAchievements
//! API compatible). Field names are PascalCase on the wire; everything here
//! is input-only and converts into the normalized [`AchievementDetail`]
//! model.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::models::AchievementDetail;

const BADGE_URL_BASE: &str = "https://media.retroachievements.org/Badge/";

/// Marks the achievement whose unlock represents beating the game.
const WIN_CONDITION_TYPE: &str = "win_condition";

/// One game record from the catalog, achievements keyed by id string.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogGame {
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "ConsoleID")]
    pub console_id: u32,
    #[serde(rename = "NumDistinctPlayers", default)]
    pub num_distinct_players: Option<u32>,
    #[serde(rename = "Achievements", default)]
    pub achievements: HashMap<String, CatalogAchievement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogAchievement {
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
    #[serde(rename = "Points", default)]
    pub points: Option<u32>,
    #[serde(rename = "BadgeName", default)]
    pub badge_name: Option<String>,
    #[serde(rename = "NumAwarded", default)]
    pub num_awarded: Option<u32>,
    /// Set only on per-user progress responses.
    #[serde(
        rename = "DateEarned",
        default,
        deserialize_with = "deserialize_catalog_date"
    )]
    pub date_earned: Option<DateTime<Utc>>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl CatalogAchievement {
    /// Ownership percentage, computable only when both counts are positive.
    pub fn rarity_percent(&self, num_distinct_players: Option<u32>) -> Option<f64> {
        let awarded = self.num_awarded?;
        let players = num_distinct_players?;
        if awarded == 0 || players == 0 {
            return None;
        }
        Some(awarded as f64 * 100.0 / players as f64)
    }

    fn badge_urls(&self) -> (Option<String>, Option<String>) {
        match self.badge_name.as_deref() {
            Some(badge) if !badge.is_empty() => (
                Some(format!("{BADGE_URL_BASE}{badge}.png")),
                Some(format!("{BADGE_URL_BASE}{badge}_lock.png")),
            ),
            _ => (None, None),
        }
    }

    fn into_detail(self, num_distinct_players: Option<u32>) -> AchievementDetail {
        let rarity_percent = self.rarity_percent(num_distinct_players);
        let (icon_unlocked, icon_locked) = self.badge_urls();
        let unlocked = self.date_earned.is_some();
        AchievementDetail {
            api_name: self.id.to_string(),
            name: self.title,
            description: self.description,
            icon_unlocked,
            icon_locked,
            hidden: false,
            unlocked,
            unlock_time_utc: self.date_earned,
            rarity_percent,
            tier: None,
            capstone: self.kind.as_deref() == Some(WIN_CONDITION_TYPE),
            category: None,
        }
    }
}

impl CatalogGame {
    /// Flattens the achievement map into normalized details sorted by
    /// numeric id, so output order is stable across runs.
    pub fn into_details(self) -> Vec<AchievementDetail> {
        let players = self.num_distinct_players;
        let mut entries: Vec<CatalogAchievement> = self.achievements.into_values().collect();
        entries.sort_by_key(|a| a.id);
        entries.into_iter().map(|a| a.into_detail(players)).collect()
    }
}

/// Catalog timestamps come as "2023-05-01 17:04:33" in UTC; newer
/// endpoints use RFC 3339. Accept both, treat empty as absent.
fn deserialize_catalog_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => parse_catalog_date(s).map(Some).map_err(serde::de::Error::custom),
    }
}

fn parse_catalog_date(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad catalog date {s:?}: {e}"))
}
