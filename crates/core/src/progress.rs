//! Score and level computation over trophy tiers

use serde::{Deserialize, Serialize};

use crate::models::AchievementDetail;

/// Point total contributed by the unlocked, tiered subset of `items`
pub fn unlocked_score(items: &[AchievementDetail]) -> u32 {
    items
        .iter()
        .filter(|a| a.unlocked)
        .filter_map(|a| a.tier)
        .map(|t| t.points())
        .sum()
}

/// Position on a provider level ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub level: u32,
    pub rank: String,
    /// Progress through the current level, 0-100, rounded to 2 decimals
    pub to_next_percent: f64,
}

/// Maps a trophy score to a ladder position.
///
/// Implementations must be monotonic in score and deterministic, and must
/// draw rank labels from a fixed ordered tier list.
pub trait LevelCurve {
    fn evaluate(&self, score: u32) -> LevelProgress;
}

/// Widening-bracket ladder modeled on the disc-console provider's revised
/// leveling system: early levels are cheap, later ones cost a fixed larger
/// amount per level.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCurve;

// (levels spanned, points per level)
const BRACKETS: &[(u32, u32)] = &[(12, 60), (12, 90), (75, 450), (100, 900)];
const TOP_BRACKET_WIDTH: u32 = 1350;

// Rank label applies from the listed level upward.
const RANKS: &[(u32, &str)] = &[
    (1, "Bronze"),
    (100, "Silver"),
    (200, "Gold"),
    (300, "Platinum"),
];

fn rank_for(level: u32) -> &'static str {
    let mut label = RANKS[0].1;
    for &(floor, name) in RANKS {
        if level >= floor {
            label = name;
        }
    }
    label
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl LevelCurve for StandardCurve {
    fn evaluate(&self, score: u32) -> LevelProgress {
        let mut level = 1u32;
        let mut remaining = score;

        for &(count, per) in BRACKETS {
            let climbed = (remaining / per).min(count);
            level += climbed;
            remaining -= climbed * per;
            if climbed < count {
                return LevelProgress {
                    level,
                    rank: rank_for(level).to_string(),
                    to_next_percent: round2(remaining as f64 * 100.0 / per as f64),
                };
            }
        }

        let climbed = remaining / TOP_BRACKET_WIDTH;
        level += climbed;
        remaining -= climbed * TOP_BRACKET_WIDTH;
        LevelProgress {
            level,
            rank: rank_for(level).to_string(),
            to_next_percent: round2(remaining as f64 * 100.0 / TOP_BRACKET_WIDTH as f64),
        }
    }
}
