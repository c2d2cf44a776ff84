//! Rarity bucketing over provider ownership percentages

use serde::{Deserialize, Serialize};

use crate::models::AchievementDetail;

/// Percent cutoffs separating the four rarity buckets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RarityThresholds {
    pub ultra_rare: f64,
    pub rare: f64,
    pub uncommon: f64,
}

impl Default for RarityThresholds {
    fn default() -> Self {
        Self {
            ultra_rare: 5.0,
            rare: 10.0,
            uncommon: 30.0,
        }
    }
}

/// Totals accumulated by one rarity bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    pub total: u32,
    pub unlocked: u32,
    pub locked: u32,
}

impl BucketCounts {
    fn add(&mut self, unlocked: bool) {
        self.total += 1;
        if unlocked {
            self.unlocked += 1;
        } else {
            self.locked += 1;
        }
    }
}

/// Bucketed rarity totals for one game's achievement list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RarityBuckets {
    pub common: BucketCounts,
    pub uncommon: BucketCounts,
    pub rare: BucketCounts,
    pub ultra_rare: BucketCounts,
}

impl RarityBuckets {
    /// Tally every item carrying a positive rarity percent.
    ///
    /// A percent exactly equal to a threshold counts toward the more
    /// common bucket. Items without a percent, or with percent <= 0
    /// (unknown rarity), are counted nowhere.
    pub fn tally<'a, I>(items: I, thresholds: &RarityThresholds) -> Self
    where
        I: IntoIterator<Item = &'a AchievementDetail>,
    {
        let mut buckets = Self::default();
        for item in items {
            let percent = match item.rarity_percent {
                Some(p) if p > 0.0 => p,
                _ => continue,
            };
            let bucket = if percent >= thresholds.uncommon {
                &mut buckets.common
            } else if percent >= thresholds.rare {
                &mut buckets.uncommon
            } else if percent >= thresholds.ultra_rare {
                &mut buckets.rare
            } else {
                &mut buckets.ultra_rare
            };
            bucket.add(item.unlocked);
        }
        buckets
    }

    /// Items counted across all four buckets
    pub fn counted_total(&self) -> u32 {
        self.common.total + self.uncommon.total + self.rare.total + self.ultra_rare.total
    }
}
