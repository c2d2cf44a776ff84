//! Trophy set parsing for disc-console save data.
//!
//! A game's trophy set is split across files: the XML definition
//! ([`config`]) names every trophy, the binary ledger ([`ledger`]) records
//! which are unlocked and when, and both may travel inside a TRP container
//! ([`container`]). [`locate`] finds which trophy folder belongs to a
//! library entry. This module holds the intermediate [`Trophy`] record and
//! the conversion into the shared [`GameAchievementData`] shape.

pub mod config;
pub mod container;
pub mod ledger;
pub mod locate;

use chrono::{DateTime, Utc};
use questlog_core::models::{AchievementDetail, GameAchievementData, TrophyTier};

use crate::trophy::ledger::UnlockRecord;

/// One trophy as defined by the XML config, plus its unlock state.
#[derive(Debug, Clone, PartialEq)]
pub struct Trophy {
    pub id: i32,
    pub tier: TrophyTier,
    pub hidden: bool,
    pub name: String,
    pub detail: String,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub unlocked: bool,
    pub unlock_time: Option<DateTime<Utc>>,
}

/// Merge ledger records into the definition's trophies by position.
///
/// The definition keeps trophies in ascending id order, which is the order
/// ledger entries are written in.
pub fn apply_unlocks(trophies: &mut [Trophy], records: &[UnlockRecord]) {
    for (trophy, record) in trophies.iter_mut().zip(records) {
        trophy.unlocked = record.unlocked;
        trophy.unlock_time = if record.unlocked {
            record.unlock_time
        } else {
            None
        };
    }
}

/// Convert a merged trophy list into the provider-neutral snapshot.
pub fn to_game_data(
    provider: impl Into<String>,
    source_name: impl Into<String>,
    game_id: impl Into<String>,
    trophies: Vec<Trophy>,
) -> GameAchievementData {
    let items = trophies
        .into_iter()
        .map(|trophy| AchievementDetail {
            api_name: trophy.id.to_string(),
            name: trophy.name,
            description: (!trophy.detail.is_empty()).then_some(trophy.detail),
            icon_unlocked: None,
            icon_locked: None,
            hidden: trophy.hidden,
            unlocked: trophy.unlocked,
            unlock_time_utc: if trophy.unlocked {
                trophy.unlock_time
            } else {
                None
            },
            rarity_percent: None,
            tier: Some(trophy.tier),
            // Earning platinum means everything else is done.
            capstone: trophy.tier == TrophyTier::Platinum,
            category: trophy.group_name.or(trophy.group_id),
        })
        .collect();
    GameAchievementData::new(provider, source_name, game_id, items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn trophy(id: i32, tier: TrophyTier) -> Trophy {
        Trophy {
            id,
            tier,
            hidden: false,
            name: format!("Trophy {id}"),
            detail: String::new(),
            group_id: None,
            group_name: None,
            unlocked: false,
            unlock_time: None,
        }
    }

    #[test]
    fn test_apply_unlocks_zips_by_position() {
        let mut trophies = vec![trophy(0, TrophyTier::Platinum), trophy(1, TrophyTier::Gold)];
        let when = Utc.with_ymd_and_hms(2011, 3, 9, 18, 0, 0).unwrap();
        let records = vec![
            UnlockRecord {
                unlocked: false,
                unlock_time: None,
            },
            UnlockRecord {
                unlocked: true,
                unlock_time: Some(when),
            },
        ];
        apply_unlocks(&mut trophies, &records);
        assert!(!trophies[0].unlocked);
        assert!(trophies[1].unlocked);
        assert_eq!(trophies[1].unlock_time, Some(when));
    }

    #[test]
    fn test_locked_record_clears_stray_timestamp() {
        let mut trophies = vec![trophy(0, TrophyTier::Bronze)];
        trophies[0].unlock_time = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        apply_unlocks(
            &mut trophies,
            &[UnlockRecord {
                unlocked: false,
                unlock_time: None,
            }],
        );
        assert!(!trophies[0].unlocked);
        assert_eq!(trophies[0].unlock_time, None);
    }

    #[test]
    fn test_to_game_data_maps_tiers_and_groups() {
        let mut platinum = trophy(0, TrophyTier::Platinum);
        platinum.unlocked = true;
        let mut dlc = trophy(5, TrophyTier::Bronze);
        dlc.group_id = Some("001".to_string());
        dlc.group_name = Some("Expansion Pack".to_string());
        dlc.detail = "Finish the new chapter".to_string();

        let data = to_game_data("trophy", "library", "NPWR00123_00", vec![platinum, dlc]);
        assert_eq!(data.game_id, "NPWR00123_00");
        assert_eq!(data.total_count(), 2);
        assert_eq!(data.unlocked_count(), 1);

        let first = &data.items[0];
        assert_eq!(first.api_name, "0");
        assert!(first.capstone);
        assert_eq!(first.tier, Some(TrophyTier::Platinum));
        assert_eq!(first.description, None);

        let second = &data.items[1];
        assert!(!second.capstone);
        assert_eq!(second.category.as_deref(), Some("Expansion Pack"));
        assert_eq!(second.description.as_deref(), Some("Finish the new chapter"));
    }
}
