//! Local trophy scan provider.
//!
//! One refresh pass pairs an installed game with its trophy set folder,
//! parses the definition, overlays unlock state from the ledger, and
//! returns a normalized snapshot. Failures never abort a library scan:
//! they are logged and reported as an empty snapshot for that game.

use std::path::Path;
use std::sync::mpsc::Sender;

use tracing::{debug, warn};

use questlog_core::cancel::CancelToken;
use questlog_core::models::GameAchievementData;
use questlog_core::settings::ScanSettings;

use crate::error::{FormatError, Result};
use crate::trophy::config::{self, TrophyDefinition};
use crate::trophy::container::TrpContainer;
use crate::trophy::ledger;
use crate::trophy::locate::{self, TrophyFolderCache, CONTAINER_FILE, DEFINITION_FILE, LEDGER_FILE};
use crate::trophy::{apply_unlocks, to_game_data};

/// Provider tag recorded on every snapshot this module produces.
pub const TROPHY_PROVIDER: &str = "trophy";

/// Progress notes emitted while a single game refreshes.
#[derive(Clone)]
pub enum RefreshProgress {
    Started { title: String },
    Resolved { title: String, npcommid: String },
    Finished { title: String, unlocked: usize, total: usize },
    Failed { title: String, message: String },
}

/// Refresh trophy state for one installed game.
///
/// Infallible by contract: a game whose trophy data is missing, orphaned
/// or unreadable yields an empty snapshot so the rest of the library scan
/// keeps going.
pub fn refresh_trophy_game(
    install_path: &Path,
    title: &str,
    cache: &TrophyFolderCache,
    settings: &ScanSettings,
    cancel: &CancelToken,
    progress_tx: &Sender<RefreshProgress>,
) -> GameAchievementData {
    let _ = progress_tx.send(RefreshProgress::Started {
        title: title.to_string(),
    });
    match try_refresh(install_path, title, cache, settings, cancel, progress_tx) {
        Ok(data) => {
            let _ = progress_tx.send(RefreshProgress::Finished {
                title: title.to_string(),
                unlocked: data.unlocked_count(),
                total: data.total_count(),
            });
            data
        }
        Err(e) => {
            warn!("trophy refresh failed for {title}: {e}");
            let _ = progress_tx.send(RefreshProgress::Failed {
                title: title.to_string(),
                message: e.to_string(),
            });
            GameAchievementData::empty(TROPHY_PROVIDER, title, "")
        }
    }
}

fn try_refresh(
    install_path: &Path,
    title: &str,
    cache: &TrophyFolderCache,
    settings: &ScanSettings,
    cancel: &CancelToken,
    progress_tx: &Sender<RefreshProgress>,
) -> Result<GameAchievementData> {
    if cancel.is_cancelled() {
        return Err(FormatError::Cancelled);
    }
    let language = settings.trophy_language.as_deref();

    let Some(npcommid) =
        locate::discover_id(install_path, title, cache, language, settings.fuzzy_min_score)
    else {
        debug!("no trophy set found for {title}");
        return Ok(GameAchievementData::empty(TROPHY_PROVIDER, title, ""));
    };
    let _ = progress_tx.send(RefreshProgress::Resolved {
        title: title.to_string(),
        npcommid: npcommid.clone(),
    });

    // Companion files can name a set that was never installed under the
    // data root; without its folder there is nothing to read.
    let Some(folder) = cache.find_by_id(&npcommid) else {
        debug!("{npcommid} resolved for {title} but no trophy folder holds it");
        return Ok(GameAchievementData::empty(TROPHY_PROVIDER, title, npcommid));
    };

    if cancel.is_cancelled() {
        return Err(FormatError::Cancelled);
    }

    let definition = load_definition(&folder.path, language)?;
    let mut trophies = definition.trophies;
    let records = ledger::read_unlocks(&folder.path.join(LEDGER_FILE), trophies.len())?;
    apply_unlocks(&mut trophies, &records);

    Ok(to_game_data(TROPHY_PROVIDER, title, npcommid, trophies))
}

/// Load the trophy definition from a set folder: a loose TROPCONF.SFM
/// wins, otherwise the copy packed inside TROPHY.TRP.
pub fn load_definition(dir: &Path, language: Option<&str>) -> Result<TrophyDefinition> {
    let loose = dir.join(DEFINITION_FILE);
    if loose.is_file() {
        let xml = std::fs::read_to_string(&loose)?;
        return config::parse_definition(&xml, language);
    }
    let packed = dir.join(CONTAINER_FILE);
    if packed.is_file() {
        let bytes = TrpContainer::open(&packed)?.read_entry(DEFINITION_FILE)?;
        return config::parse_definition(&String::from_utf8_lossy(&bytes), language);
    }
    Err(FormatError::invalid(
        "trophy folder",
        format!("{} has no definition", dir.display()),
    ))
}
