//! Binary unlock ledger (TROPUSR.DAT).
//!
//! The ledger is a record file without a usable table of contents; entries
//! are found by scanning for a fixed 8-byte type marker. Firmware versions
//! differ in which marker they write, and the file accumulates stale
//! records at the front as sets are updated, so only the last N entries
//! (N = trophy count) are live.

use std::path::Path;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use tracing::debug;

use crate::error::Result;
use crate::util::{slice_u32_be, slice_u64_be};

/// Entry markers by firmware generation; the first kind present wins.
const ENTRY_MAGICS: [[u8; 8]; 2] = [
    [0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x50],
    [0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x60],
];

const ENTRY_MIN_LEN: usize = 0x20;
const UNLOCK_FLAG_OFFSET: usize = 0x14;
const TIMESTAMP_OFFSET: usize = 0x18;
const UNLOCKED_SENTINEL: u32 = 0x0000_0001;

/// Unlock state for one trophy slot, in ledger order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockRecord {
    pub unlocked: bool,
    pub unlock_time: Option<DateTime<Utc>>,
}

impl UnlockRecord {
    pub const LOCKED: Self = Self {
        unlocked: false,
        unlock_time: None,
    };
}

/// Read unlock records for `trophy_count` trophies. A missing ledger file
/// is a normal state (nothing earned yet) and yields all-locked records.
pub fn read_unlocks(path: &Path, trophy_count: usize) -> Result<Vec<UnlockRecord>> {
    match std::fs::read(path) {
        Ok(data) => Ok(parse_unlocks(&data, trophy_count)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no unlock ledger at {}, all locked", path.display());
            Ok(vec![UnlockRecord::LOCKED; trophy_count])
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse ledger bytes into exactly `trophy_count` records.
///
/// Decoding never fails: a ledger we cannot line up with the definition
/// (no markers, too few entries) degrades to all-locked with a debug note.
pub fn parse_unlocks(data: &[u8], trophy_count: usize) -> Vec<UnlockRecord> {
    let all_locked = vec![UnlockRecord::LOCKED; trophy_count];

    let Some(offsets) = find_entry_offsets(data) else {
        debug!("unlock ledger: no entry markers found");
        return all_locked;
    };

    let mut entries: Vec<&[u8]> = Vec::with_capacity(offsets.len());
    for (i, &start) in offsets.iter().enumerate() {
        let begin = start + ENTRY_MAGICS[0].len();
        let end = offsets.get(i + 1).copied().unwrap_or(data.len());
        let entry = &data[begin..end];
        if entry.len() < ENTRY_MIN_LEN {
            debug!("unlock ledger: entry {i} is {} bytes, skipped", entry.len());
            continue;
        }
        entries.push(entry);
    }

    if entries.len() < trophy_count {
        debug!(
            "unlock ledger: {} usable entries for {trophy_count} trophies, all locked",
            entries.len()
        );
        return all_locked;
    }

    // Leading entries are stale padding from earlier set revisions.
    entries[entries.len() - trophy_count..]
        .iter()
        .map(|entry| parse_entry(entry))
        .collect()
}

/// All start offsets of the first marker kind that occurs in the data.
fn find_entry_offsets(data: &[u8]) -> Option<Vec<usize>> {
    for magic in &ENTRY_MAGICS {
        let offsets: Vec<usize> = data
            .windows(magic.len())
            .enumerate()
            .filter(|(_, window)| window == magic)
            .map(|(i, _)| i)
            .collect();
        if !offsets.is_empty() {
            return Some(offsets);
        }
    }
    None
}

fn parse_entry(entry: &[u8]) -> UnlockRecord {
    // Exact sentinel comparison; other values mean locked or corrupt.
    let unlocked = slice_u32_be(entry, UNLOCK_FLAG_OFFSET, "ledger entry")
        .map(|flag| flag == UNLOCKED_SENTINEL)
        .unwrap_or(false);
    if !unlocked {
        return UnlockRecord::LOCKED;
    }

    let unlock_time = slice_u64_be(entry, TIMESTAMP_OFFSET, "ledger entry")
        .ok()
        .and_then(ticks_to_datetime);
    UnlockRecord {
        unlocked: true,
        unlock_time,
    }
}

/// Convert a tick count of microseconds since 0001-01-01 UTC. Zero and
/// anything past year 9999 are treated as "no usable timestamp".
fn ticks_to_datetime(micros: u64) -> Option<DateTime<Utc>> {
    if micros == 0 {
        return None;
    }
    let micros = i64::try_from(micros).ok()?;
    let base = Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).single()?;
    let time = base.checked_add_signed(Duration::microseconds(micros))?;
    (time.year() <= 9999).then_some(time)
}
