//! Detect busy intervals that collide with a proposed slot.
//!
//! Adjacent intervals (one ends exactly when the other starts) are NOT
//! conflicts.

use crate::availability::ParticipantAvailability;
use crate::interval::{BusyInterval, TimeRange};

/// A participant whose calendar already has something inside the slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotConflict {
    pub participant_id: String,
    pub busy: BusyInterval,
    pub overlap_minutes: i64,
}

/// Busy intervals from `busy` that overlap `slot`.
pub fn overlapping<'a>(
    slot: &'a TimeRange,
    busy: &'a [BusyInterval],
) -> impl Iterator<Item = &'a BusyInterval> + 'a {
    busy.iter().filter(move |b| b.range().overlaps(slot))
}

/// Every (participant, busy interval) pair that overlaps `slot`.
pub fn find_conflicts(
    slot: &TimeRange,
    participants: &[ParticipantAvailability],
) -> Vec<SlotConflict> {
    let mut conflicts = Vec::new();

    for p in participants {
        for b in overlapping(slot, p.busy()) {
            conflicts.push(SlotConflict {
                participant_id: p.participant_id.clone(),
                busy: *b,
                overlap_minutes: b.range().overlap_minutes(slot),
            });
        }
    }

    conflicts
}
