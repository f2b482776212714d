//! Per-participant availability and the k-way intersection of free time.
//!
//! A [`ParticipantAvailability`] holds one participant's busy intervals after
//! normalization to UTC: sorted by start and non-overlapping. The intersection
//! of every participant's free time is computed with a sweep over interval
//! boundaries.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::freebusy::{self, merge_busy};
use crate::interval::{BusyInterval, ProviderKind, TimeRange};
use crate::timezone::{normalize_busy, DstPolicy, RawBusy};

/// One participant's busy time for a single scheduling attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantAvailability {
    pub participant_id: String,
    /// Merged busy intervals (sorted by start, non-overlapping).
    busy: Vec<BusyInterval>,
    /// The participant's calendar timezone. Busy data is already in UTC; this
    /// is kept for presenting slots to the participant.
    pub timezone: Tz,
}

impl ParticipantAvailability {
    /// Build from busy intervals in any order; they are merged here.
    pub fn new(participant_id: impl Into<String>, timezone: Tz, busy: &[BusyInterval]) -> Self {
        Self {
            participant_id: participant_id.into(),
            busy: merge_busy(busy),
            timezone,
        }
    }

    /// Normalize raw provider entries (plus already-expanded recurring
    /// blocks) into a merged availability clipped to `window`.
    pub fn from_raw(
        participant_id: impl Into<String>,
        timezone: Tz,
        raw: &[RawBusy],
        recurring: &[BusyInterval],
        window: &TimeRange,
        policy: DstPolicy,
        source: ProviderKind,
    ) -> Self {
        let mut busy = normalize_busy(raw, timezone, policy, source);
        busy.extend_from_slice(recurring);
        Self {
            participant_id: participant_id.into(),
            busy: freebusy::merge_busy_within(&busy, window),
            timezone,
        }
    }

    pub fn busy(&self) -> &[BusyInterval] {
        &self.busy
    }

    /// Free ranges within `window`.
    pub fn free_within(&self, window: &TimeRange) -> Vec<TimeRange> {
        freebusy::free_intervals(&self.busy, window)
    }

    /// True when no busy interval overlaps `range`.
    pub fn is_free(&self, range: &TimeRange) -> bool {
        // Busy is sorted; only intervals starting before range.end can overlap.
        let upto = self.busy.partition_point(|b| b.start < range.end);
        !self.busy[..upto].iter().any(|b| b.end > range.start)
    }

    /// Idle time immediately before and after `slot`: the gap back to the
    /// previous busy interval (or the window start) plus the gap forward to
    /// the next busy interval (or the window end).
    pub fn idle_gap_around(&self, slot: &TimeRange, window: &TimeRange) -> Duration {
        let before_idx = self.busy.partition_point(|b| b.end <= slot.start);
        let previous_end = before_idx
            .checked_sub(1)
            .map(|i| self.busy[i].end)
            .unwrap_or(window.start)
            .max(window.start);

        let after_idx = self.busy.partition_point(|b| b.start < slot.end);
        let next_start = self
            .busy
            .get(after_idx)
            .map(|b| b.start)
            .unwrap_or(window.end)
            .min(window.end);

        let before = (slot.start - previous_end).max(Duration::zero());
        let after = (next_start - slot.end).max(Duration::zero());
        before + after
    }
}

/// Boundary event in the sweep. Ends sort before starts at the same instant so
/// that half-open ranges touching at a point never count as simultaneous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Edge {
    End,
    Start,
}

/// Ranges inside `window` where every participant is free.
///
/// Builds each participant's free set as the complement of their busy
/// intervals, then sweeps all boundaries in time order tracking how many
/// participants are free; output ranges are those where the count equals the
/// participant count. With no participants the whole window is free.
pub fn common_free_intervals(
    participants: &[ParticipantAvailability],
    window: &TimeRange,
) -> Vec<TimeRange> {
    if participants.is_empty() {
        return vec![*window];
    }

    let mut edges: Vec<(DateTime<Utc>, Edge)> = Vec::new();
    for p in participants {
        for free in p.free_within(window) {
            edges.push((free.start, Edge::Start));
            edges.push((free.end, Edge::End));
        }
    }
    edges.sort();

    let needed = participants.len();
    let mut free_count = 0usize;
    let mut open_at: Option<DateTime<Utc>> = None;
    let mut out: Vec<TimeRange> = Vec::new();

    for (at, edge) in edges {
        match edge {
            Edge::Start => {
                free_count += 1;
                if free_count == needed {
                    open_at = Some(at);
                }
            }
            Edge::End => {
                if free_count == needed {
                    if let Some(start) = open_at.take() {
                        push_coalesced(&mut out, start, at);
                    }
                }
                free_count -= 1;
            }
        }
    }

    out
}

fn push_coalesced(out: &mut Vec<TimeRange>, start: DateTime<Utc>, end: DateTime<Utc>) {
    if start >= end {
        return;
    }
    if let Some(last) = out.last_mut() {
        if last.end == start {
            last.end = end;
            return;
        }
    }
    out.push(TimeRange { start, end });
}
