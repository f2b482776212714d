//! Candidate slot selection.
//!
//! Intersects every participant's free time inside the request window and
//! proposes slots of exactly the requested duration, best first.
//!
//! Ranking is earliest-first. Candidates that start at the same instant are
//! ordered by the total idle gap (summed across participants) immediately
//! before and after the slot, smallest first, which favors slots that sit
//! snugly against existing commitments.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::availability::{common_free_intervals, ParticipantAvailability};
use crate::error::{Result, SlotError};
use crate::freebusy::subtract_ranges;
use crate::interval::TimeRange;

/// Tunables for candidate generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    /// How many candidates to take from each common free interval. With `1`,
    /// only the earliest-starting slot of each interval is proposed.
    pub candidates_per_interval: u32,
    /// Distance between successive candidates inside one interval.
    pub step_minutes: u32,
    /// Round candidate starts up to a multiple of this many minutes
    /// (measured from the Unix epoch). `0` disables alignment.
    pub alignment_minutes: u32,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            candidates_per_interval: 1,
            step_minutes: 15,
            alignment_minutes: 0,
        }
    }
}

/// What to look for.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotQuery {
    pub duration_minutes: i64,
    /// The request's `[earliest, latest)` bound.
    pub window: TimeRange,
    /// Candidates never start before this instant.
    pub now: DateTime<Utc>,
    /// Ranges that must not be proposed again (previously attempted slots).
    pub excluded: Vec<TimeRange>,
}

/// Ranking key; smaller is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotScore {
    /// Minutes from the window's earliest bound to the slot start.
    pub start_offset_minutes: i64,
    /// Idle minutes around the slot, summed across participants.
    pub idle_minutes: i64,
}

/// A proposed slot of exactly the requested duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub score: SlotScore,
}

impl CandidateSlot {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }
}

/// Produces ranked candidate sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotSelector {
    policy: SelectionPolicy,
}

impl SlotSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Lazily enumerate candidates, best first.
    ///
    /// # Errors
    /// `SlotError::InvalidRequest` when there are no participants, the
    /// duration is not positive, the window already lies in the past, or the
    /// policy is degenerate. An empty (but valid) result means no common slot.
    pub fn candidates<'a>(
        &self,
        participants: &'a [ParticipantAvailability],
        query: &SlotQuery,
    ) -> Result<Candidates<'a>> {
        if participants.is_empty() {
            return Err(SlotError::InvalidRequest(
                "at least one participant is required".to_string(),
            ));
        }
        if query.duration_minutes <= 0 {
            return Err(SlotError::InvalidRequest(format!(
                "duration must be positive, got {} minutes",
                query.duration_minutes
            )));
        }
        if query.window.end <= query.now {
            return Err(SlotError::InvalidRequest(format!(
                "window ending {} is already in the past",
                query.window.end.to_rfc3339()
            )));
        }
        if self.policy.candidates_per_interval == 0 || self.policy.step_minutes == 0 {
            return Err(SlotError::InvalidRequest(
                "selection policy needs at least one candidate per interval and a positive step"
                    .to_string(),
            ));
        }

        let duration = Duration::try_minutes(query.duration_minutes).ok_or_else(|| {
            SlotError::InvalidRequest(format!(
                "duration of {} minutes is out of range",
                query.duration_minutes
            ))
        })?;

        let effective = TimeRange {
            start: query.window.start.max(query.now),
            end: query.window.end,
        };
        let common = common_free_intervals(participants, &effective);
        let free = subtract_ranges(&common, &query.excluded);

        Ok(Candidates {
            participants,
            window: query.window,
            free,
            duration,
            policy: self.policy,
            cursor: Cursor::default(),
            ready: VecDeque::new(),
        })
    }

    /// The single best candidate, if any.
    pub fn best(
        &self,
        participants: &[ParticipantAvailability],
        query: &SlotQuery,
    ) -> Result<Option<CandidateSlot>> {
        Ok(self.candidates(participants, query)?.next())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Cursor {
    interval: usize,
    offset: u32,
}

/// A lazy, finite, restartable sequence of candidates ordered by score.
///
/// Clone it (or call [`Candidates::restart`]) to iterate again from the top.
#[derive(Debug, Clone)]
pub struct Candidates<'a> {
    participants: &'a [ParticipantAvailability],
    window: TimeRange,
    free: Vec<TimeRange>,
    duration: Duration,
    policy: SelectionPolicy,
    cursor: Cursor,
    ready: VecDeque<CandidateSlot>,
}

impl<'a> Candidates<'a> {
    /// The common free intervals candidates are drawn from.
    pub fn free_intervals(&self) -> &[TimeRange] {
        &self.free
    }

    /// Rewind to the best candidate.
    pub fn restart(&mut self) {
        self.cursor = Cursor::default();
        self.ready.clear();
    }

    fn align(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let step = i64::from(self.policy.alignment_minutes) * 60;
        if step == 0 {
            return at;
        }
        let secs = at.timestamp();
        let rem = secs.rem_euclid(step);
        if rem == 0 && at.timestamp_subsec_nanos() == 0 {
            return at;
        }
        DateTime::from_timestamp(secs - rem + step, 0).unwrap_or(at)
    }

    /// The start of the candidate at `cursor`, advancing past exhausted
    /// intervals. Returns the normalized cursor with it.
    fn raw_at(&self, mut cursor: Cursor) -> Option<(Cursor, TimeRange)> {
        while let Some(interval) = self.free.get(cursor.interval) {
            if cursor.offset < self.policy.candidates_per_interval {
                if let Some(range) = self.candidate_in(interval, cursor.offset) {
                    return Some((cursor, range));
                }
            }
            cursor = Cursor {
                interval: cursor.interval + 1,
                offset: 0,
            };
        }
        None
    }

    /// The `offset`-th candidate of `interval`, if it still fits. Offsets
    /// too large to represent cannot fit either.
    fn candidate_in(&self, interval: &TimeRange, offset: u32) -> Option<TimeRange> {
        let minutes = i64::from(self.policy.step_minutes).checked_mul(i64::from(offset))?;
        let start = self
            .align(interval.start)
            .checked_add_signed(Duration::try_minutes(minutes)?)?;
        let end = start.checked_add_signed(self.duration)?;
        (end <= interval.end).then_some(TimeRange { start, end })
    }

    fn advance(cursor: Cursor) -> Cursor {
        Cursor {
            interval: cursor.interval,
            offset: cursor.offset + 1,
        }
    }

    fn score(&self, range: &TimeRange) -> CandidateSlot {
        let idle: Duration = self
            .participants
            .iter()
            .map(|p| p.idle_gap_around(range, &self.window))
            .fold(Duration::zero(), |acc, d| acc + d);
        CandidateSlot {
            start: range.start,
            end: range.end,
            score: SlotScore {
                start_offset_minutes: (range.start - self.window.start).num_minutes(),
                idle_minutes: idle.num_minutes(),
            },
        }
    }
}

impl Iterator for Candidates<'_> {
    type Item = CandidateSlot;

    fn next(&mut self) -> Option<CandidateSlot> {
        if let Some(c) = self.ready.pop_front() {
            return Some(c);
        }

        let (cursor, first) = self.raw_at(self.cursor)?;
        self.cursor = Self::advance(cursor);

        // Gather every raw candidate sharing this start and order the group
        // by idle gap.
        let mut group = vec![self.score(&first)];
        while let Some((cursor, next)) = self.raw_at(self.cursor) {
            if next.start != first.start {
                break;
            }
            self.cursor = Self::advance(cursor);
            group.push(self.score(&next));
        }
        group.sort_by_key(|c| c.score);

        self.ready.extend(group);
        self.ready.pop_front()
    }
}
