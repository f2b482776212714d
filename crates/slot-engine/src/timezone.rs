//! Timezone resolution for raw provider data.
//!
//! Providers report busy time either as absolute instants, as floating local
//! date-times (wall time in the calendar's timezone), or as all-day dates.
//! Everything is normalized to UTC, the reference timezone of this crate.

use chrono::{
    DateTime, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlotError};
use crate::interval::{BusyInterval, ProviderKind, TimeRange};

/// Longest DST gap we search across when resolving a nonexistent local time.
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// Policy for local times that fall inside a DST gap (e.g. 02:30 on a
/// spring-forward night).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DstPolicy {
    /// Drop the entry that references the nonexistent time.
    Skip,
    /// Move to the first valid instant after the gap.
    ShiftForward,
    /// Keep the wall time, interpreted with the offset in force before the
    /// transition (02:30 becomes 03:30 after a one-hour spring-forward).
    #[default]
    WallClock,
}

/// A single endpoint of a raw busy entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTime {
    /// An absolute instant with its UTC offset.
    Instant(DateTime<FixedOffset>),
    /// Wall time in the calendar's timezone.
    Floating(NaiveDateTime),
    /// Midnight of the given date in the calendar's timezone.
    AllDay(NaiveDate),
}

/// A busy entry as a provider reports it, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBusy {
    pub start: EventTime,
    pub end: EventTime,
}

impl RawBusy {
    /// A raw entry from two UTC instants.
    pub fn utc(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: EventTime::Instant(start.fixed_offset()),
            end: EventTime::Instant(end.fixed_offset()),
        }
    }
}

/// Parse an IANA timezone identifier.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| SlotError::InvalidTimezone(name.to_string()))
}

/// Resolve a wall-clock time in `tz` to UTC.
///
/// Ambiguous times (fall-back overlap) take the earlier instant. Returns
/// `None` only when the time is nonexistent and `policy` is [`DstPolicy::Skip`].
pub fn resolve_local(naive: NaiveDateTime, tz: Tz, policy: DstPolicy) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, _) => Some(earlier.with_timezone(&Utc)),
        LocalResult::None => match policy {
            DstPolicy::Skip => None,
            DstPolicy::ShiftForward => first_valid_after(naive, tz),
            DstPolicy::WallClock => {
                let before = last_valid_before(naive, tz)?;
                let offset = before.offset().fix();
                Some((naive - Duration::seconds(offset.local_minus_utc() as i64)).and_utc())
            }
        },
    }
}

fn first_valid_after(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    // Walk forward on whole minutes; the first resolvable wall time is the
    // transition instant.
    let base = naive.with_second(0)?.with_nanosecond(0)?;
    (1..=MAX_GAP_MINUTES).find_map(|m| {
        tz.from_local_datetime(&(base + Duration::minutes(m)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn last_valid_before(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    (1..=MAX_GAP_MINUTES).find_map(|m| {
        tz.from_local_datetime(&(naive - Duration::minutes(m)))
            .latest()
    })
}

/// Resolve one endpoint to UTC.
pub fn to_utc(time: &EventTime, tz: Tz, policy: DstPolicy) -> Option<DateTime<Utc>> {
    match time {
        EventTime::Instant(dt) => Some(dt.with_timezone(&Utc)),
        EventTime::Floating(naive) => resolve_local(*naive, tz, policy),
        EventTime::AllDay(date) => resolve_local(date.and_time(NaiveTime::MIN), tz, policy),
    }
}

/// Normalize raw provider entries to UTC busy intervals.
///
/// Entries whose endpoints cannot be resolved, or that are empty or inverted
/// after resolution, are dropped. The output is not yet merged.
pub fn normalize_busy(
    raw: &[RawBusy],
    tz: Tz,
    policy: DstPolicy,
    source: ProviderKind,
) -> Vec<BusyInterval> {
    raw.iter()
        .filter_map(|entry| {
            let start = to_utc(&entry.start, tz, policy)?;
            let end = to_utc(&entry.end, tz, policy)?;
            TimeRange::new(start, end)
                .ok()
                .map(|range| BusyInterval::new(range, source))
        })
        .collect()
}
