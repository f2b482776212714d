//! Half-open time ranges and the busy intervals calendar providers report.
//!
//! Every range in this crate is `[start, end)`: a range that ends exactly when
//! another begins does not overlap it.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlotError};

/// A half-open UTC time range `[start, end)` with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, rejecting empty or inverted input.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(SlotError::InvalidInterval(format!(
                "end {} is not after start {}",
                end.to_rfc3339(),
                start.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// A range of `minutes` starting at `start`.
    pub fn starting_at(start: DateTime<Utc>, minutes: i64) -> Result<Self> {
        Self::new(start, start + Duration::minutes(minutes))
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    /// Two ranges overlap iff `a.start < b.end && b.start < a.end`.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when `other` lies entirely inside this range.
    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// The part of this range inside `window`, if any.
    pub fn clip(&self, window: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (start < end).then_some(TimeRange { start, end })
    }

    /// Minutes shared with `other` (zero when disjoint or adjacent).
    pub fn overlap_minutes(&self, other: &TimeRange) -> i64 {
        self.clip(other).map(|r| r.duration_minutes()).unwrap_or(0)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Which family of calendar backend produced a busy interval.
///
/// New backends are added by implementing the provider capability, not by
/// branching on this tag; it exists for diagnostics and attribution only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    GoogleCalendar,
    Office365,
    #[default]
    Generic,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::GoogleCalendar => "google_calendar",
            ProviderKind::Office365 => "office365",
            ProviderKind::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// A normalized (UTC) period during which a participant is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Provider that reported the interval. After merging, the interval keeps
    /// the source of the entry that opened it.
    pub source: ProviderKind,
}

impl BusyInterval {
    pub fn new(range: TimeRange, source: ProviderKind) -> Self {
        Self {
            start: range.start,
            end: range.end,
            source,
        }
    }

    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }
}
