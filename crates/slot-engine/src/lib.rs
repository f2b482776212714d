//! # slot-engine
//!
//! Deterministic busy/free interval algebra for interview scheduling.
//!
//! The Slot Engine turns what heterogeneous calendars say about a set of
//! participants into a ranked list of mutually free slots. Everything here is
//! pure and synchronous; fetching calendars and booking slots live in the
//! workflow crate.
//!
//! ## Modules
//!
//! - [`interval`]: `TimeRange`, `BusyInterval`, provider attribution
//! - [`timezone`]: Raw provider times → UTC, with DST gap policies
//! - [`expander`]: RRULE recurring busy blocks → concrete intervals
//! - [`freebusy`]: Merge busy intervals and compute free complements
//! - [`availability`]: Per-participant availability and k-way free intersection
//! - [`selector`]: Lazy, ranked candidate slot generation
//! - [`conflict`]: Detect busy time that collides with a slot
//! - [`error`]: Error types

pub mod availability;
pub mod conflict;
pub mod error;
pub mod expander;
pub mod freebusy;
pub mod interval;
pub mod selector;
pub mod timezone;

pub use availability::{common_free_intervals, ParticipantAvailability};
pub use conflict::{find_conflicts, SlotConflict};
pub use error::SlotError;
pub use expander::{expand_rrule, RecurringBusy};
pub use freebusy::{free_intervals, merge_busy, merge_busy_within};
pub use interval::{BusyInterval, ProviderKind, TimeRange};
pub use selector::{CandidateSlot, Candidates, SelectionPolicy, SlotQuery, SlotScore, SlotSelector};
pub use timezone::{parse_timezone, DstPolicy, EventTime, RawBusy};

/// Re-exported so callers can name timezones without a direct chrono-tz dependency.
pub use chrono_tz::Tz;
