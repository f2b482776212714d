//! Recurring busy blocks -- expands RFC 5545 recurrence rules into concrete
//! busy intervals inside a query window.
//!
//! Wraps the `rrule` crate (v0.13); DST handling follows the rule's own
//! timezone, so a weekly 09:00 standup stays at 09:00 local across transitions.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rrule::RRuleSet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlotError};
use crate::interval::{BusyInterval, ProviderKind, TimeRange};
use crate::timezone::parse_timezone;

/// Upper bound on instances expanded for a single window.
const MAX_INSTANCES: u16 = 2000;

/// A recurring commitment (standup, focus block, weekly 1:1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringBusy {
    /// RRULE body, e.g. `FREQ=WEEKLY;BYDAY=MO,WE,FR`.
    pub rrule: String,
    /// Local start of the first instance, in `timezone`.
    pub dtstart: NaiveDateTime,
    pub duration_minutes: u32,
    /// IANA timezone the rule is anchored in.
    pub timezone: String,
}

impl RecurringBusy {
    /// Busy intervals for every instance that overlaps `window`.
    pub fn expand(&self, window: &TimeRange, source: ProviderKind) -> Result<Vec<BusyInterval>> {
        let ranges = expand_rrule(
            &self.rrule,
            self.dtstart,
            self.duration_minutes,
            &self.timezone,
            window,
        )?;
        Ok(ranges
            .into_iter()
            .map(|r| BusyInterval::new(r, source))
            .collect())
    }
}

/// Expand an RRULE into the instances that overlap `window`.
///
/// # Errors
/// Returns `SlotError::InvalidRule` if the RRULE string is empty or unparseable,
/// or the duration is zero.
/// Returns `SlotError::InvalidTimezone` if the timezone is not a valid IANA identifier.
pub fn expand_rrule(
    rrule: &str,
    dtstart: NaiveDateTime,
    duration_minutes: u32,
    timezone: &str,
    window: &TimeRange,
) -> Result<Vec<TimeRange>> {
    if rrule.trim().is_empty() {
        return Err(SlotError::InvalidRule("empty RRULE string".to_string()));
    }
    if duration_minutes == 0 {
        return Err(SlotError::InvalidRule(
            "recurring block must have a positive duration".to_string(),
        ));
    }
    parse_timezone(timezone)?;

    // The rrule crate reads DTSTART in iCalendar basic format.
    let dtstart_ical = dtstart.format("%Y%m%dT%H%M%S");
    let rrule_text = format!("DTSTART;TZID={}:{}\nRRULE:{}", timezone, dtstart_ical, rrule);

    let rrule_set: RRuleSet = rrule_text
        .parse()
        .map_err(|e| SlotError::InvalidRule(format!("{}", e)))?;

    let duration = Duration::minutes(duration_minutes as i64);

    // An instance that starts before the window can still run into it.
    let lower = (window.start - duration).with_timezone(&rrule::Tz::UTC);
    let upper = window.end.with_timezone(&rrule::Tz::UTC);

    let instances = rrule_set.after(lower).before(upper).all(MAX_INSTANCES);

    let ranges = instances
        .dates
        .into_iter()
        .filter_map(|dt| {
            let start: DateTime<Utc> = dt.with_timezone(&Utc);
            TimeRange {
                start,
                end: start + duration,
            }
            .clip(window)
        })
        .collect();

    Ok(ranges)
}
