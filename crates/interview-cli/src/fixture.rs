//! Calendar fixture files.
//!
//! A fixture describes every participant's calendar as JSON:
//!
//! ```json
//! {
//!   "calendars": [
//!     {
//!       "participant": "alice",
//!       "provider": "google_calendar",
//!       "timezone": "Europe/London",
//!       "busy": [
//!         { "start": { "instant": "2026-03-16T09:00:00Z" },
//!           "end":   { "floating": "2026-03-16T10:00:00" } }
//!       ],
//!       "recurring": [
//!         { "rrule": "FREQ=DAILY", "dtstart": "2026-03-01T09:00:00",
//!           "duration_minutes": 15, "timezone": "Europe/London" }
//!       ],
//!       "events": []
//!     }
//!   ]
//! }
//! ```
//!
//! Each provider kind gets its own in-memory calendar; booked events can be
//! written back so later invocations see them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use interview_workflow::{CalendarDirectory, CalendarSeed, InMemoryCalendar};
use serde::{Deserialize, Serialize};
use slot_engine::ProviderKind;

#[derive(Debug, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub participant: String,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(flatten)]
    pub seed: CalendarSeed,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CalendarFixture {
    #[serde(default)]
    pub calendars: Vec<CalendarEntry>,
}

impl CalendarFixture {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read calendars file: {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse calendars file: {}", path.display()))
    }
}

/// Calendars loaded from a fixture, grouped by provider kind.
pub struct LoadedCalendars {
    backends: HashMap<ProviderKind, Arc<InMemoryCalendar>>,
    owners: Vec<(String, ProviderKind)>,
    pub directory: CalendarDirectory,
}

impl LoadedCalendars {
    pub fn from_fixture(fixture: CalendarFixture) -> Self {
        let mut backends: HashMap<ProviderKind, Arc<InMemoryCalendar>> = HashMap::new();
        let mut directory = CalendarDirectory::new();
        let mut owners = Vec::new();

        for entry in fixture.calendars {
            let backend = backends
                .entry(entry.provider)
                .or_insert_with(|| Arc::new(InMemoryCalendar::new(entry.provider)))
                .clone();
            backend.seed(&entry.participant, entry.seed);
            directory.register(entry.participant.clone(), backend);
            owners.push((entry.participant, entry.provider));
        }

        Self {
            backends,
            owners,
            directory,
        }
    }

    pub fn participant_count(&self) -> usize {
        self.owners.len()
    }

    /// Current calendar contents, booked events included.
    pub fn to_fixture(&self) -> CalendarFixture {
        let calendars = self
            .owners
            .iter()
            .filter_map(|(participant, provider)| {
                let seed = self.backends.get(provider)?.export(participant)?;
                Some(CalendarEntry {
                    participant: participant.clone(),
                    provider: *provider,
                    seed,
                })
            })
            .collect();
        CalendarFixture { calendars }
    }

    pub fn write_back(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_fixture())?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write calendars file: {}", path.display()))
    }
}
