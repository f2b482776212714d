//! In-memory calendar backend with scripted fault injection.
//!
//! Holds calendars for any number of participants. Faults are queued per
//! participant and per operation and consumed one call at a time, so a test
//! can say "the next two fetches for bob time out" or "alice's next create
//! loses a race".

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slot_engine::{ProviderKind, RawBusy, RecurringBusy, TimeRange};

use crate::error::{CreateEventError, ProviderError};
use crate::provider::{BusySnapshot, CalendarProvider, EventRequest};

/// A scripted misbehavior for the next call of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Transient,
    Permanent,
    /// Sleep before answering normally.
    Delay(Duration),
    /// Another client books the requested slot first; the create fails with
    /// `Conflict` and the slot stays busy. Only meaningful for creates.
    Race,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Fetch,
    Create,
    Delete,
}

/// An event placed on a calendar through [`CalendarProvider::create_event`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: String,
    pub slot: TimeRange,
    pub title: String,
    pub idempotency_key: String,
}

/// One participant's calendar contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarSeed {
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub busy: Vec<RawBusy>,
    #[serde(default)]
    pub recurring: Vec<RecurringBusy>,
    #[serde(default)]
    pub events: Vec<StoredEvent>,
}

#[derive(Debug, Default)]
struct ParticipantCalendar {
    timezone: Option<String>,
    busy: Vec<RawBusy>,
    /// Busy time added by other clients during a race, already in UTC.
    foreign: Vec<TimeRange>,
    recurring: Vec<RecurringBusy>,
    events: BTreeMap<String, StoredEvent>,
    unreachable: bool,
    faults: HashMap<Op, VecDeque<Fault>>,
}

impl ParticipantCalendar {
    fn snapshot(&self) -> BusySnapshot {
        let mut busy = self.busy.clone();
        busy.extend(self.foreign.iter().map(|r| RawBusy::utc(r.start, r.end)));
        busy.extend(self.events.values().map(|e| RawBusy::utc(e.slot.start, e.slot.end)));
        BusySnapshot {
            timezone: self.timezone.clone(),
            busy,
            recurring: self.recurring.clone(),
        }
    }

    /// True when the slot collides with a booked event or foreign booking.
    /// Declared busy time is not checked here; it was visible when the slot
    /// was chosen.
    fn is_taken(&self, slot: &TimeRange) -> bool {
        self.foreign.iter().any(|r| r.overlaps(slot))
            || self.events.values().any(|e| e.slot.overlaps(slot))
    }
}

#[derive(Debug, Default)]
struct CalendarState {
    calendars: HashMap<String, ParticipantCalendar>,
    /// (participant, idempotency key) → event id.
    keys: HashMap<(String, String), String>,
    next_id: u64,
}

/// Calendars kept in process memory.
#[derive(Debug)]
pub struct InMemoryCalendar {
    kind: ProviderKind,
    state: Mutex<CalendarState>,
}

impl Default for InMemoryCalendar {
    fn default() -> Self {
        Self::new(ProviderKind::Generic)
    }
}

impl InMemoryCalendar {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            state: Mutex::new(CalendarState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CalendarState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create (or replace) a participant's calendar.
    pub fn seed(&self, participant_id: &str, seed: CalendarSeed) {
        let mut state = self.lock();
        let events: BTreeMap<String, StoredEvent> = seed
            .events
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();
        for e in events.values() {
            state
                .keys
                .insert((participant_id.to_string(), e.idempotency_key.clone()), e.id.clone());
            // Keep generated ids clear of seeded ones.
            if let Some(n) = e.id.strip_prefix("evt-").and_then(|n| n.parse::<u64>().ok()) {
                state.next_id = state.next_id.max(n);
            }
        }
        state.calendars.insert(
            participant_id.to_string(),
            ParticipantCalendar {
                timezone: seed.timezone,
                busy: seed.busy,
                recurring: seed.recurring,
                events,
                ..ParticipantCalendar::default()
            },
        );
    }

    /// The calendar's current contents, in seed form.
    pub fn export(&self, participant_id: &str) -> Option<CalendarSeed> {
        let state = self.lock();
        state.calendars.get(participant_id).map(|cal| {
            let mut busy = cal.busy.clone();
            busy.extend(cal.foreign.iter().map(|r| RawBusy::utc(r.start, r.end)));
            CalendarSeed {
                timezone: cal.timezone.clone(),
                busy,
                recurring: cal.recurring.clone(),
                events: cal.events.values().cloned().collect(),
            }
        })
    }

    pub fn add_busy(&self, participant_id: &str, busy: RawBusy) {
        self.lock()
            .calendars
            .entry(participant_id.to_string())
            .or_default()
            .busy
            .push(busy);
    }

    pub fn add_recurring(&self, participant_id: &str, block: RecurringBusy) {
        self.lock()
            .calendars
            .entry(participant_id.to_string())
            .or_default()
            .recurring
            .push(block);
    }

    pub fn set_timezone(&self, participant_id: &str, timezone: &str) {
        self.lock()
            .calendars
            .entry(participant_id.to_string())
            .or_default()
            .timezone = Some(timezone.to_string());
    }

    /// Every call for this participant fails transiently until cleared.
    pub fn set_unreachable(&self, participant_id: &str, unreachable: bool) {
        self.lock()
            .calendars
            .entry(participant_id.to_string())
            .or_default()
            .unreachable = unreachable;
    }

    fn push_fault(&self, participant_id: &str, op: Op, fault: Fault) {
        self.lock()
            .calendars
            .entry(participant_id.to_string())
            .or_default()
            .faults
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    pub fn fail_next_fetch(&self, participant_id: &str, fault: Fault) {
        self.push_fault(participant_id, Op::Fetch, fault);
    }

    pub fn fail_next_create(&self, participant_id: &str, fault: Fault) {
        self.push_fault(participant_id, Op::Create, fault);
    }

    pub fn fail_next_delete(&self, participant_id: &str, fault: Fault) {
        self.push_fault(participant_id, Op::Delete, fault);
    }

    /// Events currently booked on a participant's calendar.
    pub fn events(&self, participant_id: &str) -> Vec<StoredEvent> {
        self.lock()
            .calendars
            .get(participant_id)
            .map(|cal| cal.events.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn total_events(&self) -> usize {
        self.lock()
            .calendars
            .values()
            .map(|cal| cal.events.len())
            .sum()
    }

    /// Pop the next scripted fault, or the standing unreachable fault.
    fn take_fault(&self, participant_id: &str, op: Op) -> Option<Fault> {
        let mut state = self.lock();
        let cal = state.calendars.get_mut(participant_id)?;
        if cal.unreachable {
            return Some(Fault::Transient);
        }
        cal.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }

    /// Apply a fault that can be decided before touching state. Returns the
    /// fault back when the caller has to handle it.
    async fn inject(&self, participant_id: &str, op: Op) -> Result<Option<Fault>, ProviderError> {
        match self.take_fault(participant_id, op) {
            None => Ok(None),
            Some(Fault::Transient) => Err(ProviderError::Transient(format!(
                "{participant_id}: calendar temporarily unavailable"
            ))),
            Some(Fault::Permanent) => Err(ProviderError::Permanent(format!(
                "{participant_id}: calendar access revoked"
            ))),
            Some(Fault::Delay(d)) => {
                tokio::time::sleep(d).await;
                Ok(None)
            }
            Some(Fault::Race) => Ok(Some(Fault::Race)),
        }
    }
}

#[async_trait]
impl CalendarProvider for InMemoryCalendar {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn get_busy_intervals(
        &self,
        participant_id: &str,
        _window: &TimeRange,
    ) -> Result<BusySnapshot, ProviderError> {
        self.inject(participant_id, Op::Fetch).await?;
        let state = self.lock();
        state
            .calendars
            .get(participant_id)
            .map(ParticipantCalendar::snapshot)
            .ok_or_else(|| ProviderError::Permanent(format!("unknown calendar {participant_id}")))
    }

    async fn create_event(
        &self,
        participant_id: &str,
        event: &EventRequest,
    ) -> Result<String, CreateEventError> {
        let fault = self.inject(participant_id, Op::Create).await?;

        let mut guard = self.lock();
        let state = &mut *guard;
        let key = (participant_id.to_string(), event.idempotency_key.clone());
        if let Some(existing) = state.keys.get(&key) {
            return Ok(existing.clone());
        }

        let cal = state.calendars.get_mut(participant_id).ok_or_else(|| {
            ProviderError::Permanent(format!("unknown calendar {participant_id}"))
        })?;
        if fault == Some(Fault::Race) {
            cal.foreign.push(event.slot);
            return Err(CreateEventError::Conflict);
        }
        if cal.is_taken(&event.slot) {
            return Err(CreateEventError::Conflict);
        }

        state.next_id += 1;
        let id = format!("evt-{}", state.next_id);
        cal.events.insert(
            id.clone(),
            StoredEvent {
                id: id.clone(),
                slot: event.slot,
                title: event.title.clone(),
                idempotency_key: event.idempotency_key.clone(),
            },
        );
        state.keys.insert(key, id.clone());
        Ok(id)
    }

    async fn delete_event(&self, participant_id: &str, event_id: &str) -> Result<(), ProviderError> {
        self.inject(participant_id, Op::Delete).await?;
        let mut state = self.lock();
        let removed = state
            .calendars
            .get_mut(participant_id)
            .and_then(|cal| cal.events.remove(event_id));
        // Deleting an event that is already gone succeeds.
        if let Some(event) = removed {
            state
                .keys
                .remove(&(participant_id.to_string(), event.idempotency_key));
        }
        Ok(())
    }
}
