//! Calendar provider capability.
//!
//! Every backend (Google Calendar, Office 365, a generic CalDAV bridge, the
//! in-memory calendar) implements [`CalendarProvider`]. The engine never
//! branches on the backend; [`ProviderKind`] is carried only for attribution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slot_engine::{ProviderKind, RawBusy, RecurringBusy, TimeRange};
use uuid::Uuid;

use crate::error::{CreateEventError, ProviderError};

/// What a calendar reports about a participant for one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusySnapshot {
    /// The calendar's IANA timezone, used for floating and all-day entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub busy: Vec<RawBusy>,
    #[serde(default)]
    pub recurring: Vec<RecurringBusy>,
}

/// A booking to place on one participant's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRequest {
    /// Repeating a create with the same key must return the original event.
    pub idempotency_key: String,
    pub request_id: Uuid,
    pub slot: TimeRange,
    pub title: String,
    pub attendees: Vec<String>,
}

impl EventRequest {
    pub fn idempotency_key_for(request_id: Uuid, attempt: u32, slot: &TimeRange) -> String {
        format!("{request_id}:{attempt}:{}", slot.start.timestamp())
    }
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn get_busy_intervals(
        &self,
        participant_id: &str,
        window: &TimeRange,
    ) -> Result<BusySnapshot, ProviderError>;

    /// Returns the created event's id.
    async fn create_event(
        &self,
        participant_id: &str,
        event: &EventRequest,
    ) -> Result<String, CreateEventError>;

    async fn delete_event(&self, participant_id: &str, event_id: &str) -> Result<(), ProviderError>;
}

/// Which provider serves each participant's calendar.
#[derive(Clone, Default)]
pub struct CalendarDirectory {
    providers: HashMap<String, Arc<dyn CalendarProvider>>,
    fallback: Option<Arc<dyn CalendarProvider>>,
}

impl CalendarDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every participant without an explicit entry to `provider`.
    pub fn with_fallback(mut self, provider: Arc<dyn CalendarProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn register(&mut self, participant_id: impl Into<String>, provider: Arc<dyn CalendarProvider>) {
        self.providers.insert(participant_id.into(), provider);
    }

    pub fn provider_for(&self, participant_id: &str) -> Result<Arc<dyn CalendarProvider>, ProviderError> {
        self.providers
            .get(participant_id)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| {
                ProviderError::Permanent(format!("no calendar registered for {participant_id}"))
            })
    }
}

impl std::fmt::Debug for CalendarDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.providers.keys().collect();
        ids.sort();
        f.debug_struct("CalendarDirectory")
            .field("participants", &ids)
            .field("fallback", &self.fallback.as_ref().map(|p| p.kind()))
            .finish()
    }
}
