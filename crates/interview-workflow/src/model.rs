//! Scheduling requests and their durable workflow records.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use slot_engine::{ProviderKind, TimeRange};
use uuid::Uuid;

use crate::error::{Result, SchedulingError};

fn yes() -> bool {
    true
}

/// Someone whose calendar must (or may) hold the interview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    /// Optional participants are dropped, with a warning, when their
    /// calendar cannot be read.
    #[serde(default = "yes")]
    pub required: bool,
}

impl Participant {
    pub fn required(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            required: true,
        }
    }

    pub fn optional(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            required: false,
        }
    }
}

/// Inbound submission. Missing fields fall back to configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub participants: Vec<Participant>,
    pub duration_minutes: Option<i64>,
    pub window_days: Option<u32>,
    pub title: Option<String>,
}

/// Why a request ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Every scheduling attempt was consumed.
    AttemptsExhausted,
    /// The final attempt found no slot free for everyone.
    NoCommonSlot,
    /// A required participant's calendar could not be reached.
    ProviderUnavailable { participant: String, detail: String },
    /// Several required participants' calendars could not be read.
    PartialAvailability { missing: Vec<String> },
    /// A calendar rejected the booking for a reason retrying cannot fix.
    ProviderFailure { participant: String, detail: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::AttemptsExhausted => write!(f, "scheduling attempts exhausted"),
            FailureReason::NoCommonSlot => write!(f, "no common slot in the scheduling window"),
            FailureReason::ProviderUnavailable {
                participant,
                detail,
            } => write!(f, "calendar for {participant} unavailable: {detail}"),
            FailureReason::PartialAvailability { missing } => {
                write!(f, "availability missing for {}", missing.join(", "))
            }
            FailureReason::ProviderFailure {
                participant,
                detail,
            } => write!(f, "booking failed on calendar for {participant}: {detail}"),
        }
    }
}

/// An event created on one participant's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedEvent {
    pub participant_id: String,
    pub event_id: String,
    pub provider: ProviderKind,
}

/// Workflow state. `Confirmed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequestStatus {
    Created,
    AggregatingAvailability,
    SelectingSlot,
    /// Booking `slot` on the calendars of `attendees`.
    Booking {
        slot: TimeRange,
        attendees: Vec<String>,
    },
    Confirmed {
        slot: TimeRange,
        events: Vec<BookedEvent>,
    },
    Failed {
        reason: FailureReason,
    },
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Confirmed { .. } | RequestStatus::Failed { .. } | RequestStatus::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RequestStatus::Created => "created",
            RequestStatus::AggregatingAvailability => "aggregating_availability",
            RequestStatus::SelectingSlot => "selecting_slot",
            RequestStatus::Booking { .. } => "booking",
            RequestStatus::Confirmed { .. } => "confirmed",
            RequestStatus::Failed { .. } => "failed",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingRequest {
    pub id: Uuid,
    /// In submission order, unique by id.
    pub participants: Vec<Participant>,
    pub duration_minutes: i64,
    pub title: String,
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
    pub attempt_count: u32,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

impl SchedulingRequest {
    /// Validate a submission and build a `Created` request whose window is
    /// `[now, now + window_days)`.
    pub fn new(
        participants: Vec<Participant>,
        duration_minutes: i64,
        window_days: u32,
        title: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if participants.is_empty() {
            return Err(SchedulingError::InvalidRequest(
                "at least one participant is required".into(),
            ));
        }
        if !participants.iter().any(|p| p.required) {
            return Err(SchedulingError::InvalidRequest(
                "at least one participant must be required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for p in &participants {
            if p.id.trim().is_empty() {
                return Err(SchedulingError::InvalidRequest(
                    "participant ids must not be empty".into(),
                ));
            }
            if !seen.insert(p.id.as_str()) {
                return Err(SchedulingError::InvalidRequest(format!(
                    "participant '{}' listed twice",
                    p.id
                )));
            }
        }
        if duration_minutes <= 0 {
            return Err(SchedulingError::InvalidRequest(format!(
                "duration must be positive, got {duration_minutes} minutes"
            )));
        }
        if window_days == 0 {
            return Err(SchedulingError::InvalidRequest(
                "scheduling window must span at least one day".into(),
            ));
        }
        let latest = Duration::try_days(i64::from(window_days))
            .and_then(|days| now.checked_add_signed(days))
            .ok_or_else(|| {
                SchedulingError::InvalidRequest(format!(
                    "a {window_days}-day scheduling window is out of range"
                ))
            })?;
        let duration = Duration::try_minutes(duration_minutes).ok_or_else(|| {
            SchedulingError::InvalidRequest(format!(
                "duration of {duration_minutes} minutes is out of range"
            ))
        })?;
        if duration > latest - now {
            return Err(SchedulingError::InvalidRequest(format!(
                "a {duration_minutes}-minute interview does not fit in a {window_days}-day window"
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            participants,
            duration_minutes,
            title: title.into(),
            earliest: now,
            latest,
            attempt_count: 0,
            status: RequestStatus::Created,
            created_at: now,
        })
    }

    pub fn window(&self) -> TimeRange {
        TimeRange {
            start: self.earliest,
            end: self.latest,
        }
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }
}

/// One entry in a record's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Everything persisted about a request between transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub request: SchedulingRequest,
    /// Slots that lost a booking race; never proposed again.
    #[serde(default)]
    pub excluded_slots: Vec<TimeRange>,
    /// Booking-level provider errors so far (separate from attempts).
    #[serde(default)]
    pub provider_errors: u32,
    /// Events created for a committed booking that is not yet confirmed.
    #[serde(default)]
    pub pending_events: Vec<BookedEvent>,
    /// Events a rollback failed to delete. Deletion is retried before each
    /// booking and when the request ends.
    #[serde(default)]
    pub orphaned_events: Vec<BookedEvent>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub history: Vec<Transition>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    pub fn new(request: SchedulingRequest) -> Self {
        let updated_at = request.created_at;
        Self {
            request,
            excluded_slots: Vec::new(),
            provider_errors: 0,
            pending_events: Vec::new(),
            orphaned_events: Vec::new(),
            warnings: Vec::new(),
            history: Vec::new(),
            updated_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.request.id
    }

    pub fn status(&self) -> &RequestStatus {
        &self.request.status
    }

    pub fn is_terminal(&self) -> bool {
        self.request.status.is_terminal()
    }
}
