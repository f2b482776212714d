//! Error types for the scheduling workflow.

use std::time::Duration;

use slot_engine::SlotError;
use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced to callers of the workflow and service APIs.
#[derive(Error, Debug)]
pub enum SchedulingError {
    /// Caller error; never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Scheduling request {0} not found")]
    NotFound(Uuid),

    /// Another execution holds the lease for this request.
    #[error("Scheduling request {0} is already being executed")]
    AlreadyRunning(Uuid),

    /// The request reached a terminal state and can no longer change.
    #[error("Scheduling request {id} is already {status}")]
    Terminal { id: Uuid, status: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error(transparent)]
    Availability(#[from] AggregationError),
}

/// Errors raised by durable workflow stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Record {0} already exists")]
    Duplicate(Uuid),
}

/// Failure of a single calendar-provider call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Worth retrying (rate limit, 5xx, connection reset).
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Retrying will not help (revoked grant, unknown calendar).
    #[error("permanent provider error: {0}")]
    Permanent(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_) | ProviderError::Timeout(_))
    }
}

/// Failure of `create_event`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CreateEventError {
    /// The slot is no longer free on this calendar.
    #[error("slot is no longer free")]
    Conflict,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Why availability could not be aggregated for an attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    /// The one required participant without data.
    #[error("calendar for {participant} unavailable: {error}")]
    ProviderUnavailable {
        participant: String,
        error: ProviderError,
    },

    /// More than one required participant without data.
    #[error("availability missing for: {}", missing.join(", "))]
    PartialAvailability { missing: Vec<String> },
}

pub type Result<T> = std::result::Result<T, SchedulingError>;
