//! Error types for slot-engine operations.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SlotError {
    /// The caller asked for something that can never be satisfied
    /// (no participants, non-positive duration, window in the past).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid RRULE: {0}")]
    InvalidRule(String),

    /// An interval whose end does not come after its start.
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

pub type Result<T> = std::result::Result<T, SlotError>;
