//! Booking Gateway.
//!
//! Creates the interview on every attendee's calendar concurrently, joins all
//! outcomes, and either commits or rolls back every event it created. Events
//! whose deletion fails are returned as `residual` so the caller can keep
//! track of them and retry later.

use futures::future::join_all;
use slot_engine::TimeRange;
use uuid::Uuid;

use crate::error::{CreateEventError, ProviderError};
use crate::model::BookedEvent;
use crate::provider::{CalendarDirectory, EventRequest};
use crate::retry::{with_retry, RetryPolicy};

/// Outcome on a single calendar.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingResult {
    Booked(BookedEvent),
    /// Something else landed on the slot since availability was read.
    Conflict,
    ProviderError(ProviderError),
}

/// Joined outcome across all attendees.
///
/// On `Conflict` and `ProviderError`, `residual` lists the created events the
/// rollback could not delete. It is empty when the rollback was complete.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingOutcome {
    Committed(Vec<BookedEvent>),
    Conflict {
        participants: Vec<String>,
        residual: Vec<(BookedEvent, ProviderError)>,
    },
    ProviderError {
        participant: String,
        error: ProviderError,
        residual: Vec<(BookedEvent, ProviderError)>,
    },
}

/// Input for one booking try.
#[derive(Debug, Clone, Copy)]
pub struct BookingAttempt<'a> {
    pub request_id: Uuid,
    pub attempt: u32,
    pub slot: TimeRange,
    pub title: &'a str,
    pub attendees: &'a [String],
}

#[derive(Debug, Clone)]
pub struct BookingGateway {
    directory: CalendarDirectory,
    retry: RetryPolicy,
}

impl BookingGateway {
    pub fn new(directory: CalendarDirectory, retry: RetryPolicy) -> Self {
        Self { directory, retry }
    }

    pub async fn book(&self, attempt: BookingAttempt<'_>) -> BookingOutcome {
        let event = EventRequest {
            idempotency_key: EventRequest::idempotency_key_for(
                attempt.request_id,
                attempt.attempt,
                &attempt.slot,
            ),
            request_id: attempt.request_id,
            slot: attempt.slot,
            title: attempt.title.to_string(),
            attendees: attempt.attendees.to_vec(),
        };

        let creates = attempt
            .attendees
            .iter()
            .map(|participant| self.create_one(participant, &event));
        let results = join_all(creates).await;

        let mut booked = Vec::new();
        let mut conflicts = Vec::new();
        let mut first_error: Option<(String, ProviderError)> = None;
        for (participant, result) in attempt.attendees.iter().zip(results) {
            match result {
                BookingResult::Booked(ev) => booked.push(ev),
                BookingResult::Conflict => conflicts.push(participant.clone()),
                BookingResult::ProviderError(e) => {
                    if first_error.is_none() {
                        first_error = Some((participant.clone(), e));
                    }
                }
            }
        }

        if conflicts.is_empty() && first_error.is_none() {
            tracing::info!(request_id = %attempt.request_id, slot = %attempt.slot, "Booking committed");
            return BookingOutcome::Committed(booked);
        }

        tracing::warn!(
            request_id = %attempt.request_id,
            created = booked.len(),
            "Booking incomplete, rolling back"
        );
        let residual = self.rollback(&booked).await;

        // A conflict outranks a provider error: the slot is known to be gone.
        match first_error {
            Some((participant, error)) if conflicts.is_empty() => BookingOutcome::ProviderError {
                participant,
                error,
                residual,
            },
            _ => BookingOutcome::Conflict {
                participants: conflicts,
                residual,
            },
        }
    }

    async fn create_one(&self, participant: &str, event: &EventRequest) -> BookingResult {
        let provider = match self.directory.provider_for(participant) {
            Ok(p) => p,
            Err(e) => return BookingResult::ProviderError(e),
        };
        tracing::debug!(participant, key = %event.idempotency_key, "Creating event");
        let result = with_retry(&self.retry, "create_event", || {
            provider.create_event(participant, event)
        })
        .await;
        match result {
            Ok(event_id) => BookingResult::Booked(BookedEvent {
                participant_id: participant.to_string(),
                event_id,
                provider: provider.kind(),
            }),
            Err(CreateEventError::Conflict) => BookingResult::Conflict,
            Err(CreateEventError::Provider(e)) => BookingResult::ProviderError(e),
        }
    }

    /// Delete `events` concurrently. Returns the ones that could not be
    /// deleted after retries.
    pub async fn rollback(&self, events: &[BookedEvent]) -> Vec<(BookedEvent, ProviderError)> {
        let deletes = events.iter().map(|ev| async move {
            match self.directory.provider_for(&ev.participant_id) {
                Ok(provider) => {
                    with_retry(&self.retry, "delete_event", || {
                        provider.delete_event(&ev.participant_id, &ev.event_id)
                    })
                    .await
                }
                Err(e) => Err(e),
            }
        });
        let results = join_all(deletes).await;

        let mut failed = Vec::new();
        for (ev, result) in events.iter().zip(results) {
            if let Err(e) = result {
                tracing::error!(
                    participant = %ev.participant_id,
                    event_id = %ev.event_id,
                    error = %e,
                    "Rollback failed, event left on calendar"
                );
                failed.push((ev.clone(), e));
            }
        }
        failed
    }
}
