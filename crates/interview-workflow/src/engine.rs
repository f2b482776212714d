//! Scheduling Workflow Engine.
//!
//! Drives one request through
//! `Created → AggregatingAvailability → SelectingSlot → Booking → Confirmed`
//! under a per-request lease. Every transition is appended to the record's
//! history and saved before the next step runs, so a restarted execution
//! resumes from the last committed state.
//!
//! Retry policy:
//! - `Conflict` at booking excludes the slot, consumes an attempt and
//!   re-aggregates.
//! - No common slot extends the latest bound by `window_extension_days`,
//!   clamps the earliest bound to now, consumes an attempt and re-aggregates.
//! - A transient provider error at booking backs off and re-selects without
//!   consuming an attempt, up to `max_provider_errors` per request.
//! - Once the attempt budget is spent the request fails.

use std::sync::Arc;

use chrono::Duration;
use slot_engine::{CandidateSlot, SlotQuery, SlotSelector, TimeRange};
use tracing::Instrument;
use uuid::Uuid;

use crate::aggregator::{AggregatedAvailability, AvailabilityAggregator};
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::{AggregationError, ProviderError, Result, SchedulingError};
use crate::gateway::{BookingAttempt, BookingGateway, BookingOutcome};
use crate::model::{
    BookedEvent, FailureReason, Participant, RequestStatus, Transition, WorkflowRecord,
};
use crate::notify::NotificationDispatcher;
use crate::provider::CalendarDirectory;
use crate::retry::RetryPolicy;
use crate::store::WorkflowStore;

/// State that lives only for one execution.
#[derive(Debug, Default)]
struct AttemptContext {
    availability: Option<AggregatedAvailability>,
    /// Set when the execution resumed inside `Booking`: events for that
    /// booking may exist on calendars without being recorded.
    unrecorded_booking: bool,
}

pub struct WorkflowEngine {
    config: SchedulerConfig,
    aggregator: AvailabilityAggregator,
    selector: SlotSelector,
    gateway: BookingGateway,
    backoff: RetryPolicy,
    store: Arc<dyn WorkflowStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
}

impl WorkflowEngine {
    pub fn new(
        config: SchedulerConfig,
        directory: CalendarDirectory,
        store: Arc<dyn WorkflowStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            aggregator: AvailabilityAggregator::new(
                directory.clone(),
                retry,
                config.default_tz(),
                config.dst_policy,
            ),
            selector: SlotSelector::new(config.selection_policy()),
            gateway: BookingGateway::new(directory, retry),
            backoff: retry,
            config,
            store,
            notifier,
            clock,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Ranked candidates for `participants` without booking anything.
    pub async fn preview_slots(
        &self,
        participants: &[Participant],
        duration_minutes: i64,
        window: &TimeRange,
        limit: usize,
    ) -> Result<Vec<CandidateSlot>> {
        let availability = self.aggregator.aggregate(participants, window).await?;
        let query = SlotQuery {
            duration_minutes,
            window: *window,
            now: self.clock.now(),
            excluded: Vec::new(),
        };
        let candidates = self
            .selector
            .candidates(&availability.participants, &query)?;
        Ok(candidates.take(limit).collect())
    }

    /// Drive request `id` to a terminal state as lease holder `owner`.
    ///
    /// # Errors
    /// `AlreadyRunning` when another owner holds the lease, `NotFound` for an
    /// unknown id, `Store` when state cannot be persisted. In every error case
    /// the request stays at its last saved state and can be resumed.
    pub async fn execute(&self, id: Uuid, owner: &str) -> Result<RequestStatus> {
        let span = tracing::info_span!("workflow", request_id = %id, owner);
        async {
            let now = self.clock.now();
            if !self
                .store
                .acquire_lease(id, owner, self.config.lease_ttl(), now)?
            {
                return Err(SchedulingError::AlreadyRunning(id));
            }
            let result = self.drive(id, owner).await;
            if let Err(e) = self.store.release_lease(id, owner) {
                tracing::warn!(error = %e, "Failed to release lease");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, id: Uuid, owner: &str) -> Result<RequestStatus> {
        let mut record = self
            .store
            .load(id)?
            .ok_or(SchedulingError::NotFound(id))?;
        let mut ctx = AttemptContext {
            unrecorded_booking: matches!(record.status(), RequestStatus::Booking { .. }),
            ..AttemptContext::default()
        };
        if !record.is_terminal() {
            tracing::info!(state = record.status().label(), "Execution started");
        }

        while !record.is_terminal() {
            if self.store.cancel_requested(id)? {
                self.cancel(&mut record, &mut ctx).await?;
                break;
            }
            let now = self.clock.now();
            if !self
                .store
                .acquire_lease(id, owner, self.config.lease_ttl(), now)?
            {
                tracing::warn!("Lease lost to another execution");
                return Err(SchedulingError::AlreadyRunning(id));
            }
            self.step(&mut record, &mut ctx).await?;
        }

        Ok(record.request.status)
    }

    async fn step(&self, record: &mut WorkflowRecord, ctx: &mut AttemptContext) -> Result<()> {
        match record.request.status.clone() {
            RequestStatus::Created => {
                record.request.attempt_count = 1;
                self.transition(
                    record,
                    RequestStatus::AggregatingAvailability,
                    Some("attempt 1".into()),
                )
            }
            RequestStatus::AggregatingAvailability => self.aggregate(record, ctx).await,
            RequestStatus::SelectingSlot => self.select(record, ctx).await,
            RequestStatus::Booking { slot, attendees } => {
                self.book(record, ctx, slot, attendees).await
            }
            RequestStatus::Confirmed { .. } | RequestStatus::Failed { .. } | RequestStatus::Cancelled => {
                Ok(())
            }
        }
    }

    async fn aggregate(&self, record: &mut WorkflowRecord, ctx: &mut AttemptContext) -> Result<()> {
        let window = record.request.window();
        match self
            .aggregator
            .aggregate(&record.request.participants, &window)
            .await
        {
            Ok(availability) => {
                for warning in &availability.warnings {
                    if !record.warnings.contains(warning) {
                        record.warnings.push(warning.clone());
                    }
                }
                let note = format!(
                    "{} of {} participants available",
                    availability.participants.len(),
                    record.request.participants.len()
                );
                ctx.availability = Some(availability);
                self.transition(record, RequestStatus::SelectingSlot, Some(note))
            }
            Err(AggregationError::ProviderUnavailable { participant, error }) => {
                self.fail(
                    record,
                    FailureReason::ProviderUnavailable {
                        participant,
                        detail: error.to_string(),
                    },
                )
                .await
            }
            Err(AggregationError::PartialAvailability { missing }) => {
                self.fail(record, FailureReason::PartialAvailability { missing })
                    .await
            }
        }
    }

    async fn select(&self, record: &mut WorkflowRecord, ctx: &mut AttemptContext) -> Result<()> {
        let Some(availability) = ctx.availability.as_ref() else {
            return self.transition(
                record,
                RequestStatus::AggregatingAvailability,
                Some("re-reading calendars after restart".into()),
            );
        };

        let now = self.clock.now();
        let window = record.request.window();
        if window.end <= now {
            return self.no_common_slot(record, ctx).await;
        }

        let query = SlotQuery {
            duration_minutes: record.request.duration_minutes,
            window,
            now,
            excluded: record.excluded_slots.clone(),
        };
        match self.selector.best(&availability.participants, &query)? {
            Some(candidate) => {
                let attendees = availability.attendees();
                tracing::debug!(slot = %candidate.range(), score = ?candidate.score, "Selected candidate");
                self.transition(
                    record,
                    RequestStatus::Booking {
                        slot: candidate.range(),
                        attendees,
                    },
                    None,
                )
            }
            None => self.no_common_slot(record, ctx).await,
        }
    }

    async fn no_common_slot(
        &self,
        record: &mut WorkflowRecord,
        ctx: &mut AttemptContext,
    ) -> Result<()> {
        ctx.availability = None;
        if record.request.attempt_count >= self.config.max_scheduling_attempts {
            return self.fail(record, FailureReason::NoCommonSlot).await;
        }
        let now = self.clock.now();
        let Some(latest) = Duration::try_days(i64::from(self.config.window_extension_days))
            .and_then(|extension| record.request.latest.max(now).checked_add_signed(extension))
        else {
            return self.fail(record, FailureReason::NoCommonSlot).await;
        };
        record.request.earliest = record.request.earliest.max(now);
        record.request.latest = latest;
        record.request.attempt_count += 1;
        let note = format!(
            "no common slot; attempt {} searches until {}",
            record.request.attempt_count,
            record.request.latest.to_rfc3339()
        );
        self.transition(record, RequestStatus::AggregatingAvailability, Some(note))
    }

    async fn book(
        &self,
        record: &mut WorkflowRecord,
        ctx: &mut AttemptContext,
        slot: TimeRange,
        attendees: Vec<String>,
    ) -> Result<()> {
        let id = record.id();
        self.retry_orphans(record).await;
        let outcome = self
            .gateway
            .book(BookingAttempt {
                request_id: id,
                attempt: record.request.attempt_count,
                slot,
                title: &record.request.title,
                attendees: &attendees,
            })
            .await;
        ctx.unrecorded_booking = false;

        match outcome {
            BookingOutcome::Committed(events) => {
                record.pending_events = events.clone();
                self.store.save(record)?;
                if self.store.cancel_requested(id)? {
                    return self.cancel(record, ctx).await;
                }
                record.pending_events.clear();
                self.retry_orphans(record).await;
                self.transition(record, RequestStatus::Confirmed { slot, events }, None)?;
                self.notifier.notify_confirmed(id, &slot).await;
                Ok(())
            }
            BookingOutcome::Conflict {
                participants,
                residual,
            } => {
                record_orphans(record, residual);
                ctx.availability = None;
                if !record.excluded_slots.contains(&slot) {
                    record.excluded_slots.push(slot);
                }
                if record.request.attempt_count >= self.config.max_scheduling_attempts {
                    return self.fail(record, FailureReason::AttemptsExhausted).await;
                }
                record.request.attempt_count += 1;
                let note = format!(
                    "conflict on {} for {}; attempt {}",
                    slot,
                    participants.join(", "),
                    record.request.attempt_count
                );
                self.transition(record, RequestStatus::AggregatingAvailability, Some(note))
            }
            BookingOutcome::ProviderError {
                participant,
                error,
                residual,
            } => {
                record_orphans(record, residual);
                if !error.is_retryable() {
                    return self
                        .fail(
                            record,
                            FailureReason::ProviderFailure {
                                participant,
                                detail: error.to_string(),
                            },
                        )
                        .await;
                }
                record.provider_errors += 1;
                if record.provider_errors > self.config.max_provider_errors {
                    return self
                        .fail(
                            record,
                            FailureReason::ProviderUnavailable {
                                participant,
                                detail: error.to_string(),
                            },
                        )
                        .await;
                }
                let delay = self.backoff.delay_for(record.provider_errors - 1);
                let note = format!(
                    "provider error {}/{} from {participant}: {error}",
                    record.provider_errors, self.config.max_provider_errors
                );
                self.transition(record, RequestStatus::SelectingSlot, Some(note))?;
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    async fn cancel(&self, record: &mut WorkflowRecord, ctx: &mut AttemptContext) -> Result<()> {
        let id = record.id();

        // A crash inside `Booking` can leave events that were never
        // recorded. Re-issuing the booking with the same idempotency key
        // recovers their ids so they can be deleted.
        if let (true, RequestStatus::Booking { slot, attendees }) =
            (ctx.unrecorded_booking, record.request.status.clone())
        {
            if record.pending_events.is_empty() {
                let outcome = self
                    .gateway
                    .book(BookingAttempt {
                        request_id: id,
                        attempt: record.request.attempt_count,
                        slot,
                        title: &record.request.title,
                        attendees: &attendees,
                    })
                    .await;
                match outcome {
                    BookingOutcome::Committed(events) => record.pending_events = events,
                    BookingOutcome::Conflict { residual, .. }
                    | BookingOutcome::ProviderError { residual, .. } => {
                        record_orphans(record, residual)
                    }
                }
            }
            ctx.unrecorded_booking = false;
        }

        if !record.pending_events.is_empty() {
            tracing::info!(events = record.pending_events.len(), "Rolling back for cancellation");
            let failed = self.gateway.rollback(&record.pending_events).await;
            record.pending_events.clear();
            record_orphans(record, failed);
        }
        self.retry_orphans(record).await;
        self.transition(
            record,
            RequestStatus::Cancelled,
            Some("cancellation requested".into()),
        )
    }

    async fn fail(&self, record: &mut WorkflowRecord, reason: FailureReason) -> Result<()> {
        self.retry_orphans(record).await;
        self.transition(
            record,
            RequestStatus::Failed {
                reason: reason.clone(),
            },
            Some(reason.to_string()),
        )?;
        self.notifier.notify_failed(record.id(), &reason).await;
        Ok(())
    }

    /// Try again to delete events an earlier rollback left behind. Whatever
    /// still fails stays recorded; the caller persists the record.
    async fn retry_orphans(&self, record: &mut WorkflowRecord) {
        if record.orphaned_events.is_empty() {
            return;
        }
        let failed = self.gateway.rollback(&record.orphaned_events).await;
        let deleted = record.orphaned_events.len() - failed.len();
        if deleted > 0 {
            tracing::info!(deleted, remaining = failed.len(), "Deleted orphaned events");
        }
        record.orphaned_events = failed.into_iter().map(|(event, _)| event).collect();
    }

    /// Move `record` to `to` and persist it.
    fn transition(
        &self,
        record: &mut WorkflowRecord,
        to: RequestStatus,
        note: Option<String>,
    ) -> Result<()> {
        let from = record.status().label();
        if record.is_terminal() {
            return Err(SchedulingError::Terminal {
                id: record.id(),
                status: from.to_string(),
            });
        }
        let now = self.clock.now();
        tracing::info!(
            from,
            to = to.label(),
            attempt = record.request.attempt_count,
            note = note.as_deref().unwrap_or(""),
            "Transition"
        );
        record.history.push(Transition {
            from: from.to_string(),
            to: to.label().to_string(),
            at: now,
            note,
        });
        record.request.status = to;
        record.updated_at = now;
        self.store.save(record)?;
        Ok(())
    }
}

/// Remember events a rollback could not delete, with a warning for each.
fn record_orphans(record: &mut WorkflowRecord, residual: Vec<(BookedEvent, ProviderError)>) {
    for (event, error) in residual {
        record.warnings.push(format!(
            "could not delete event {} for {}: {error}",
            event.event_id, event.participant_id
        ));
        if !record.orphaned_events.contains(&event) {
            record.orphaned_events.push(event);
        }
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.config)
            .field("aggregator", &self.aggregator)
            .finish_non_exhaustive()
    }
}
