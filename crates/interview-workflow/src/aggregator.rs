//! Availability Aggregator.
//!
//! Fans out one busy-interval fetch per participant, joins them all, and
//! normalizes each answer into a merged UTC [`ParticipantAvailability`].
//! Nothing is returned until every fetch has finished or timed out.

use futures::future::join_all;
use slot_engine::{
    parse_timezone, BusyInterval, DstPolicy, ParticipantAvailability, ProviderKind, TimeRange, Tz,
};

use crate::error::{AggregationError, ProviderError};
use crate::model::Participant;
use crate::provider::{BusySnapshot, CalendarDirectory};
use crate::retry::{with_retry, RetryPolicy};

/// Availability for one attempt. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedAvailability {
    pub participants: Vec<ParticipantAvailability>,
    /// Optional participants left out because their calendar failed.
    pub dropped: Vec<String>,
    pub warnings: Vec<String>,
}

impl AggregatedAvailability {
    /// Ids of the participants that made it in, in request order.
    pub fn attendees(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|p| p.participant_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct AvailabilityAggregator {
    directory: CalendarDirectory,
    retry: RetryPolicy,
    default_tz: Tz,
    dst_policy: DstPolicy,
}

impl AvailabilityAggregator {
    pub fn new(
        directory: CalendarDirectory,
        retry: RetryPolicy,
        default_tz: Tz,
        dst_policy: DstPolicy,
    ) -> Self {
        Self {
            directory,
            retry,
            default_tz,
            dst_policy,
        }
    }

    /// Fetch and normalize availability for `participants` inside `window`.
    ///
    /// Required participants must all respond. Optional ones that fail are
    /// dropped with a warning.
    pub async fn aggregate(
        &self,
        participants: &[Participant],
        window: &TimeRange,
    ) -> Result<AggregatedAvailability, AggregationError> {
        let fetches = participants.iter().map(|p| self.fetch_one(p, window));
        let results = join_all(fetches).await;

        let mut out = AggregatedAvailability {
            participants: Vec::with_capacity(participants.len()),
            dropped: Vec::new(),
            warnings: Vec::new(),
        };
        let mut missing: Vec<(String, ProviderError)> = Vec::new();

        for (participant, result) in participants.iter().zip(results) {
            match result {
                Ok((availability, mut warnings)) => {
                    out.warnings.append(&mut warnings);
                    out.participants.push(availability);
                }
                Err(error) if participant.required => {
                    tracing::warn!(participant = %participant.id, %error, "Required calendar unavailable");
                    missing.push((participant.id.clone(), error));
                }
                Err(error) => {
                    tracing::warn!(participant = %participant.id, %error, "Dropping optional participant");
                    out.warnings
                        .push(format!("optional participant {} dropped: {error}", participant.id));
                    out.dropped.push(participant.id.clone());
                }
            }
        }

        match missing.len() {
            0 => Ok(out),
            1 => {
                let (participant, error) = missing.remove(0);
                Err(AggregationError::ProviderUnavailable { participant, error })
            }
            _ => Err(AggregationError::PartialAvailability {
                missing: missing.into_iter().map(|(id, _)| id).collect(),
            }),
        }
    }

    async fn fetch_one(
        &self,
        participant: &Participant,
        window: &TimeRange,
    ) -> Result<(ParticipantAvailability, Vec<String>), ProviderError> {
        let provider = self.directory.provider_for(&participant.id)?;
        tracing::debug!(participant = %participant.id, provider = %provider.kind(), "Fetching busy intervals");
        let snapshot = with_retry(&self.retry, "get_busy_intervals", || {
            provider.get_busy_intervals(&participant.id, window)
        })
        .await?;
        Ok(self.normalize(&participant.id, snapshot, window, provider.kind()))
    }

    /// Resolve a snapshot to merged UTC busy time. Bad timezones or rules in
    /// provider data degrade to warnings rather than failing the participant.
    pub fn normalize(
        &self,
        participant_id: &str,
        snapshot: BusySnapshot,
        window: &TimeRange,
        source: ProviderKind,
    ) -> (ParticipantAvailability, Vec<String>) {
        let mut warnings = Vec::new();

        let tz = match snapshot.timezone.as_deref() {
            None => self.default_tz,
            Some(name) => parse_timezone(name).unwrap_or_else(|e| {
                warnings.push(format!(
                    "{participant_id}: {e}; using {}",
                    self.default_tz.name()
                ));
                self.default_tz
            }),
        };

        let mut recurring: Vec<BusyInterval> = Vec::new();
        for block in &snapshot.recurring {
            match block.expand(window, source) {
                Ok(mut instances) => recurring.append(&mut instances),
                Err(e) => warnings.push(format!("{participant_id}: skipped recurring block: {e}")),
            }
        }

        let availability = ParticipantAvailability::from_raw(
            participant_id,
            tz,
            &snapshot.busy,
            &recurring,
            window,
            self.dst_policy,
            source,
        );
        (availability, warnings)
    }
}
