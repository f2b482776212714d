//! Notification dispatch for terminal outcomes.
//!
//! The engine emits and moves on. Delivery guarantees belong to the
//! dispatcher implementation.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slot_engine::TimeRange;
use uuid::Uuid;

use crate::model::FailureReason;

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify_confirmed(&self, request_id: Uuid, slot: &TimeRange);
    async fn notify_failed(&self, request_id: Uuid, reason: &FailureReason);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    async fn notify_confirmed(&self, request_id: Uuid, slot: &TimeRange) {
        tracing::info!(%request_id, %slot, "Interview confirmed");
    }

    async fn notify_failed(&self, request_id: Uuid, reason: &FailureReason) {
        tracing::warn!(%request_id, %reason, "Interview could not be scheduled");
    }
}

/// A notification captured by [`RecordingDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Confirmed { request_id: Uuid, slot: TimeRange },
    Failed { request_id: Uuid, reason: FailureReason },
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, notification: Notification) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn notify_confirmed(&self, request_id: Uuid, slot: &TimeRange) {
        self.push(Notification::Confirmed {
            request_id,
            slot: *slot,
        });
    }

    async fn notify_failed(&self, request_id: Uuid, reason: &FailureReason) {
        self.push(Notification::Failed {
            request_id,
            reason: reason.clone(),
        });
    }
}
