//! # interview-workflow
//!
//! Durable orchestration that turns a scheduling request into a confirmed
//! interview on every participant's calendar.
//!
//! A request flows through the [`engine::WorkflowEngine`]: availability is
//! fetched concurrently from each participant's calendar provider
//! ([`aggregator`]), mutually free slots are ranked by the `slot-engine`
//! crate, and the best slot is booked on all calendars at once
//! ([`gateway`]). Any incomplete booking is rolled back. Conflicts and empty
//! windows are retried up to a bounded attempt count, and every transition is
//! persisted ([`store`]) so an execution can resume after a restart.
//!
//! ## Modules
//!
//! - [`config`]: `SchedulerConfig`, TOML and environment loading
//! - [`model`]: Requests, statuses, workflow records
//! - [`provider`]: Calendar provider capability and per-participant routing
//! - [`memory`]: In-memory calendar with fault injection
//! - [`retry`]: Timeouts and exponential backoff for provider calls
//! - [`aggregator`]: Availability Aggregator
//! - [`gateway`]: Booking Gateway with compensating rollback
//! - [`notify`]: Notification dispatchers
//! - [`store`]: Durable stores with per-request leases
//! - [`engine`]: The workflow state machine
//! - [`service`]: Submit, status, cancel, resume
//! - [`clock`]: Injectable time source

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod model;
pub mod notify;
pub mod provider;
pub mod retry;
pub mod service;
pub mod store;

pub use aggregator::{AggregatedAvailability, AvailabilityAggregator};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::SchedulerConfig;
pub use engine::WorkflowEngine;
pub use error::{AggregationError, CreateEventError, ProviderError, SchedulingError, StoreError};
pub use gateway::{BookingAttempt, BookingGateway, BookingOutcome, BookingResult};
pub use memory::{CalendarSeed, Fault, InMemoryCalendar, StoredEvent};
pub use model::{
    BookedEvent, FailureReason, Participant, RequestStatus, SchedulingRequest, SubmitRequest,
    Transition, WorkflowRecord,
};
pub use notify::{Notification, NotificationDispatcher, RecordingDispatcher, TracingDispatcher};
pub use provider::{BusySnapshot, CalendarDirectory, CalendarProvider, EventRequest};
pub use retry::{with_retry, RetryPolicy, Retryable};
pub use service::SchedulingService;
pub use store::{FileStore, Lease, MemoryStore, WorkflowStore};
