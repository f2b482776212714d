//! Tests for atomic multi-calendar booking.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{TimeZone, Utc};
use interview_workflow::{
    BookingAttempt, BookingGateway, BookingOutcome, CalendarDirectory, CalendarSeed, Fault,
    InMemoryCalendar, ProviderError, RetryPolicy,
};
use slot_engine::{ProviderKind, TimeRange};
use uuid::Uuid;

fn slot() -> TimeRange {
    TimeRange::new(
        Utc.with_ymd_and_hms(2026, 3, 16, 10, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 3, 16, 10, 30, 0).unwrap(),
    )
    .unwrap()
}

fn setup(ids: &[&str]) -> (Arc<InMemoryCalendar>, BookingGateway) {
    let cal = Arc::new(InMemoryCalendar::new(ProviderKind::Office365));
    for id in ids {
        cal.seed(id, CalendarSeed::default());
    }
    let retry = RetryPolicy {
        max_retries: 1,
        base: StdDuration::from_millis(1),
        max: StdDuration::from_millis(2),
        timeout: StdDuration::from_millis(200),
    };
    let gateway = BookingGateway::new(CalendarDirectory::new().with_fallback(cal.clone()), retry);
    (cal, gateway)
}

fn attendees(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn attempt<'a>(request_id: Uuid, people: &'a [String]) -> BookingAttempt<'a> {
    BookingAttempt {
        request_id,
        attempt: 1,
        slot: slot(),
        title: "Interview",
        attendees: people,
    }
}

#[tokio::test]
async fn commits_on_every_calendar() {
    let (cal, gateway) = setup(&["a", "b", "c"]);
    let people = attendees(&["a", "b", "c"]);

    let outcome = gateway.book(attempt(Uuid::new_v4(), &people)).await;

    let BookingOutcome::Committed(events) = outcome else {
        panic!("expected commit, got {outcome:?}");
    };
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.provider == ProviderKind::Office365));
    assert_eq!(cal.total_events(), 3);
}

#[tokio::test]
async fn conflict_rolls_back_every_other_calendar() {
    let (cal, gateway) = setup(&["a", "b", "c"]);
    cal.fail_next_create("c", Fault::Race);
    let people = attendees(&["a", "b", "c"]);

    let outcome = gateway.book(attempt(Uuid::new_v4(), &people)).await;

    assert_eq!(
        outcome,
        BookingOutcome::Conflict {
            participants: vec!["c".into()],
            residual: vec![],
        }
    );
    assert_eq!(cal.total_events(), 0);
}

#[tokio::test]
async fn conflict_outranks_provider_error() {
    let (cal, gateway) = setup(&["a", "b", "c"]);
    cal.fail_next_create("a", Fault::Permanent);
    cal.fail_next_create("b", Fault::Race);
    let people = attendees(&["a", "b", "c"]);

    let outcome = gateway.book(attempt(Uuid::new_v4(), &people)).await;

    assert!(matches!(outcome, BookingOutcome::Conflict { .. }));
    assert_eq!(cal.total_events(), 0);
}

#[tokio::test]
async fn provider_error_rolls_back_and_names_participant() {
    let (cal, gateway) = setup(&["a", "b"]);
    cal.fail_next_create("b", Fault::Transient);
    cal.fail_next_create("b", Fault::Transient);
    let people = attendees(&["a", "b"]);

    let outcome = gateway.book(attempt(Uuid::new_v4(), &people)).await;

    match outcome {
        BookingOutcome::ProviderError {
            participant,
            error,
            residual,
        } => {
            assert_eq!(participant, "b");
            assert!(matches!(error, ProviderError::Transient(_)));
            assert!(residual.is_empty());
        }
        other => panic!("expected provider error, got {other:?}"),
    }
    assert_eq!(cal.total_events(), 0);
}

#[tokio::test]
async fn conflict_reports_events_its_rollback_left_behind() {
    let (cal, gateway) = setup(&["a", "b"]);
    cal.fail_next_create("b", Fault::Race);
    cal.fail_next_delete("a", Fault::Permanent);
    let people = attendees(&["a", "b"]);

    let outcome = gateway.book(attempt(Uuid::new_v4(), &people)).await;

    let BookingOutcome::Conflict { residual, .. } = outcome else {
        panic!("expected conflict, got {outcome:?}");
    };
    assert_eq!(residual.len(), 1);
    assert_eq!(residual[0].0.participant_id, "a");
    assert!(matches!(residual[0].1, ProviderError::Permanent(_)));
    assert_eq!(cal.events("a").len(), 1);
}

#[tokio::test]
async fn repeated_booking_is_idempotent() {
    let (cal, gateway) = setup(&["a", "b"]);
    let people = attendees(&["a", "b"]);
    let id = Uuid::new_v4();

    let first = gateway.book(attempt(id, &people)).await;
    let second = gateway.book(attempt(id, &people)).await;

    assert_eq!(first, second);
    assert_eq!(cal.total_events(), 2);
}

#[tokio::test]
async fn rollback_retries_transient_delete_failures() {
    let (cal, gateway) = setup(&["a"]);
    let people = attendees(&["a"]);
    let BookingOutcome::Committed(events) = gateway.book(attempt(Uuid::new_v4(), &people)).await
    else {
        panic!("expected commit");
    };
    cal.fail_next_delete("a", Fault::Transient);

    let failed = gateway.rollback(&events).await;

    assert!(failed.is_empty());
    assert_eq!(cal.total_events(), 0);
}

#[tokio::test]
async fn rollback_reports_events_it_could_not_delete() {
    let (cal, gateway) = setup(&["a"]);
    let people = attendees(&["a"]);
    let BookingOutcome::Committed(events) = gateway.book(attempt(Uuid::new_v4(), &people)).await
    else {
        panic!("expected commit");
    };
    cal.fail_next_delete("a", Fault::Permanent);

    let failed = gateway.rollback(&events).await;

    assert_eq!(failed.len(), 1);
    assert_eq!(cal.total_events(), 1);
}
