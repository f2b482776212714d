//! Tests for availability aggregation across providers.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use interview_workflow::{
    AggregationError, AvailabilityAggregator, BusySnapshot, CalendarDirectory, CalendarSeed, Fault,
    InMemoryCalendar, Participant, ProviderError, RetryPolicy,
};
use slot_engine::{DstPolicy, EventTime, ProviderKind, RawBusy, RecurringBusy, TimeRange, Tz};

fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, min, 0).unwrap()
}

fn window() -> TimeRange {
    TimeRange::new(at(16, 0, 0), at(18, 0, 0)).unwrap()
}

fn retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        base: StdDuration::from_millis(1),
        max: StdDuration::from_millis(2),
        timeout: StdDuration::from_millis(100),
    }
}

fn aggregator(directory: CalendarDirectory) -> AvailabilityAggregator {
    AvailabilityAggregator::new(directory, retry(), Tz::UTC, DstPolicy::WallClock)
}

fn floating(day: u32, hour: u32) -> EventTime {
    EventTime::Floating(
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap(),
    )
}

#[tokio::test]
async fn providers_of_every_kind_are_merged_per_participant() {
    let google = Arc::new(InMemoryCalendar::new(ProviderKind::GoogleCalendar));
    let office = Arc::new(InMemoryCalendar::new(ProviderKind::Office365));
    google.seed(
        "a",
        CalendarSeed {
            busy: vec![
                RawBusy::utc(at(16, 9, 0), at(16, 10, 0)),
                RawBusy::utc(at(16, 9, 30), at(16, 11, 0)),
                RawBusy::utc(at(16, 11, 0), at(16, 12, 0)),
            ],
            ..CalendarSeed::default()
        },
    );
    office.seed(
        "b",
        CalendarSeed {
            timezone: Some("Europe/Berlin".into()),
            // 14:00 Berlin (UTC+1 in March before DST) == 13:00 UTC
            busy: vec![RawBusy {
                start: floating(16, 14),
                end: floating(16, 15),
            }],
            ..CalendarSeed::default()
        },
    );
    let mut directory = CalendarDirectory::new();
    directory.register("a", google);
    directory.register("b", office);

    let result = aggregator(directory)
        .aggregate(
            &[Participant::required("a"), Participant::required("b")],
            &window(),
        )
        .await
        .unwrap();

    let a = &result.participants[0];
    assert_eq!(a.busy().len(), 1);
    assert_eq!(a.busy()[0].start, at(16, 9, 0));
    assert_eq!(a.busy()[0].end, at(16, 12, 0));
    assert_eq!(a.busy()[0].source, ProviderKind::GoogleCalendar);

    let b = &result.participants[1];
    assert_eq!(b.timezone, "Europe/Berlin".parse::<Tz>().unwrap());
    assert_eq!(b.busy()[0].start, at(16, 13, 0));
    assert_eq!(b.busy()[0].source, ProviderKind::Office365);
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn recurring_blocks_are_expanded_into_busy_time() {
    let cal = Arc::new(InMemoryCalendar::default());
    cal.seed(
        "a",
        CalendarSeed {
            recurring: vec![RecurringBusy {
                rrule: "FREQ=DAILY".into(),
                dtstart: NaiveDate::from_ymd_opt(2026, 3, 1)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
                duration_minutes: 15,
                timezone: "UTC".into(),
            }],
            ..CalendarSeed::default()
        },
    );

    let result = aggregator(CalendarDirectory::new().with_fallback(cal))
        .aggregate(&[Participant::required("a")], &window())
        .await
        .unwrap();

    let starts: Vec<DateTime<Utc>> = result.participants[0]
        .busy()
        .iter()
        .map(|b| b.start)
        .collect();
    assert_eq!(starts, vec![at(16, 9, 0), at(17, 9, 0)]);
}

#[test]
fn bad_provider_data_degrades_to_warnings() {
    let agg = aggregator(CalendarDirectory::new());
    let snapshot = BusySnapshot {
        timezone: Some("Mars/Olympus".into()),
        busy: vec![RawBusy::utc(at(16, 9, 0), at(16, 10, 0))],
        recurring: vec![RecurringBusy {
            rrule: "FREQ=SOMETIMES".into(),
            dtstart: NaiveDate::from_ymd_opt(2026, 3, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            duration_minutes: 30,
            timezone: "UTC".into(),
        }],
    };

    let (availability, warnings) =
        agg.normalize("a", snapshot, &window(), ProviderKind::Generic);

    assert_eq!(availability.timezone, Tz::UTC);
    assert_eq!(availability.busy().len(), 1);
    assert_eq!(warnings.len(), 2);
}

#[tokio::test]
async fn transient_fetch_failure_is_retried() {
    let cal = Arc::new(InMemoryCalendar::default());
    cal.seed("a", CalendarSeed::default());
    cal.fail_next_fetch("a", Fault::Transient);

    let result = aggregator(CalendarDirectory::new().with_fallback(cal))
        .aggregate(&[Participant::required("a")], &window())
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn slow_provider_times_out_as_provider_error() {
    let cal = Arc::new(InMemoryCalendar::default());
    cal.seed("a", CalendarSeed::default());
    cal.fail_next_fetch("a", Fault::Delay(StdDuration::from_secs(5)));
    cal.fail_next_fetch("a", Fault::Delay(StdDuration::from_secs(5)));

    let err = aggregator(CalendarDirectory::new().with_fallback(cal))
        .aggregate(&[Participant::required("a")], &window())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        AggregationError::ProviderUnavailable {
            participant: "a".into(),
            error: ProviderError::Timeout(StdDuration::from_millis(100)),
        }
    );
}

#[tokio::test]
async fn unregistered_participant_is_unavailable() {
    let err = aggregator(CalendarDirectory::new())
        .aggregate(&[Participant::required("ghost")], &window())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AggregationError::ProviderUnavailable {
            error: ProviderError::Permanent(_),
            ..
        }
    ));
}

#[tokio::test]
async fn failed_optional_participant_is_dropped() {
    let cal = Arc::new(InMemoryCalendar::default());
    cal.seed("a", CalendarSeed::default());
    cal.seed("opt", CalendarSeed::default());
    cal.fail_next_fetch("opt", Fault::Permanent);

    let result = aggregator(CalendarDirectory::new().with_fallback(cal))
        .aggregate(
            &[Participant::required("a"), Participant::optional("opt")],
            &window(),
        )
        .await
        .unwrap();

    assert_eq!(result.attendees(), vec!["a".to_string()]);
    assert_eq!(result.dropped, vec!["opt".to_string()]);
    assert_eq!(result.warnings.len(), 1);
}
