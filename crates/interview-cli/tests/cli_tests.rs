//! Integration tests for the `interview-scheduler` binary.
//!
//! Every test pins `--now` to Monday 2026-03-16 09:00 UTC and runs against
//! `tests/fixtures/calendars.json`, where the first slot all three
//! participants share is 10:00-10:30 UTC and the next is 12:00.

// `Command::cargo_bin` was deprecated in assert_cmd 2.1.2 in favor of
// `cargo::cargo_bin_cmd!`. Allow it until we migrate.
#![allow(deprecated)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

const NOW: &str = "2026-03-16T09:00:00Z";

fn calendars_path() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/calendars.json")
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "interview-cli-{name}-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A command with the fixture calendars and pinned clock.
fn scheduler(calendars: &Path) -> Command {
    let mut cmd = Command::cargo_bin("interview-scheduler").unwrap();
    cmd.env_remove("RUST_LOG")
        .arg("--calendars")
        .arg(calendars)
        .args(["--now", NOW]);
    cmd
}

/// Run `schedule` against a store and return the new request id.
fn schedule_into(store: &Path) -> String {
    let output = scheduler(Path::new(calendars_path()))
        .arg("--store")
        .arg(store)
        .args(["--json", "schedule", "-p", "alice,bob", "--duration", "30"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    record["request"]["id"].as_str().unwrap().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and argument errors
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("interview-scheduler")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("slots"))
        .stdout(predicate::str::contains("schedule"))
        .stdout(predicate::str::contains("cancel"))
        .stdout(predicate::str::contains("resume"));
}

#[test]
fn slots_requires_participants() {
    scheduler(Path::new(calendars_path()))
        .arg("slots")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--participants"));
}

#[test]
fn missing_calendars_file_is_reported() {
    scheduler(Path::new("/nonexistent/calendars.json"))
        .args(["slots", "-p", "alice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read calendars file"));
}

// ─────────────────────────────────────────────────────────────────────────────
// slots
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn slots_lists_earliest_common_slot_first() {
    scheduler(Path::new(calendars_path()))
        .args(["slots", "-p", "alice,bob,carol", "--duration", "30", "--limit", "2"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "2026-03-16T10:00:00+00:00 - 2026-03-16T10:30:00+00:00",
        ))
        .stdout(predicate::str::contains("2026-03-16T12:00:00+00:00"));
}

#[test]
fn slots_json_is_an_array_of_candidates() {
    let output = scheduler(Path::new(calendars_path()))
        .args(["--json", "slots", "-p", "alice,bob", "--duration", "30", "--limit", "3"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let slots: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let slots = slots.as_array().unwrap();
    assert_eq!(slots.len(), 3);
    assert_eq!(slots[0]["start"], "2026-03-16T10:00:00Z");
    assert_eq!(slots[0]["end"], "2026-03-16T10:30:00Z");
}

#[test]
fn optional_participant_busy_time_is_respected() {
    scheduler(Path::new(calendars_path()))
        .args(["slots", "-p", "alice", "--duration", "60", "--window-days", "1"])
        .args(["-o", "carol"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2026-03-16T10:00:00+00:00"));
}

// ─────────────────────────────────────────────────────────────────────────────
// schedule
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn schedule_confirms_on_every_calendar() {
    scheduler(Path::new(calendars_path()))
        .args(["schedule", "-p", "alice,bob,carol", "--duration", "30"])
        .args(["--title", "Systems design"])
        .assert()
        .success()
        .stdout(predicate::str::contains(": confirmed"))
        .stdout(predicate::str::contains(
            "Slot: 2026-03-16T10:00:00+00:00 - 2026-03-16T10:30:00+00:00",
        ))
        .stdout(predicate::str::contains("alice (google_calendar)"))
        .stdout(predicate::str::contains("bob (office365)"))
        .stdout(predicate::str::contains("carol (generic)"))
        .stdout(predicate::str::contains("Attempts: 1"));
}

#[test]
fn schedule_rejects_zero_duration() {
    scheduler(Path::new(calendars_path()))
        .args(["schedule", "-p", "alice", "--duration", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid request"));
}

#[test]
fn out_of_range_window_or_duration_is_an_error_not_a_crash() {
    let huge_days = u32::MAX.to_string();
    let huge_minutes = i64::MAX.to_string();
    let cases = [
        vec!["slots", "-p", "alice", "--window-days", huge_days.as_str()],
        vec!["slots", "-p", "alice", "--duration", huge_minutes.as_str()],
        vec!["schedule", "-p", "alice", "--window-days", huge_days.as_str()],
        vec!["schedule", "-p", "alice", "--duration", huge_minutes.as_str()],
    ];

    for args in cases {
        scheduler(Path::new(calendars_path()))
            .args(&args)
            .assert()
            .code(1)
            .stderr(predicate::str::contains("out of range"))
            .stderr(predicate::str::contains("panicked").not());
    }
}

#[test]
fn schedule_with_unknown_participant_fails_with_nonzero_exit() {
    scheduler(Path::new(calendars_path()))
        .args(["schedule", "-p", "alice,mallory", "--duration", "30"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains(": failed"))
        .stdout(predicate::str::contains("mallory"));
}

#[test]
fn write_back_makes_booked_slot_busy() {
    let dir = scratch_dir("write-back");
    let calendars = dir.join("calendars.json");
    std::fs::copy(calendars_path(), &calendars).unwrap();

    scheduler(&calendars)
        .args(["schedule", "-p", "alice,bob", "--duration", "30", "--write-back"])
        .assert()
        .success();

    let saved = std::fs::read_to_string(&calendars).unwrap();
    assert!(saved.contains("\"events\""));
    assert!(saved.contains("evt-"));

    scheduler(&calendars)
        .args(["slots", "-p", "alice,bob", "--duration", "30", "--limit", "1"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("2026-03-16T12:00:00+00:00"));

    std::fs::remove_dir_all(&dir).unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Stored requests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn status_reads_a_stored_request() {
    let store = scratch_dir("status");
    let id = schedule_into(&store);

    scheduler(Path::new(calendars_path()))
        .arg("--store")
        .arg(&store)
        .args(["status", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Request {id}: confirmed")));

    std::fs::remove_dir_all(&store).unwrap();
}

#[test]
fn status_json_includes_history() {
    let store = scratch_dir("status-json");
    let id = schedule_into(&store);

    let output = scheduler(Path::new(calendars_path()))
        .arg("--store")
        .arg(&store)
        .args(["--json", "status", &id])
        .output()
        .unwrap();
    assert!(output.status.success());

    let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(record["request"]["status"]["state"], "confirmed");
    let states: Vec<&str> = record["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["to"].as_str().unwrap())
        .collect();
    assert_eq!(
        states,
        vec!["aggregating_availability", "selecting_slot", "booking", "confirmed"]
    );

    std::fs::remove_dir_all(&store).unwrap();
}

#[test]
fn status_without_store_is_an_error() {
    scheduler(Path::new(calendars_path()))
        .args(["status", "6f1c2a52-8d0b-4c55-9f53-3b0e1f7c2d11"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("needs --store"));
}

#[test]
fn status_of_unknown_request_is_not_found() {
    let store = scratch_dir("unknown");

    scheduler(Path::new(calendars_path()))
        .arg("--store")
        .arg(&store)
        .args(["status", "6f1c2a52-8d0b-4c55-9f53-3b0e1f7c2d11"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));

    std::fs::remove_dir_all(&store).unwrap();
}

#[test]
fn cancelling_a_confirmed_request_is_rejected() {
    let store = scratch_dir("cancel");
    let id = schedule_into(&store);

    scheduler(Path::new(calendars_path()))
        .arg("--store")
        .arg(&store)
        .args(["cancel", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already confirmed"));

    std::fs::remove_dir_all(&store).unwrap();
}

#[test]
fn resume_with_empty_store_has_nothing_to_do() {
    let store = scratch_dir("resume");

    scheduler(Path::new(calendars_path()))
        .arg("--store")
        .arg(&store)
        .arg("resume")
        .assert()
        .success()
        .stdout(predicate::str::contains("No pending requests"));

    std::fs::remove_dir_all(&store).unwrap();
}
