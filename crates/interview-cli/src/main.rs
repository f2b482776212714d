//! `interview-scheduler` CLI: preview, schedule and manage interview requests
//! against calendars described in a JSON fixture.
//!
//! ## Usage
//!
//! ```sh
//! # Show the best mutually free 45-minute slots for three participants
//! interview-scheduler --calendars calendars.json slots -p alice,bob -o carol --duration 45
//!
//! # Schedule and book, persisting state so the request can be inspected later
//! interview-scheduler --calendars calendars.json --store ./state \
//!     schedule -p alice,bob --title "Onsite loop" --write-back
//!
//! # Inspect or cancel a stored request
//! interview-scheduler --store ./state status 6f1c...
//! interview-scheduler --calendars calendars.json --store ./state cancel 6f1c...
//!
//! # Resume every request left unfinished by a previous run
//! interview-scheduler --calendars calendars.json --store ./state resume
//! ```

mod fixture;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand};
use interview_workflow::{
    Clock, FixedClock, FileStore, MemoryStore, Participant, RequestStatus,
    SchedulerConfig, SchedulingService, SubmitRequest, SystemClock, TracingDispatcher,
    WorkflowEngine, WorkflowRecord, WorkflowStore,
};
use slot_engine::TimeRange;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::fixture::{CalendarFixture, LoadedCalendars};

#[derive(Parser)]
#[command(
    name = "interview-scheduler",
    version,
    about = "Schedule interviews across participants' calendars"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (environment variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON file describing every participant's calendar
    #[arg(long, global = true)]
    calendars: Option<PathBuf>,

    /// Directory for durable request state (in-memory if omitted)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Pin the current time (RFC 3339), e.g. 2026-03-16T09:00:00Z
    #[arg(long, global = true)]
    now: Option<DateTime<Utc>>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Args)]
struct ParticipantArgs {
    /// Comma-separated required participant ids
    #[arg(short, long, value_delimiter = ',', required = true)]
    participants: Vec<String>,

    /// Comma-separated optional participant ids
    #[arg(short, long, value_delimiter = ',')]
    optional: Vec<String>,

    /// Interview length in minutes (config default if omitted)
    #[arg(short, long)]
    duration: Option<i64>,

    /// Days ahead to search (config default if omitted)
    #[arg(short, long)]
    window_days: Option<u32>,
}

impl ParticipantArgs {
    fn participants(&self) -> Vec<Participant> {
        self.participants
            .iter()
            .map(Participant::required)
            .chain(self.optional.iter().map(Participant::optional))
            .collect()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List ranked free slots without booking
    Slots {
        #[command(flatten)]
        who: ParticipantArgs,
        /// Number of slots to show
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Submit a request and run it to completion
    Schedule {
        #[command(flatten)]
        who: ParticipantArgs,
        /// Event title
        #[arg(short, long)]
        title: Option<String>,
        /// Save booked events back into the calendars file
        #[arg(long)]
        write_back: bool,
    },
    /// Show a stored request
    Status {
        /// Request id
        id: Uuid,
    },
    /// Cancel a stored request and roll back its bookings
    Cancel {
        /// Request id
        id: Uuid,
    },
    /// Resume every unfinished request in the store
    Resume,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let config = load_config(cli.config.as_deref())?;
    let calendars = match cli.calendars.as_deref() {
        Some(path) => LoadedCalendars::from_fixture(CalendarFixture::load(path)?),
        None => LoadedCalendars::from_fixture(CalendarFixture::default()),
    };
    tracing::debug!(
        participants = calendars.participant_count(),
        "Calendars loaded"
    );
    let store: Arc<dyn WorkflowStore> = match cli.store.as_deref() {
        Some(dir) => Arc::new(
            FileStore::open(dir)
                .with_context(|| format!("Failed to open store: {}", dir.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };
    let clock: Arc<dyn Clock> = match cli.now {
        Some(now) => Arc::new(FixedClock::new(now)),
        None => Arc::new(SystemClock),
    };
    let engine = Arc::new(WorkflowEngine::new(
        config,
        calendars.directory.clone(),
        store,
        Arc::new(TracingDispatcher),
        clock,
    ));
    let service = SchedulingService::new(engine);

    let succeeded = match cli.command {
        Commands::Slots { who, limit } => {
            show_slots(&service, &who, limit, cli.json).await?;
            true
        }
        Commands::Schedule {
            who,
            title,
            write_back,
        } => {
            let write_back_to = match (write_back, cli.calendars.as_deref()) {
                (false, _) => None,
                (true, Some(path)) => Some(path),
                (true, None) => anyhow::bail!("--write-back needs --calendars"),
            };
            let submission = SubmitRequest {
                participants: who.participants(),
                duration_minutes: who.duration,
                window_days: who.window_days,
                title,
            };
            let id = service
                .submit_scheduling_request(submission)
                .await
                .context("Failed to submit scheduling request")?;
            service.await_completion(id).await?;
            if let Some(path) = write_back_to {
                calendars.write_back(path)?;
            }
            report(&service.get_record(id)?, cli.json)?
        }
        Commands::Status { id } => {
            require_store(cli.store.as_deref(), "status")?;
            report(&service.get_record(id)?, cli.json)?;
            true
        }
        Commands::Cancel { id } => {
            require_store(cli.store.as_deref(), "cancel")?;
            service.cancel_request(id)?;
            service.await_completion(id).await?;
            report(&service.get_record(id)?, cli.json)?;
            true
        }
        Commands::Resume => {
            require_store(cli.store.as_deref(), "resume")?;
            let resumed = service.resume_pending()?;
            if resumed.is_empty() && !cli.json {
                println!("No pending requests");
            }
            let mut all_confirmed = true;
            for id in &resumed {
                service.await_completion(*id).await?;
                all_confirmed &= report(&service.get_record(*id)?, cli.json)?;
            }
            all_confirmed
        }
    };

    if !succeeded {
        process::exit(1);
    }
    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose {
        "interview_workflow=debug,interview_scheduler=debug"
    } else {
        "interview_workflow=warn,interview_scheduler=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<SchedulerConfig> {
    let config = match path {
        Some(path) => SchedulerConfig::load_from(path)?.with_env_overrides()?,
        None => SchedulerConfig::from_env()?,
    };
    Ok(config)
}

fn require_store(store: Option<&Path>, command: &str) -> Result<()> {
    if store.is_none() {
        anyhow::bail!("`{command}` needs --store: requests only persist in a store directory");
    }
    Ok(())
}

async fn show_slots(
    service: &SchedulingService,
    who: &ParticipantArgs,
    limit: usize,
    json: bool,
) -> Result<()> {
    let engine = service.engine();
    let config = engine.config();
    let duration = who
        .duration
        .unwrap_or(config.default_interview_duration_minutes);
    let days = who.window_days.unwrap_or(config.scheduling_window_days);
    let now = engine.clock().now();
    let latest = Duration::try_days(i64::from(days))
        .and_then(|span| now.checked_add_signed(span))
        .with_context(|| format!("Invalid request: a {days}-day window is out of range"))?;
    let window = TimeRange::new(now, latest)?;

    let slots = engine
        .preview_slots(&who.participants(), duration, &window, limit)
        .await
        .context("Failed to compute free slots")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&slots)?);
    } else if slots.is_empty() {
        println!("No common free slot in the next {days} day(s)");
    } else {
        for slot in &slots {
            println!("{} - {}", slot.start.to_rfc3339(), slot.end.to_rfc3339());
        }
    }
    Ok(())
}

/// Print a record. Returns false when the request failed.
fn report(record: &WorkflowRecord, json: bool) -> Result<bool> {
    let status = record.status();
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        println!("Request {}: {}", record.id(), status);
        match status {
            RequestStatus::Confirmed { slot, events } => {
                println!("  Slot: {} - {}", slot.start.to_rfc3339(), slot.end.to_rfc3339());
                for event in events {
                    println!(
                        "  {} ({}): {}",
                        event.participant_id, event.provider, event.event_id
                    );
                }
            }
            RequestStatus::Failed { reason } => println!("  Reason: {reason}"),
            _ => {}
        }
        println!("  Attempts: {}", record.request.attempt_count);
        for warning in &record.warnings {
            println!("  Warning: {warning}");
        }
    }
    Ok(!matches!(status, RequestStatus::Failed { .. }))
}
