//! # nowplaying
//!
//! Batch tool over the now-playing event log. The scheduler runs it with no
//! arguments (every 12 hours) to rebuild viewing sessions; the other
//! subcommands create the database, ingest events and print reports.
//!
//! ## Usage
//!
//! ```bash
//! # Rebuild sessions
//! nowplaying
//!
//! # Feed snapshots from an external poller
//! poller --json | nowplaying ingest
//!
//! # Reports
//! nowplaying recent --limit 50
//! nowplaying stats
//! nowplaying daily --days 30
//! nowplaying export --output sessions.csv
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use log::{debug, info};
use nowplaying::cli::{Args, Command};
use nowplaying::collector::{self, CollectReport};
use nowplaying::config::{FileConfig, RuntimeConfig};
use nowplaying::session::{BuildReport, SessionBuilder};
use nowplaying::store::{SessionStore, SqliteStore};
use nowplaying::{completion, report};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};

/// Main entry point.
///
/// Logging is controlled via `RUST_LOG`:
/// - `RUST_LOG=info nowplaying` - Run summary and per-event collector lines
/// - `RUST_LOG=nowplaying::session=debug nowplaying` - Per-device session counts
fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let command = args.command.clone().unwrap_or_default();

    if let Command::Completion { shell } = &command {
        let mut cmd = Args::command();
        completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
        return Ok(());
    }

    let (gap_minutes, min_watch_seconds) = match &command {
        Command::Build {
            gap_minutes,
            min_watch_seconds,
        } => (*gap_minutes, *min_watch_seconds),
        _ => (None, None),
    };
    let file_config = FileConfig::discover(args.config.as_deref())?;
    let config = RuntimeConfig::resolve(file_config, args.db, gap_minutes, min_watch_seconds)?;
    debug!("Using database {}", config.db_path.display());

    match command {
        Command::Build { .. } => {
            let mut store = SqliteStore::open(&config.db_path)?;
            let report = SessionBuilder::new(config.session_config()).run(&mut store)?;
            print_build_report(&report);
        }
        Command::InitDb => {
            SqliteStore::open(&config.db_path)?;
            println!("Database ready at {}", config.db_path.display());
        }
        Command::Ingest { file } => {
            let mut store = SqliteStore::open(&config.db_path)?;
            let counts = match file {
                Some(path) => {
                    info!("Ingesting events from {}", path.display());
                    let reader = File::open(&path)
                        .with_context(|| format!("Failed to open {}", path.display()))?;
                    collector::ingest_json_lines(BufReader::new(reader), &mut store)?
                }
                None => collector::ingest_json_lines(io::stdin().lock(), &mut store)?,
            };
            print_ingest_report(&counts);
        }
        Command::Recent { limit, device } => {
            let store = SqliteStore::open(&config.db_path)?;
            let sessions = report::recent_sessions(store.connection(), limit, device.as_deref())?;
            if sessions.is_empty() {
                println!("No sessions found. Run `nowplaying build` first.");
            } else {
                report::print_recent(&sessions);
            }
        }
        Command::Stats => {
            let store = SqliteStore::open(&config.db_path)?;
            report::print_stats(store.connection())?;
        }
        Command::Daily { days } => {
            let store = SqliteStore::open(&config.db_path)?;
            let usage = report::daily_usage(store.connection(), days, Utc::now().date_naive())?;
            report::print_daily(days, &usage);
        }
        Command::Export { output } => {
            let store = SqliteStore::open(&config.db_path)?;
            let sessions = store.all_sessions()?;
            let file = File::create(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            let written = report::export_csv(&sessions, BufWriter::new(file))?;
            println!("Exported {written} sessions to {}", output.display());
        }
        Command::CompleteDevices { shell } => {
            // Completion must stay quiet; an unreadable database just yields nothing.
            if let Err(e) = completion::print_device_completions(&config.db_path, shell.as_ref()) {
                debug!("Device completion unavailable: {e:#}");
            }
        }
        // Generated above, before any config is read.
        Command::Completion { .. } => {}
    }

    Ok(())
}

fn print_build_report(report: &BuildReport) {
    println!(
        "Processed {} events: {} sessions written for {} devices",
        report.events_read, report.sessions_written, report.devices_processed
    );
    if report.sessions_filtered > 0 {
        println!("Filtered {} short sessions", report.sessions_filtered);
    }
    for rejection in &report.rejected {
        println!(
            "Skipped device `{}` (row {}): {}",
            rejection.device_name, rejection.event_id, rejection.error
        );
    }
}

fn print_ingest_report(counts: &CollectReport) {
    println!(
        "Read {} events: {} recorded, {} repeated pauses skipped, {} idle",
        counts.polled, counts.appended, counts.suppressed, counts.idle
    );
}
