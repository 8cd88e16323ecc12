//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `nowplaying` binary.
//!
//! ## Commands
//!
//! - `build`: Recompute viewing sessions from the raw event log (default)
//! - `init-db`: Create the database tables
//! - `ingest`: Append JSON-lines events from a file or stdin
//! - `recent`, `stats`, `daily`: Usage reports
//! - `export`: Write all sessions to CSV
//!
//! ## Examples
//!
//! ```bash
//! nowplaying
//! nowplaying build --gap-minutes 15
//! nowplaying recent --limit 50
//! poller | nowplaying ingest
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
///
/// Running without a subcommand is the same as `nowplaying build`, which is
/// what the scheduler invokes.
#[derive(Parser, Debug)]
#[command(name = "nowplaying")]
#[command(about = "Group now-playing snapshots into viewing and listening sessions")]
#[command(version)]
pub struct Args {
    /// Path to the SQLite database
    ///
    /// Overrides `db_path` from the config file. Defaults to
    /// `nowplaying.db` in the platform data directory.
    #[arg(long, global = true, env = "NOWPLAYING_DB")]
    pub db: Option<PathBuf>,

    /// Path to a TOML config file
    ///
    /// Defaults to `config.toml` in the platform config directory; a
    /// missing default file is ignored.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Rebuild viewing sessions from the event log
    ///
    /// Reads every raw event, groups them per device and replaces each
    /// device's stored sessions. Devices with malformed or out-of-order
    /// events are reported and keep their previous sessions.
    Build {
        /// Maximum gap between snapshots of one session, in minutes
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        gap_minutes: Option<u32>,

        /// Drop sessions with less playing time than this, in seconds
        #[arg(long)]
        min_watch_seconds: Option<f64>,
    },

    /// Create the database tables if they do not exist
    InitDb,

    /// Append JSON-lines events to the event log
    ///
    /// Each line is one snapshot object, e.g.
    /// `{"timestamp":"2024-02-10T21:00:00Z","device_name":"Living Room","title":"Movie","state":"Playing"}`.
    /// Stopped snapshots and repeated pauses are not recorded.
    Ingest {
        /// File to read; stdin when omitted
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: Option<PathBuf>,
    },

    /// Show the most recent sessions
    Recent {
        /// Number of sessions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only show sessions from this device
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Show watch-time totals by device, media type, series and song
    Stats,

    /// Show per-day usage
    Daily {
        /// Number of days to include
        #[arg(long, default_value = "7")]
        days: u32,
    },

    /// Export all sessions to CSV
    Export {
        /// Output file
        #[arg(short, long, default_value = "viewing_sessions.csv", value_hint = clap::ValueHint::FilePath)]
        output: PathBuf,
    },

    /// Generate shell completions
    ///
    /// Usage: nowplaying completion bash > ~/.local/share/bash-completion/completions/nowplaying
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List known device names for completion (hidden command)
    #[command(hide = true)]
    CompleteDevices {
        /// Format for this shell's quoting rules
        #[arg(long)]
        shell: Option<Shell>,
    },
}

impl Default for Command {
    fn default() -> Self {
        Command::Build {
            gap_minutes: None,
            min_watch_seconds: None,
        }
    }
}
