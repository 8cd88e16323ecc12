//! Groups now-playing snapshots into viewing and listening sessions.
//!
//! Collectors poll Apple TVs and Spotify accounts and append one row per
//! snapshot to the `now_playing` table. The session builder periodically
//! turns that raw log into `viewing_sessions`: contiguous spans of one media
//! item on one device, with watch time and completion.
//!
//! Core modules:
//! - [`event`] - Raw snapshots, playback states and validation
//! - [`session`] - Per-device grouping and the builder run
//! - [`store`] - Event log and session repositories (SQLite, in-memory)
//! - [`collector`] - Recording rules for polled snapshots
//! - [`report`] - Usage summaries and CSV export
//!
//! ### Supporting Modules
//!
//! - [`config`] - Data directory and `config.toml`
//! - [`cli`] - Command-line interface definitions
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use nowplaying::event::{PlaybackState, RawEvent};
//! use nowplaying::session::SessionBuilder;
//! use nowplaying::store::{EventLog, SqliteStore};
//!
//! let mut store = SqliteStore::open(&nowplaying::config::get_db_path()?)?;
//! store.append(&RawEvent::new(chrono::Utc::now(), "Living Room", "Movie", PlaybackState::Playing))?;
//!
//! let report = SessionBuilder::default().run(&mut store)?;
//! println!("{} sessions written", report.sessions_written);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Grouping Rules
//!
//! - A new session starts when the media identity changes or the gap to the
//!   previous snapshot exceeds the threshold (10 minutes by default).
//! - Watch time accrues between two snapshots only while the earlier one was
//!   `Playing`.
//! - A device whose rows are malformed or out of order is skipped for the
//!   run and keeps its previously stored sessions.

pub mod cli;
pub mod collector;
pub mod completion;
pub mod config;
pub mod event;
pub mod report;
pub mod session;
pub mod store;
