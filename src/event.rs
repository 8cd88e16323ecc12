//! # Playback Events
//!
//! Typed representation of one polled "now playing" snapshot. Collectors append
//! these to the `now_playing` table; the session builder reads them back.
//!
//! Rows are read as [`StoredEvent`] (plain column values) and converted into
//! [`RawEvent`] with validation, so a malformed row can be attributed to the
//! device that produced it instead of failing the whole read.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reasons an event (or a device's batch of events) cannot be used.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),

    #[error("unknown playback state `{0}`")]
    UnknownState(String),

    #[error("event has an empty device name")]
    EmptyDevice,

    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    InvalidSeconds { field: &'static str, value: f64 },

    #[error("event at {current} is earlier than previous event at {previous}")]
    OutOfOrder {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },
}

/// Player state reported by a snapshot.
///
/// Deserializes through [`FromStr`], so JSON input accepts the same spellings
/// as the `state` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackState {
    /// Text stored in the `state` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaybackState {
    type Err = EventError;

    /// Case-insensitive. Apple TV reports `Idle` when nothing is loaded,
    /// which is treated the same as `Stopped`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "playing" => Ok(Self::Playing),
            "paused" => Ok(Self::Paused),
            "stopped" | "idle" => Ok(Self::Stopped),
            _ => Err(EventError::UnknownState(s.to_string())),
        }
    }
}

impl TryFrom<String> for PlaybackState {
    type Error = EventError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Everything that identifies "the same media" across snapshots.
///
/// Two snapshots belong to the same media only if every field matches,
/// so two episodes of one series with a shared title are still distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaIdentity {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub series_name: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
}

impl MediaIdentity {
    /// Identity with only a title, as reported by apps without richer metadata.
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Human-readable label: `Series S1E2`, `Artist - Title`, or the title.
    #[must_use]
    pub fn display_title(&self) -> String {
        let title = self.title.as_deref().unwrap_or("(untitled)");
        if let Some(series) = &self.series_name {
            let season = self.season.map_or_else(|| "?".to_string(), |s| s.to_string());
            let episode = self.episode.map_or_else(|| "?".to_string(), |e| e.to_string());
            return format!("{series} S{season}E{episode}");
        }
        match &self.artist {
            Some(artist) => format!("{artist} - {title}"),
            None => title.to_string(),
        }
    }
}

/// One validated playback snapshot for a device at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub timestamp: DateTime<Utc>,
    pub device_name: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(flatten)]
    pub media: MediaIdentity,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(rename = "state")]
    pub playback_state: PlaybackState,
    /// Playback offset in seconds.
    #[serde(default)]
    pub position: Option<f64>,
    /// Total media length in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
}

impl RawEvent {
    /// Minimal event, mostly useful for tests and collectors that only know a title.
    #[must_use]
    pub fn new(
        timestamp: DateTime<Utc>,
        device_name: impl Into<String>,
        title: impl Into<String>,
        playback_state: PlaybackState,
    ) -> Self {
        Self {
            timestamp,
            device_name: device_name.into(),
            user_name: None,
            app: None,
            media: MediaIdentity::titled(title),
            media_type: None,
            playback_state,
            position: None,
            duration: None,
        }
    }

    /// Check the invariants that column types alone cannot enforce.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::EmptyDevice`] for a blank device name and
    /// [`EventError::InvalidSeconds`] for negative or non-finite offsets.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.device_name.trim().is_empty() {
            return Err(EventError::EmptyDevice);
        }
        check_seconds("position", self.position)?;
        check_seconds("duration", self.duration)?;
        Ok(())
    }

    /// Media type with `Unknown` or missing values inferred from context.
    ///
    /// HomePods and snapshots with an artist are `Music`; snapshots with a
    /// series name are `Video`. Anything else is returned as reported.
    #[must_use]
    pub fn inferred_media_type(&self) -> Option<String> {
        let reported = self
            .media_type
            .as_deref()
            .filter(|t| !t.trim().is_empty() && !t.eq_ignore_ascii_case(UNKNOWN_MEDIA_TYPE));
        if let Some(media_type) = reported {
            return Some(media_type.to_string());
        }
        if self.device_name.contains("HomePod") || self.media.artist.is_some() {
            Some("Music".to_string())
        } else if self.media.series_name.is_some() {
            Some("Video".to_string())
        } else {
            self.media_type.clone()
        }
    }
}

/// Placeholder media type reported by Apple TV apps that expose no metadata.
const UNKNOWN_MEDIA_TYPE: &str = "Unknown";

fn check_seconds(field: &'static str, value: Option<f64>) -> Result<(), EventError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(EventError::InvalidSeconds { field, value: v }),
        _ => Ok(()),
    }
}

/// A `now_playing` row exactly as stored, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Insertion order; rowid of the append-only log.
    pub id: i64,
    pub ts: String,
    pub device_name: String,
    pub user_name: Option<String>,
    pub app: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub series_name: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub media_type: Option<String>,
    pub state: String,
    pub position: Option<f64>,
    pub duration: Option<f64>,
}

impl StoredEvent {
    /// Build the row that `event` would be stored as, under rowid `id`.
    #[must_use]
    pub fn from_event(id: i64, event: &RawEvent) -> Self {
        Self {
            id,
            ts: format_timestamp(&event.timestamp),
            device_name: event.device_name.clone(),
            user_name: event.user_name.clone(),
            app: event.app.clone(),
            title: event.media.title.clone(),
            artist: event.media.artist.clone(),
            album: event.media.album.clone(),
            series_name: event.media.series_name.clone(),
            season: event.media.season,
            episode: event.media.episode,
            media_type: event.media_type.clone(),
            state: event.playback_state.as_str().to_string(),
            position: event.position,
            duration: event.duration,
        }
    }

    #[must_use]
    pub fn media(&self) -> MediaIdentity {
        MediaIdentity {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            series_name: self.series_name.clone(),
            season: self.season,
            episode: self.episode,
        }
    }

    /// Parse and validate the row.
    ///
    /// # Errors
    ///
    /// Any [`EventError`] other than `OutOfOrder`, which needs the previous event.
    pub fn to_event(&self) -> Result<RawEvent, EventError> {
        let event = RawEvent {
            timestamp: parse_timestamp(&self.ts)?,
            device_name: self.device_name.clone(),
            user_name: self.user_name.clone(),
            app: self.app.clone(),
            media: self.media(),
            media_type: self.media_type.clone(),
            playback_state: self.state.parse()?,
            position: self.position,
            duration: self.duration,
        };
        event.validate()?;
        Ok(event)
    }
}

/// Storage format for timestamps: RFC 3339, UTC, millisecond precision.
/// Lexicographic order matches chronological order.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 as well as the naive `YYYY-MM-DD HH:MM:SS[.fff]` form
/// older collectors wrote, which is taken to be UTC.
///
/// # Errors
///
/// Returns [`EventError::InvalidTimestamp`] if no format matches.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, EventError> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| EventError::InvalidTimestamp(value.to_string()))
}
