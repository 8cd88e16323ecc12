//! # Session Builder
//!
//! Turns the append-only stream of playback snapshots into viewing/listening
//! sessions.
//!
//! ## Grouping
//!
//! Events are partitioned by device and scanned in insertion order. Each device
//! has at most one *open* session. An incoming event extends it when:
//!
//! - it refers to the same media (see [`MediaIdentity`]), and
//! - it arrived no later than `gap_threshold` after the previous event.
//!
//! Otherwise the open session is closed and a new one starts.
//!
//! ## Aggregates
//!
//! - **Watch time**: sum of the intervals between consecutive events where the
//!   *earlier* event was `Playing`. Paused stretches never count.
//! - **Completion**: `watch_time / duration`, as a percentage in `[0, 100]`,
//!   `None` when the duration is unknown or zero.
//!
//! ## Re-runs
//!
//! Every run recomputes all sessions for every device and replaces them in the
//! store. Session ids are derived from the session's content, so an unchanged
//! event log always produces an identical session set.

use crate::event::{format_timestamp, EventError, MediaIdentity, PlaybackState, RawEvent, StoredEvent};
use crate::store::{EventSource, SessionStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Documented merge threshold between consecutive snapshots.
pub const DEFAULT_GAP_MINUTES: u32 = 10;

/// Namespace for content-derived session ids.
const SESSION_NAMESPACE: Uuid = Uuid::from_u128(0x6e6f_7770_6c61_7969_6e67_5f73_6573_7331);

/// Tunable grouping parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Largest gap between two events that still merges them. Inclusive.
    pub gap_threshold: Duration,
    /// Closed sessions with less watch time than this are discarded.
    /// Zero keeps every session.
    pub min_watch_seconds: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::with_gap_minutes(DEFAULT_GAP_MINUTES)
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_gap_minutes(minutes: u32) -> Self {
        Self {
            gap_threshold: Duration::minutes(i64::from(minutes)),
            min_watch_seconds: 0.0,
        }
    }
}

/// A contiguous span of engagement with one media item on one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: Uuid,
    pub device_name: String,
    pub user_name: Option<String>,
    pub app: Option<String>,
    pub media: MediaIdentity,
    /// Reported type, or inferred from the first event when unknown.
    pub media_type: Option<String>,
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
    /// Seconds spent in `Playing` state.
    pub watch_time: f64,
    /// Last known positive duration, in seconds.
    pub media_duration: Option<f64>,
    pub max_position: Option<f64>,
    pub completion_percentage: Option<f64>,
    pub event_count: u32,
}

impl Session {
    /// Wall-clock span of the session in seconds.
    #[must_use]
    pub fn span_seconds(&self) -> f64 {
        seconds_between(self.session_start, self.session_end)
    }
}

/// Accumulator for the session currently being extended on one device.
#[derive(Debug, Clone)]
pub struct OpenSession {
    session: Session,
    last_timestamp: DateTime<Utc>,
    last_state: PlaybackState,
}

impl OpenSession {
    fn start(event: RawEvent) -> Self {
        let media_duration = event.duration.filter(|d| *d > 0.0);
        let media_type = event.inferred_media_type();
        let session = Session {
            session_id: session_id(&event.device_name, &event.timestamp, &event.media, 0),
            device_name: event.device_name,
            user_name: event.user_name,
            app: event.app,
            media: event.media,
            media_type,
            session_start: event.timestamp,
            session_end: event.timestamp,
            watch_time: 0.0,
            media_duration,
            max_position: event.position,
            completion_percentage: completion_percentage(0.0, media_duration),
            event_count: 1,
        };
        Self {
            session,
            last_timestamp: event.timestamp,
            last_state: event.playback_state,
        }
    }

    fn accepts(&self, event: &RawEvent, config: &SessionConfig) -> bool {
        event.media == self.session.media && event.timestamp - self.last_timestamp <= config.gap_threshold
    }

    fn extend(&mut self, event: RawEvent) {
        if self.last_state == PlaybackState::Playing {
            self.session.watch_time += seconds_between(self.last_timestamp, event.timestamp);
        }
        if let Some(duration) = event.duration.filter(|d| *d > 0.0) {
            self.session.media_duration = Some(duration);
        }
        if let Some(position) = event.position {
            self.session.max_position = Some(self.session.max_position.map_or(position, |p| p.max(position)));
        }
        self.session.session_end = event.timestamp;
        self.session.event_count += 1;
        self.session.completion_percentage =
            completion_percentage(self.session.watch_time, self.session.media_duration);
        self.last_timestamp = event.timestamp;
        self.last_state = event.playback_state;
    }

    /// The session as it would look if closed now.
    #[must_use]
    pub fn snapshot(&self) -> &Session {
        &self.session
    }

    fn close(self) -> Session {
        self.session
    }
}

/// Open sessions keyed by device name.
pub type OpenSessions = HashMap<String, OpenSession>;

/// Feed one event into the per-device accumulators.
///
/// Returns the session that this event closed, if any.
///
/// # Errors
///
/// [`EventError::OutOfOrder`] if the event is earlier than the device's
/// previous event. The accumulator for that device is left unchanged.
pub fn ingest_event(
    open: &mut OpenSessions,
    event: RawEvent,
    config: &SessionConfig,
) -> Result<Option<Session>, EventError> {
    let Some(current) = open.get_mut(&event.device_name) else {
        open.insert(event.device_name.clone(), OpenSession::start(event));
        return Ok(None);
    };

    if event.timestamp < current.last_timestamp {
        return Err(EventError::OutOfOrder {
            previous: current.last_timestamp,
            current: event.timestamp,
        });
    }

    if current.accepts(&event, config) {
        current.extend(event);
        return Ok(None);
    }

    let device = event.device_name.clone();
    let closed = std::mem::replace(current, OpenSession::start(event)).close();
    debug!(
        "Closed session on {device}: {} ({} events)",
        closed.media.display_title(),
        closed.event_count
    );
    Ok(Some(closed))
}

/// Close every open session, ordered by device then start.
#[must_use]
pub fn close_all(open: OpenSessions) -> Vec<Session> {
    let mut sessions: Vec<Session> = open.into_values().map(OpenSession::close).collect();
    sessions.sort_by(|a, b| {
        a.device_name
            .cmp(&b.device_name)
            .then(a.session_start.cmp(&b.session_start))
    });
    sessions
}

/// Group one device's events, in order, into sessions.
///
/// Session ids are made unique within the device, so repeated media at the
/// same instant still gets distinct, reproducible ids.
///
/// # Errors
///
/// [`EventError::OutOfOrder`] if the events are not in time order.
pub fn sessionize<I>(events: I, config: &SessionConfig) -> Result<Vec<Session>, EventError>
where
    I: IntoIterator<Item = RawEvent>,
{
    group(events.into_iter().map(|e| ((), Ok(e))), config).map_err(|((), e)| e)
}

/// Shared by [`sessionize`] and the builder; errors carry the tag of the
/// offending item.
fn group<T, I>(items: I, config: &SessionConfig) -> Result<Vec<Session>, (T, EventError)>
where
    I: IntoIterator<Item = (T, Result<RawEvent, EventError>)>,
{
    let mut open = OpenSessions::new();
    let mut sessions = Vec::new();
    for (tag, parsed) in items {
        let event = match parsed {
            Ok(event) => event,
            Err(e) => return Err((tag, e)),
        };
        match ingest_event(&mut open, event, config) {
            Ok(Some(closed)) => sessions.push(closed),
            Ok(None) => {}
            Err(e) => return Err((tag, e)),
        }
    }
    sessions.extend(close_all(open));
    assign_unique_ids(&mut sessions);
    Ok(sessions)
}

fn assign_unique_ids(sessions: &mut [Session]) {
    let mut seen = HashSet::new();
    for session in sessions {
        let mut ordinal = 0;
        while !seen.insert(session.session_id) {
            ordinal += 1;
            session.session_id =
                session_id(&session.device_name, &session.session_start, &session.media, ordinal);
        }
    }
}

/// `watch_time / duration` as a percentage in `[0, 100]`, one decimal place.
#[must_use]
pub fn completion_percentage(watch_time: f64, duration: Option<f64>) -> Option<f64> {
    let duration = duration.filter(|d| d.is_finite() && *d > 0.0)?;
    let pct = (watch_time / duration * 100.0).clamp(0.0, 100.0);
    Some((pct * 10.0).round() / 10.0)
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let millis = (to - from).num_milliseconds() as f64;
    millis / 1000.0
}

fn session_id(device: &str, start: &DateTime<Utc>, media: &MediaIdentity, ordinal: u32) -> Uuid {
    let key = format!(
        "{device}\u{1f}{}\u{1f}{:?}\u{1f}{ordinal}",
        format_timestamp(start),
        media
    );
    Uuid::new_v5(&SESSION_NAMESPACE, key.as_bytes())
}

/// Sessions computed for one device, ready to replace what the store holds.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSessions {
    pub device_name: String,
    pub sessions: Vec<Session>,
}

/// A device whose batch was skipped this run.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRejection {
    pub device_name: String,
    /// Row that triggered the rejection.
    pub event_id: i64,
    pub error: EventError,
}

/// Outcome of one builder run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub events_read: usize,
    pub devices_processed: usize,
    pub sessions_written: usize,
    pub sessions_filtered: usize,
    pub rejected: Vec<DeviceRejection>,
}

impl BuildReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Split rows by device, preserving their order within each device.
#[must_use]
pub fn partition_by_device(rows: Vec<StoredEvent>) -> BTreeMap<String, Vec<StoredEvent>> {
    let mut devices: BTreeMap<String, Vec<StoredEvent>> = BTreeMap::new();
    for row in rows {
        devices.entry(row.device_name.clone()).or_default().push(row);
    }
    devices
}

/// Batch job that rebuilds every device's sessions from the event log.
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Compute sessions for every device in `rows` without touching storage.
    ///
    /// Devices with malformed or out-of-order rows are reported in the
    /// returned [`BuildReport`] and omitted from the batches.
    #[must_use]
    pub fn build(&self, rows: Vec<StoredEvent>) -> (Vec<DeviceSessions>, BuildReport) {
        let mut report = BuildReport {
            events_read: rows.len(),
            ..BuildReport::default()
        };
        let mut batches = Vec::new();

        for (device_name, rows) in partition_by_device(rows) {
            match self.build_device(&rows) {
                Ok(sessions) => {
                    let before = sessions.len();
                    let sessions: Vec<Session> = sessions
                        .into_iter()
                        .filter(|s| s.watch_time >= self.config.min_watch_seconds)
                        .collect();
                    report.sessions_filtered += before - sessions.len();
                    report.sessions_written += sessions.len();
                    report.devices_processed += 1;
                    debug!("{device_name}: {} sessions from {} events", sessions.len(), rows.len());
                    batches.push(DeviceSessions { device_name, sessions });
                }
                Err((event_id, error)) => {
                    warn!("Skipping device `{device_name}`: row {event_id}: {error}");
                    report.rejected.push(DeviceRejection {
                        device_name,
                        event_id,
                        error,
                    });
                }
            }
        }

        (batches, report)
    }

    fn build_device(&self, rows: &[StoredEvent]) -> Result<Vec<Session>, (i64, EventError)> {
        group(rows.iter().map(|row| (row.id, row.to_event())), &self.config)
    }

    /// Read the whole event log, rebuild sessions, and replace them in `store`.
    ///
    /// All device replacements are handed to the store at once; the SQLite
    /// store commits them in a single transaction.
    ///
    /// # Errors
    ///
    /// Storage failures only. Bad input is reported, not returned.
    pub fn run<S>(&self, store: &mut S) -> Result<BuildReport>
    where
        S: EventSource + SessionStore,
    {
        let rows = store.load_events().context("Failed to load playback events")?;
        info!("Loaded {} playback events", rows.len());

        let (batches, report) = self.build(rows);
        store
            .replace_all(&batches)
            .context("Failed to write viewing sessions")?;

        info!(
            "Wrote {} sessions for {} devices ({} filtered, {} devices skipped)",
            report.sessions_written,
            report.devices_processed,
            report.sessions_filtered,
            report.rejected.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    const MOM: &str = "Spotify (Mom): iPhone";

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 4, h, m, 0).unwrap()
    }

    fn event(device: &str, title: &str, h: u32, m: u32, state: PlaybackState) -> RawEvent {
        RawEvent::new(at(h, m), device, title, state)
    }

    fn song_a_events() -> Vec<RawEvent> {
        vec![
            event(MOM, "Song A", 10, 0, PlaybackState::Playing),
            event(MOM, "Song A", 10, 2, PlaybackState::Playing),
            event(MOM, "Song A", 10, 5, PlaybackState::Paused),
            event(MOM, "Song A", 10, 20, PlaybackState::Playing),
        ]
    }

    #[test]
    fn test_gap_over_threshold_splits_session() {
        let sessions = sessionize(song_a_events(), &SessionConfig::default()).unwrap();

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_start, at(10, 0));
        assert_eq!(sessions[0].session_end, at(10, 5));
        assert_eq!(sessions[0].watch_time, 300.0);
        assert_eq!(sessions[0].event_count, 3);
        assert_eq!(sessions[1].session_start, at(10, 20));
        assert_eq!(sessions[1].session_end, at(10, 20));
        assert_eq!(sessions[1].watch_time, 0.0);
    }

    #[test]
    fn test_title_change_splits_without_gap() {
        let events = vec![
            event(MOM, "Song A", 10, 0, PlaybackState::Playing),
            event(MOM, "Song B", 10, 1, PlaybackState::Playing),
            event(MOM, "Song B", 10, 3, PlaybackState::Playing),
        ];
        let sessions = sessionize(events, &SessionConfig::default()).unwrap();

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].media.title.as_deref(), Some("Song A"));
        assert_eq!(sessions[0].session_end, at(10, 0));
        assert_eq!(sessions[1].media.title.as_deref(), Some("Song B"));
        assert_eq!(sessions[1].session_start, at(10, 1));
        assert_eq!(sessions[1].watch_time, 120.0);
    }

    #[test]
    fn test_gap_equal_to_threshold_still_merges() {
        let events = vec![
            event(MOM, "Song A", 10, 0, PlaybackState::Playing),
            event(MOM, "Song A", 10, 10, PlaybackState::Playing),
            event(MOM, "Song A", 10, 21, PlaybackState::Playing),
        ];
        let sessions = sessionize(events, &SessionConfig::default()).unwrap();

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_end, at(10, 10));
    }

    #[test]
    fn test_paused_intervals_do_not_count() {
        let events = vec![
            event(MOM, "Song A", 10, 0, PlaybackState::Paused),
            event(MOM, "Song A", 10, 4, PlaybackState::Playing),
            event(MOM, "Song A", 10, 6, PlaybackState::Stopped),
            event(MOM, "Song A", 10, 9, PlaybackState::Playing),
        ];
        let sessions = sessionize(events, &SessionConfig::default()).unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].watch_time, 120.0);
        assert!(sessions[0].watch_time <= sessions[0].span_seconds());
    }

    #[test]
    fn test_completion_uses_last_known_duration() {
        let mut first = event(MOM, "Song A", 10, 0, PlaybackState::Playing);
        first.duration = Some(600.0);
        let mut second = event(MOM, "Song A", 10, 3, PlaybackState::Playing);
        second.duration = None;
        let mut third = event(MOM, "Song A", 10, 6, PlaybackState::Paused);
        third.duration = Some(0.0);

        let sessions = sessionize(vec![first, second, third], &SessionConfig::default()).unwrap();

        assert_eq!(sessions[0].media_duration, Some(600.0));
        assert_eq!(sessions[0].completion_percentage, Some(60.0));
    }

    #[test]
    fn test_completion_percentage_edge_cases() {
        assert_eq!(completion_percentage(120.0, None), None);
        assert_eq!(completion_percentage(120.0, Some(0.0)), None);
        assert_eq!(completion_percentage(0.0, Some(200.0)), Some(0.0));
        assert_eq!(completion_percentage(900.0, Some(200.0)), Some(100.0));
        assert_eq!(completion_percentage(1.0, Some(3.0)), Some(33.3));
    }

    #[test]
    fn test_single_event_session() {
        let mut only = event(MOM, "Song A", 10, 0, PlaybackState::Playing);
        only.duration = Some(180.0);
        let sessions = sessionize(vec![only], &SessionConfig::default()).unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].watch_time, 0.0);
        assert_eq!(sessions[0].completion_percentage, Some(0.0));
        assert_eq!(sessions[0].session_start, sessions[0].session_end);
    }

    #[test]
    fn test_unknown_media_type_is_inferred_for_sessions() {
        let mut song = event("Kitchen HomePod", "Song A", 9, 0, PlaybackState::Playing);
        song.media_type = Some("Unknown".to_string());
        let mut episode = event("Living Room", "Pilot", 9, 0, PlaybackState::Playing);
        episode.media.series_name = Some("Severance".to_string());

        let sessions = sessionize(vec![song, episode], &SessionConfig::default()).unwrap();

        assert_eq!(sessions[0].device_name, "Kitchen HomePod");
        assert_eq!(sessions[0].media_type.as_deref(), Some("Music"));
        assert_eq!(sessions[1].media_type.as_deref(), Some("Video"));
    }

    #[test]
    fn test_out_of_order_event_is_rejected() {
        let events = vec![
            event(MOM, "Song A", 10, 5, PlaybackState::Playing),
            event(MOM, "Song A", 10, 1, PlaybackState::Playing),
        ];
        let err = sessionize(events, &SessionConfig::default()).unwrap_err();

        assert_eq!(
            err,
            EventError::OutOfOrder {
                previous: at(10, 5),
                current: at(10, 1),
            }
        );
    }

    #[test]
    fn test_accumulator_is_per_device() {
        let config = SessionConfig::default();
        let mut open = OpenSessions::new();

        assert!(ingest_event(&mut open, event("TV", "Movie", 10, 0, PlaybackState::Playing), &config)
            .unwrap()
            .is_none());
        assert!(ingest_event(&mut open, event(MOM, "Song A", 10, 1, PlaybackState::Playing), &config)
            .unwrap()
            .is_none());
        assert!(ingest_event(&mut open, event("TV", "Movie", 10, 4, PlaybackState::Playing), &config)
            .unwrap()
            .is_none());

        assert_eq!(open.len(), 2);
        assert_eq!(open["TV"].snapshot().watch_time, 240.0);

        let closed = ingest_event(&mut open, event(MOM, "Song B", 10, 2, PlaybackState::Playing), &config)
            .unwrap()
            .expect("title change closes the open session");
        assert_eq!(closed.media.title.as_deref(), Some("Song A"));
        assert_eq!(close_all(open).len(), 2);
    }

    #[test]
    fn test_watch_time_is_monotonic_while_extending() {
        let config = SessionConfig::default();
        let mut open = OpenSessions::new();
        let mut last = 0.0;
        for (minute, state) in [
            (0, PlaybackState::Playing),
            (1, PlaybackState::Paused),
            (3, PlaybackState::Playing),
            (8, PlaybackState::Playing),
            (9, PlaybackState::Paused),
        ] {
            ingest_event(&mut open, event(MOM, "Song A", 11, minute, state), &config).unwrap();
            let current = open[MOM].snapshot().watch_time;
            assert!(current >= last);
            last = current;
        }
        assert_eq!(last, 60.0 + 300.0 + 60.0);
    }

    #[test]
    fn test_session_ids_are_stable_and_unique() {
        let first = sessionize(song_a_events(), &SessionConfig::default()).unwrap();
        let second = sessionize(song_a_events(), &SessionConfig::default()).unwrap();
        assert_eq!(first, second);

        let same_instant = vec![
            event(MOM, "Song A", 10, 0, PlaybackState::Playing),
            event(MOM, "Song B", 10, 0, PlaybackState::Playing),
            event(MOM, "Song A", 10, 0, PlaybackState::Playing),
        ];
        let sessions = sessionize(same_instant, &SessionConfig::default()).unwrap();
        let ids: HashSet<Uuid> = sessions.iter().map(|s| s.session_id).collect();
        assert_eq!(sessions.len(), 3);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_every_event_belongs_to_one_session() {
        let events: Vec<RawEvent> = (0..40)
            .map(|i| {
                let title = if i % 7 < 4 { "Song A" } else { "Song B" };
                let state = if i % 3 == 0 { PlaybackState::Paused } else { PlaybackState::Playing };
                RawEvent::new(at(8, 0) + Duration::minutes(i * i % 13 + i * 3), MOM, title, state)
            })
            .collect();
        let mut sorted = events;
        sorted.sort_by_key(|e| e.timestamp);

        let sessions = sessionize(sorted.iter().cloned(), &SessionConfig::default()).unwrap();
        let total: u32 = sessions.iter().map(|s| s.event_count).sum();
        assert_eq!(total as usize, sorted.len());

        for session in &sessions {
            assert!(session.session_start <= session.session_end);
            assert!(session.watch_time >= 0.0);
            assert!(session.watch_time <= session.span_seconds());
        }
    }

    #[test]
    fn test_builder_isolates_bad_devices() {
        let mut rows: Vec<StoredEvent> = song_a_events()
            .iter()
            .enumerate()
            .map(|(i, e)| StoredEvent::from_event(i as i64 + 1, e))
            .collect();
        let mut bad = StoredEvent::from_event(10, &event("Bedroom", "Movie", 9, 0, PlaybackState::Playing));
        bad.state = "Buffering".to_string();
        rows.push(bad);

        let (batches, report) = SessionBuilder::default().build(rows);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].device_name, MOM);
        assert_eq!(report.sessions_written, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].device_name, "Bedroom");
        assert_eq!(report.rejected[0].event_id, 10);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_min_watch_filter_counts_dropped_sessions() {
        let rows: Vec<StoredEvent> = song_a_events()
            .iter()
            .enumerate()
            .map(|(i, e)| StoredEvent::from_event(i as i64 + 1, e))
            .collect();
        let config = SessionConfig {
            min_watch_seconds: 30.0,
            ..SessionConfig::default()
        };

        let (batches, report) = SessionBuilder::new(config).build(rows);

        assert_eq!(batches[0].sessions.len(), 1);
        assert_eq!(report.sessions_written, 1);
        assert_eq!(report.sessions_filtered, 1);
    }

    #[test]
    fn test_run_is_idempotent_against_memory_store() {
        let mut store = MemoryStore::new();
        for e in song_a_events() {
            store.push_event(&e);
        }
        let builder = SessionBuilder::default();

        builder.run(&mut store).unwrap();
        let first = store.sessions_for_device(MOM).unwrap();
        builder.run(&mut store).unwrap();
        let second = store.sessions_for_device(MOM).unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejected_device_keeps_previous_sessions() {
        let mut store = MemoryStore::new();
        store.push_event(&event("TV", "Movie", 9, 0, PlaybackState::Playing));
        store.push_event(&event("TV", "Movie", 9, 5, PlaybackState::Playing));
        let builder = SessionBuilder::default();
        builder.run(&mut store).unwrap();
        let before = store.sessions_for_device("TV").unwrap();

        // Clock went backwards on the next poll.
        store.push_event(&event("TV", "Movie", 8, 0, PlaybackState::Playing));
        let report = builder.run(&mut store).unwrap();

        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(report.rejected[0].error, EventError::OutOfOrder { .. }));
        assert_eq!(store.sessions_for_device("TV").unwrap(), before);
    }
}
