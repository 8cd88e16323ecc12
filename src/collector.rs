//! # Collector Seam
//!
//! Polling clients (Apple TV, Spotify accounts, ...) live outside this crate.
//! Each configured identity is wrapped in a [`NowPlayingSource`] whose `poll`
//! returns the current snapshot; this module decides whether the snapshot is
//! worth appending to the event log.
//!
//! Recording rules:
//!
//! - Stopped/idle snapshots are not recorded; only `Playing` and `Paused` are.
//! - A `Paused` snapshot is dropped when the device's previous row is also
//!   `Paused` on the same media, so a paused TV left overnight does not add a
//!   row every poll. "Same media" is the full
//!   [`MediaIdentity`](crate::event::MediaIdentity) plus `app` and
//!   `media_type`. Spotify sources report a constant app and media type, so
//!   for them this reduces to title, artist and album.
//!
//! A [`Collector`] also counts consecutive poll failures per source and logs
//! an error once a source has failed [`DEFAULT_FAILURE_THRESHOLD`] times in a
//! row, so a single dropped connection does not raise an alarm.

use crate::event::{PlaybackState, RawEvent, StoredEvent};
use crate::store::EventLog;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::io::BufRead;

/// Consecutive failures after which a source is reported as persistently failing.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// One polled identity: an Apple TV, or one user's Spotify account.
pub trait NowPlayingSource {
    /// Label used in log lines.
    fn identity(&self) -> &str;

    /// Current snapshot, or `None` when nothing is playing.
    ///
    /// # Errors
    ///
    /// Any failure talking to the device or service.
    fn poll(&mut self) -> Result<Option<RawEvent>>;
}

/// What happened to a snapshot handed to [`record_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Appended under this row id.
    Appended(i64),
    /// Still paused on the same media as the previous row.
    SuppressedPause,
    /// Nothing playing.
    Idle,
}

/// Counters for one collection pass or ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub polled: usize,
    pub appended: usize,
    pub suppressed: usize,
    pub idle: usize,
    pub failed: usize,
}

impl CollectReport {
    fn count(&mut self, recorded: Recorded) {
        match recorded {
            Recorded::Appended(_) => self.appended += 1,
            Recorded::SuppressedPause => self.suppressed += 1,
            Recorded::Idle => self.idle += 1,
        }
    }
}

fn same_media(previous: &StoredEvent, event: &RawEvent) -> bool {
    previous.media() == event.media && previous.app == event.app && previous.media_type == event.media_type
}

/// Append `event` to `log` unless the recording rules say otherwise.
///
/// # Errors
///
/// Returns an error for an invalid event or when the log cannot be read/written.
pub fn record_event<L: EventLog>(log: &mut L, event: &RawEvent) -> Result<Recorded> {
    event
        .validate()
        .with_context(|| format!("Refusing to record event for `{}`", event.device_name))?;

    match event.playback_state {
        PlaybackState::Stopped => return Ok(Recorded::Idle),
        PlaybackState::Paused => {
            let still_paused = log.last_event(&event.device_name)?.is_some_and(|previous| {
                previous.state.parse::<PlaybackState>().is_ok_and(|s| s == PlaybackState::Paused)
                    && same_media(&previous, event)
            });
            if still_paused {
                debug!("{}: still paused on same media, skipping", event.device_name);
                return Ok(Recorded::SuppressedPause);
            }
        }
        PlaybackState::Playing => {}
    }

    let id = log.append(event)?;
    info!(
        "device={} state={} title={}",
        event.device_name,
        event.playback_state,
        event.media.title.as_deref().unwrap_or("-")
    );
    Ok(Recorded::Appended(id))
}

/// Poll every source once and record what they report.
///
/// A failing source is logged and counted; the remaining sources are still polled.
///
/// # Errors
///
/// Only event-log failures abort the pass.
pub fn collect_once<L: EventLog>(sources: &mut [Box<dyn NowPlayingSource>], log: &mut L) -> Result<CollectReport> {
    poll_sources(sources, log, |_, _| {})
}

/// `on_poll` sees each source's identity and whether its poll succeeded.
fn poll_sources<L, F>(sources: &mut [Box<dyn NowPlayingSource>], log: &mut L, mut on_poll: F) -> Result<CollectReport>
where
    L: EventLog,
    F: FnMut(&str, bool),
{
    let mut report = CollectReport::default();

    for source in sources.iter_mut() {
        report.polled += 1;
        match source.poll() {
            Ok(Some(event)) => {
                on_poll(source.identity(), true);
                if let Err(e) = event.validate() {
                    error!("[{}] Discarding malformed snapshot: {e}", source.identity());
                    report.failed += 1;
                    continue;
                }
                report.count(record_event(log, &event)?);
            }
            Ok(None) => {
                on_poll(source.identity(), true);
                debug!("[{}] Nothing currently playing", source.identity());
                report.idle += 1;
            }
            Err(e) => {
                on_poll(source.identity(), false);
                error!("[{}] Error getting playback state: {e:#}", source.identity());
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// A set of sources polled repeatedly, with per-source failure streaks.
pub struct Collector {
    sources: Vec<Box<dyn NowPlayingSource>>,
    failures: HashMap<String, u32>,
    threshold: u32,
}

impl Collector {
    #[must_use]
    pub fn new(sources: Vec<Box<dyn NowPlayingSource>>) -> Self {
        Self {
            sources,
            failures: HashMap::new(),
            threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    /// Poll every source once, like [`collect_once`], and update failure streaks.
    ///
    /// # Errors
    ///
    /// Only event-log failures abort the pass.
    pub fn poll<L: EventLog>(&mut self, log: &mut L) -> Result<CollectReport> {
        let failures = &mut self.failures;
        let threshold = self.threshold;
        poll_sources(&mut self.sources, log, |identity, ok| {
            if ok {
                if failures.remove(identity).is_some() {
                    info!("[{identity}] Recovered");
                }
                return;
            }
            let count = failures.entry(identity.to_string()).or_insert(0);
            *count += 1;
            if *count == threshold {
                error!("[{identity}] {count} consecutive failures; source is not being tracked");
            } else {
                warn!("[{identity}] failure {count}/{threshold}");
            }
        })
    }

    /// Current failure streak for `identity`; zero after any successful poll.
    #[must_use]
    pub fn consecutive_failures(&self, identity: &str) -> u32 {
        self.failures.get(identity).copied().unwrap_or(0)
    }

    /// Identities whose streak has reached the threshold, sorted.
    #[must_use]
    pub fn failing_sources(&self) -> Vec<&str> {
        let mut failing: Vec<&str> = self
            .failures
            .iter()
            .filter(|(_, count)| **count >= self.threshold)
            .map(|(identity, _)| identity.as_str())
            .collect();
        failing.sort_unstable();
        failing
    }
}

/// Record JSON-encoded events, one per line, e.g. from an external poller's output.
///
/// Blank lines are ignored. The whole input is recorded in one transaction,
/// so a failed ingest can be fixed and re-run without duplicating rows.
///
/// # Errors
///
/// Returns an error naming the line number of the first unparsable or
/// invalid event, or on I/O failure. Nothing from the input is recorded then.
pub fn ingest_json_lines<R: BufRead, L: EventLog>(reader: R, log: &mut L) -> Result<CollectReport> {
    log.in_transaction(|log| {
        let mut report = CollectReport::default();

        for (index, line) in reader.lines().enumerate() {
            let line_no = index + 1;
            let line = line.with_context(|| format!("Failed to read line {line_no}"))?;
            if line.trim().is_empty() {
                continue;
            }
            let event: RawEvent =
                serde_json::from_str(&line).with_context(|| format!("Invalid event on line {line_no}"))?;
            report.polled += 1;
            let recorded = record_event(log, &event).with_context(|| format!("Line {line_no}"))?;
            report.count(recorded);
        }
        Ok(report)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionBuilder;
    use crate::store::{EventSource, MemoryStore};
    use anyhow::anyhow;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 10, 21, minute, 0).unwrap()
    }

    struct Scripted {
        name: String,
        replies: Vec<Result<Option<RawEvent>>>,
    }

    impl NowPlayingSource for Scripted {
        fn identity(&self) -> &str {
            &self.name
        }

        fn poll(&mut self) -> Result<Option<RawEvent>> {
            self.replies.pop().unwrap_or(Ok(None))
        }
    }

    #[test]
    fn test_repeated_pause_is_suppressed() -> Result<()> {
        let mut log = MemoryStore::new();
        let paused = RawEvent::new(at(0), "Living Room", "Movie", PlaybackState::Paused);

        assert_eq!(record_event(&mut log, &paused)?, Recorded::Appended(1));
        let later = RawEvent { timestamp: at(5), ..paused.clone() };
        assert_eq!(record_event(&mut log, &later)?, Recorded::SuppressedPause);

        // Paused on something else is new information.
        let other = RawEvent::new(at(6), "Living Room", "Trailer", PlaybackState::Paused);
        assert_eq!(record_event(&mut log, &other)?, Recorded::Appended(2));
        Ok(())
    }

    #[test]
    fn test_pause_after_playing_is_recorded() -> Result<()> {
        let mut log = MemoryStore::new();
        record_event(&mut log, &RawEvent::new(at(0), "TV", "Movie", PlaybackState::Playing))?;
        let recorded = record_event(&mut log, &RawEvent::new(at(1), "TV", "Movie", PlaybackState::Paused))?;

        assert_eq!(recorded, Recorded::Appended(2));
        Ok(())
    }

    #[test]
    fn test_stopped_is_not_recorded() -> Result<()> {
        let mut log = MemoryStore::new();
        let recorded = record_event(&mut log, &RawEvent::new(at(0), "TV", "Movie", PlaybackState::Stopped))?;

        assert_eq!(recorded, Recorded::Idle);
        assert_eq!(log.event_count(), 0);
        Ok(())
    }

    #[test]
    fn test_failing_source_does_not_stop_others() -> Result<()> {
        let mut log = MemoryStore::new();
        let mut sources: Vec<Box<dyn NowPlayingSource>> = vec![
            Box::new(Scripted {
                name: "Dad".to_string(),
                replies: vec![Err(anyhow!("token expired"))],
            }),
            Box::new(Scripted {
                name: "Mom".to_string(),
                replies: vec![Ok(Some(RawEvent::new(
                    at(0),
                    "iPhone (Mom)",
                    "Song A",
                    PlaybackState::Playing,
                )))],
            }),
            Box::new(Scripted {
                name: "Kid".to_string(),
                replies: vec![],
            }),
        ];

        let report = collect_once(&mut sources, &mut log)?;

        assert_eq!(
            report,
            CollectReport {
                polled: 3,
                appended: 1,
                suppressed: 0,
                idle: 1,
                failed: 1,
            }
        );
        assert_eq!(log.load_events()?[0].device_name, "iPhone (Mom)");
        Ok(())
    }

    #[test]
    fn test_ingest_json_lines() -> Result<()> {
        let input = r#"{"timestamp":"2024-02-10T21:00:00Z","device_name":"TV","title":"Movie","state":"Playing"}

{"timestamp":"2024-02-10T21:01:00Z","device_name":"TV","title":"Movie","state":"Paused"}
{"timestamp":"2024-02-10T21:02:00Z","device_name":"TV","title":"Movie","state":"Paused"}
"#;
        let mut log = MemoryStore::new();
        let report = ingest_json_lines(input.as_bytes(), &mut log)?;

        assert_eq!(report.polled, 3);
        assert_eq!(report.appended, 2);
        assert_eq!(report.suppressed, 1);
        Ok(())
    }

    #[test]
    fn test_ingest_reports_bad_line_number() {
        let input = "{\"timestamp\":\"2024-02-10T21:00:00Z\",\"device_name\":\"TV\",\"state\":\"Playing\"}\nnot json\n";
        let mut log = MemoryStore::new();
        let err = ingest_json_lines(input.as_bytes(), &mut log).unwrap_err();

        assert!(err.to_string().contains("line 2"));
        assert_eq!(log.event_count(), 0);
    }

    #[test]
    fn test_failed_ingest_can_be_retried() -> Result<()> {
        let good = "{\"timestamp\":\"2024-02-10T21:00:00Z\",\"device_name\":\"TV\",\"title\":\"Movie\",\"state\":\"Playing\"}\n\
                    {\"timestamp\":\"2024-02-10T21:05:00Z\",\"device_name\":\"TV\",\"title\":\"Movie\",\"state\":\"Playing\"}\n";
        let mut log = MemoryStore::new();

        assert!(ingest_json_lines(format!("{good}garbage\n").as_bytes(), &mut log).is_err());
        ingest_json_lines(good.as_bytes(), &mut log)?;

        let (_, report) = SessionBuilder::default().build(log.load_events()?);
        assert!(report.is_clean());
        assert_eq!(report.sessions_written, 1);
        Ok(())
    }

    #[test]
    fn test_ingest_accepts_state_spellings() -> Result<()> {
        let input = r#"{"timestamp":"2024-02-10T21:00:00Z","device_name":"TV","title":"Movie","state":"playing"}
{"timestamp":"2024-02-10T21:01:00Z","device_name":"TV","title":"Movie","state":"Idle"}
"#;
        let mut log = MemoryStore::new();
        let report = ingest_json_lines(input.as_bytes(), &mut log)?;

        assert_eq!(report.appended, 1);
        assert_eq!(report.idle, 1);
        Ok(())
    }

    #[test]
    fn test_spotify_pause_matches_on_track() -> Result<()> {
        let mut log = MemoryStore::new();
        let mut paused = RawEvent::new(at(0), "Spotify (Dad): Mac", "Song A", PlaybackState::Paused);
        paused.app = Some("Spotify".to_string());
        paused.media_type = Some("Music".to_string());
        paused.media.artist = Some("Band".to_string());
        paused.media.album = Some("First".to_string());
        record_event(&mut log, &paused)?;

        let same_track = RawEvent { timestamp: at(2), ..paused.clone() };
        assert_eq!(record_event(&mut log, &same_track)?, Recorded::SuppressedPause);

        let mut other_album = RawEvent { timestamp: at(4), ..paused };
        other_album.media.album = Some("Live".to_string());
        assert!(matches!(record_event(&mut log, &other_album)?, Recorded::Appended(_)));
        Ok(())
    }

    #[test]
    fn test_collector_tracks_consecutive_failures() -> Result<()> {
        let mut log = MemoryStore::new();
        let playing = RawEvent::new(at(0), "Living Room", "Movie", PlaybackState::Playing);
        // Replies are popped from the back: three failures, then a success.
        let sources: Vec<Box<dyn NowPlayingSource>> = vec![
            Box::new(Scripted {
                name: "Living Room".to_string(),
                replies: vec![
                    Ok(Some(playing)),
                    Err(anyhow!("connection refused")),
                    Err(anyhow!("connection refused")),
                    Err(anyhow!("connection refused")),
                ],
            }),
            Box::new(Scripted {
                name: "Bedroom".to_string(),
                replies: vec![],
            }),
        ];
        let mut collector = Collector::new(sources);

        collector.poll(&mut log)?;
        collector.poll(&mut log)?;
        assert_eq!(collector.consecutive_failures("Living Room"), 2);
        assert!(collector.failing_sources().is_empty());

        let report = collector.poll(&mut log)?;
        assert_eq!(report.failed, 1);
        assert_eq!(collector.failing_sources(), ["Living Room"]);
        assert_eq!(collector.consecutive_failures("Bedroom"), 0);

        collector.poll(&mut log)?;
        assert_eq!(collector.consecutive_failures("Living Room"), 0);
        assert!(collector.failing_sources().is_empty());
        assert_eq!(log.event_count(), 1);
        Ok(())
    }
}
