//! SQLite-backed store.
//!
//! Schema:
//!
//! - `now_playing`: one row per polled snapshot, append-only. `id` records
//!   insertion order.
//! - `viewing_sessions`: derived sessions, keyed by `session_id` and replaced
//!   per device on every builder run.
//!
//! Timestamps are stored as RFC 3339 text so that string order equals time order.

use super::{EventLog, EventSource, SessionStore};
use crate::event::{format_timestamp, parse_timestamp, MediaIdentity, RawEvent, StoredEvent};
use crate::session::{DeviceSessions, Session};
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use uuid::Uuid;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS now_playing (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        ts           TEXT    NOT NULL,
        device_name  TEXT    NOT NULL,
        user_name    TEXT,
        app          TEXT,
        title        TEXT,
        artist       TEXT,
        album        TEXT,
        series_name  TEXT,
        season       INTEGER,
        episode      INTEGER,
        media_type   TEXT,
        state        TEXT    NOT NULL,
        position     REAL,
        duration     REAL
    );
    CREATE INDEX IF NOT EXISTS idx_now_playing_device ON now_playing(device_name, id);

    CREATE TABLE IF NOT EXISTS viewing_sessions (
        session_id           TEXT    PRIMARY KEY,
        device_name          TEXT    NOT NULL,
        user_name            TEXT,
        app                  TEXT,
        title                TEXT,
        artist               TEXT,
        album                TEXT,
        series_name          TEXT,
        season               INTEGER,
        episode              INTEGER,
        media_type           TEXT,
        session_start        TEXT    NOT NULL,
        session_end          TEXT    NOT NULL,
        watch_time_seconds   REAL    NOT NULL,
        media_duration       REAL,
        max_position_reached REAL,
        completion_pct       REAL,
        num_entries          INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_viewing_sessions_device ON viewing_sessions(device_name, session_start);
    CREATE INDEX IF NOT EXISTS idx_viewing_sessions_start ON viewing_sessions(session_start);
";

pub(crate) const SESSION_COLUMNS: &str = "session_id, device_name, user_name, app, title, artist, album, \
     series_name, season, episode, media_type, session_start, session_end, watch_time_seconds, \
     media_duration, max_position_reached, completion_pct, num_entries";

const EVENT_COLUMNS: &str = "id, ts, device_name, user_name, app, title, artist, album, series_name, \
     season, episode, media_type, state, position, duration";

/// Store backed by a single SQLite file.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        debug!("Opened database {}", path.display());
        Self::from_connection(conn)
    }

    /// Fresh private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create now_playing/viewing_sessions tables")?;
        Ok(Self { conn })
    }

    /// Underlying connection, for reporting queries.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Append a row verbatim, bypassing validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_row(&mut self, row: &StoredEvent) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO now_playing (ts, device_name, user_name, app, title, artist, album,
                     series_name, season, episode, media_type, state, position, duration)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    row.ts,
                    row.device_name,
                    row.user_name,
                    row.app,
                    row.title,
                    row.artist,
                    row.album,
                    row.series_name,
                    row.season,
                    row.episode,
                    row.media_type,
                    row.state,
                    row.position,
                    row.duration,
                ],
            )
            .with_context(|| format!("Failed to insert event for device `{}`", row.device_name))?;
        Ok(self.conn.last_insert_rowid())
    }
}

fn row_to_event(row: &Row) -> rusqlite::Result<StoredEvent> {
    Ok(StoredEvent {
        id: row.get("id")?,
        ts: row.get("ts")?,
        device_name: row.get("device_name")?,
        user_name: row.get("user_name")?,
        app: row.get("app")?,
        title: row.get("title")?,
        artist: row.get("artist")?,
        album: row.get("album")?,
        series_name: row.get("series_name")?,
        season: row.get("season")?,
        episode: row.get("episode")?,
        media_type: row.get("media_type")?,
        state: row.get("state")?,
        position: row.get("position")?,
        duration: row.get("duration")?,
    })
}

pub(crate) fn row_to_session(row: &Row) -> Result<Session> {
    let session_id: String = row.get("session_id")?;
    let session_start: String = row.get("session_start")?;
    let session_end: String = row.get("session_end")?;
    let num_entries: i64 = row.get("num_entries")?;

    Ok(Session {
        session_id: Uuid::parse_str(&session_id)
            .with_context(|| format!("Invalid session_id `{session_id}`"))?,
        device_name: row.get("device_name")?,
        user_name: row.get("user_name")?,
        app: row.get("app")?,
        media: MediaIdentity {
            title: row.get("title")?,
            artist: row.get("artist")?,
            album: row.get("album")?,
            series_name: row.get("series_name")?,
            season: row.get("season")?,
            episode: row.get("episode")?,
        },
        media_type: row.get("media_type")?,
        session_start: parse_timestamp(&session_start).context("failed to parse session_start")?,
        session_end: parse_timestamp(&session_end).context("failed to parse session_end")?,
        watch_time: row.get("watch_time_seconds")?,
        media_duration: row.get("media_duration")?,
        max_position: row.get("max_position_reached")?,
        completion_percentage: row.get("completion_pct")?,
        event_count: u32::try_from(num_entries)
            .map_err(|_| anyhow!("num_entries contains invalid value {num_entries}"))?,
    })
}

pub(crate) fn query_sessions<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Session>> {
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("Invalid SQL statement: {sql}"))?;
    let mut rows = stmt.query(params)?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    Ok(sessions)
}

fn replace_in_tx(tx: &Transaction<'_>, device_name: &str, sessions: &[Session]) -> Result<()> {
    let removed = tx
        .execute("DELETE FROM viewing_sessions WHERE device_name = ?1", [device_name])
        .with_context(|| format!("Failed to clear sessions for `{device_name}`"))?;

    let mut stmt = tx.prepare(
        "INSERT INTO viewing_sessions (session_id, device_name, user_name, app, title, artist, album,
             series_name, season, episode, media_type, session_start, session_end, watch_time_seconds,
             media_duration, max_position_reached, completion_pct, num_entries)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
    )?;
    for session in sessions {
        stmt.execute(params![
            session.session_id.to_string(),
            session.device_name,
            session.user_name,
            session.app,
            session.media.title,
            session.media.artist,
            session.media.album,
            session.media.series_name,
            session.media.season,
            session.media.episode,
            session.media_type,
            format_timestamp(&session.session_start),
            format_timestamp(&session.session_end),
            session.watch_time,
            session.media_duration,
            session.max_position,
            session.completion_percentage,
            session.event_count,
        ])
        .with_context(|| format!("Failed to insert session {}", session.session_id))?;
    }
    debug!("Replaced {removed} sessions with {} for `{device_name}`", sessions.len());
    Ok(())
}

impl EventSource for SqliteStore {
    fn load_events(&self) -> Result<Vec<StoredEvent>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {EVENT_COLUMNS} FROM now_playing ORDER BY id"))
            .context("Invalid SQL statement when SELECTing now_playing")?;
        let rows = stmt
            .query_map([], row_to_event)
            .context("Cannot query playback events")?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.context("Failed to read playback event row")?);
        }
        Ok(events)
    }
}

impl EventLog for SqliteStore {
    fn append(&mut self, event: &RawEvent) -> Result<i64> {
        self.insert_row(&StoredEvent::from_event(0, event))
    }

    fn last_event(&self, device_name: &str) -> Result<Option<StoredEvent>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM now_playing WHERE device_name = ?1 ORDER BY id DESC LIMIT 1"
                ),
                [device_name],
                row_to_event,
            )
            .optional()
            .with_context(|| format!("Failed to read last event for `{device_name}`"))
    }

    fn in_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .context("Failed to begin event transaction")?;
        match f(self) {
            Ok(value) => {
                self.conn
                    .execute_batch("COMMIT")
                    .context("Committing SQL transaction failed")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    warn!("Rolling back event transaction failed: {rollback}");
                }
                debug!("Discarded appended events: {e:#}");
                Err(e)
            }
        }
    }
}

impl SessionStore for SqliteStore {
    fn replace_sessions_for_device(&mut self, device_name: &str, sessions: &[Session]) -> Result<()> {
        let tx = self.conn.transaction()?;
        replace_in_tx(&tx, device_name, sessions)?;
        tx.commit().context("Committing SQL transaction failed")?;
        Ok(())
    }

    fn replace_all(&mut self, batches: &[DeviceSessions]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for batch in batches {
            replace_in_tx(&tx, &batch.device_name, &batch.sessions)?;
        }
        tx.commit().context("Committing SQL transaction failed")?;
        info!("Committed sessions for {} devices", batches.len());
        Ok(())
    }

    fn sessions_for_device(&self, device_name: &str) -> Result<Vec<Session>> {
        query_sessions(
            &self.conn,
            &format!(
                "SELECT {SESSION_COLUMNS} FROM viewing_sessions WHERE device_name = ?1 \
                 ORDER BY session_start, session_id"
            ),
            [device_name],
        )
    }

    fn all_sessions(&self) -> Result<Vec<Session>> {
        query_sessions(
            &self.conn,
            &format!("SELECT {SESSION_COLUMNS} FROM viewing_sessions ORDER BY session_start DESC, session_id"),
            [],
        )
    }
}
