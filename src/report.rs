//! # Usage Reports
//!
//! Read-only summaries over `viewing_sessions`: recent sessions, totals per
//! device / media type / series / song, daily usage, and CSV export.
//!
//! Query functions return typed rows; `print_*` functions render them to stdout.

use crate::session::Session;
use crate::store::sqlite::{query_sessions, SESSION_COLUMNS};
use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use rusqlite::{params, Connection};
use std::io::Write;

const RULE_WIDTH: usize = 100;

/// Aggregate watch time for one group (a device or a media type).
#[derive(Debug, Clone, PartialEq)]
pub struct Totals {
    pub label: String,
    pub total_hours: f64,
    pub sessions: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesTotals {
    pub series_name: String,
    pub episodes: i64,
    pub total_hours: f64,
    pub sessions: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SongTotals {
    pub artist: String,
    pub title: String,
    pub play_count: i64,
    pub total_minutes: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyUsage {
    /// `YYYY-MM-DD`, UTC.
    pub date: String,
    pub sessions: i64,
    pub total_hours: f64,
    pub devices: i64,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Most recent sessions, newest first. `device` narrows to one device.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn recent_sessions(conn: &Connection, limit: usize, device: Option<&str>) -> Result<Vec<Session>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    query_sessions(
        conn,
        &format!(
            "SELECT {SESSION_COLUMNS} FROM viewing_sessions
             WHERE ?1 IS NULL OR device_name = ?1
             ORDER BY session_start DESC, session_id
             LIMIT ?2"
        ),
        params![device, limit],
    )
    .context("Failed to query recent sessions")
}

fn totals_by(conn: &Connection, column: &str) -> Result<Vec<Totals>> {
    let sql = format!(
        "SELECT {column}, SUM(watch_time_seconds) / 3600.0, COUNT(*)
         FROM viewing_sessions
         WHERE {column} IS NOT NULL
         GROUP BY {column}
         ORDER BY 2 DESC, 1"
    );
    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("Invalid SQL statement when grouping by {column}"))?;
    let rows = stmt.query_map([], |row| {
        Ok(Totals {
            label: row.get(0)?,
            total_hours: round_to(row.get(1)?, 2),
            sessions: row.get(2)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("Cannot read totals by {column}"))
}

/// Total watch time per device, largest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn totals_by_device(conn: &Connection) -> Result<Vec<Totals>> {
    totals_by(conn, "device_name")
}

/// Total watch time per media type, largest first. Sessions without a type are skipped.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn totals_by_media_type(conn: &Connection) -> Result<Vec<Totals>> {
    totals_by(conn, "media_type")
}

/// Most watched series by total time.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn top_series(conn: &Connection, limit: usize) -> Result<Vec<SeriesTotals>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT series_name,
                COUNT(DISTINCT IFNULL(season, '?') || '-' || IFNULL(episode, '?')),
                SUM(watch_time_seconds) / 3600.0,
                COUNT(*)
         FROM viewing_sessions
         WHERE series_name IS NOT NULL
         GROUP BY series_name
         ORDER BY 3 DESC, 1
         LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], |row| {
        Ok(SeriesTotals {
            series_name: row.get(0)?,
            episodes: row.get(1)?,
            total_hours: round_to(row.get(2)?, 2),
            sessions: row.get(3)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("Cannot read series totals")
}

/// Most played songs by session count.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn top_songs(conn: &Connection, limit: usize) -> Result<Vec<SongTotals>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT artist, IFNULL(title, ''), COUNT(*), SUM(watch_time_seconds) / 60.0
         FROM viewing_sessions
         WHERE artist IS NOT NULL AND media_type = 'Music'
         GROUP BY artist, title
         ORDER BY 3 DESC, 1, 2
         LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], |row| {
        Ok(SongTotals {
            artist: row.get(0)?,
            title: row.get(1)?,
            play_count: row.get(2)?,
            total_minutes: round_to(row.get(3)?, 1),
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("Cannot read song totals")
}

/// Per-day usage for sessions starting on or after `today - days`, newest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn daily_usage(conn: &Connection, days: u32, today: NaiveDate) -> Result<Vec<DailyUsage>> {
    let cutoff = today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
        .format("%Y-%m-%d")
        .to_string();
    let mut stmt = conn.prepare(
        "SELECT substr(session_start, 1, 10) AS day,
                COUNT(*),
                SUM(watch_time_seconds) / 3600.0,
                COUNT(DISTINCT device_name)
         FROM viewing_sessions
         WHERE session_start >= ?1
         GROUP BY day
         ORDER BY day DESC",
    )?;
    let rows = stmt.query_map([cutoff], |row| {
        Ok(DailyUsage {
            date: row.get(0)?,
            sessions: row.get(1)?,
            total_hours: round_to(row.get(2)?, 2),
            devices: row.get(3)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("Cannot read daily usage")
}

fn print_header(title: &str) {
    println!("\n{}", "=".repeat(RULE_WIDTH));
    println!("{title}");
    println!("{}\n", "=".repeat(RULE_WIDTH));
}

fn completion_label(session: &Session) -> String {
    session
        .completion_percentage
        .map_or_else(|| "-".to_string(), |pct| format!("{pct:.1}%"))
}

/// Print the most recent sessions as a table.
pub fn print_recent(sessions: &[Session]) {
    print_header(&format!("RECENT VIEWING/LISTENING SESSIONS (Last {})", sessions.len()));
    println!(
        "{:<17} {:<6} {:<24} {:<36} {:<8} {:>8} {:>6} {:>5}",
        "start", "end", "device", "title", "type", "minutes", "done", "polls"
    );
    for s in sessions {
        println!(
            "{:<17} {:<6} {:<24} {:<36} {:<8} {:>8.1} {:>6} {:>5}",
            s.session_start.format("%Y-%m-%d %H:%M"),
            s.session_end.format("%H:%M"),
            truncate(&s.device_name, 24),
            truncate(&s.media.display_title(), 36),
            s.media_type.as_deref().unwrap_or("-"),
            s.watch_time / 60.0,
            completion_label(s),
            s.event_count
        );
    }
}

fn print_totals(title: &str, totals: &[Totals]) {
    println!("{title}");
    for t in totals {
        println!("  {:<40} {:>8.2} h  {:>5} sessions", t.label, t.total_hours, t.sessions);
    }
    println!();
}

/// Print the aggregate statistics block.
///
/// # Errors
///
/// Returns an error if any of the underlying queries fail.
pub fn print_stats(conn: &Connection) -> Result<()> {
    print_header("SESSION STATISTICS");
    print_totals("Total Watch Time by Device (hours):", &totals_by_device(conn)?);
    print_totals("Total Watch Time by Media Type (hours):", &totals_by_media_type(conn)?);

    println!("Most Watched TV Shows (by total time):");
    for s in top_series(conn, 10)? {
        println!(
            "  {:<40} {:>3} episodes {:>8.2} h  {:>5} sessions",
            truncate(&s.series_name, 40),
            s.episodes,
            s.total_hours,
            s.sessions
        );
    }

    println!("\nMost Played Songs (by session count):");
    for s in top_songs(conn, 10)? {
        println!(
            "  {:<50} {:>4} plays {:>8.1} min",
            truncate(&format!("{} - {}", s.artist, s.title), 50),
            s.play_count,
            s.total_minutes
        );
    }
    Ok(())
}

/// Print daily usage rows.
pub fn print_daily(days: u32, usage: &[DailyUsage]) {
    print_header(&format!("DAILY USAGE (Last {days} days)"));
    println!("{:<12} {:>9} {:>8} {:>8}", "date", "sessions", "hours", "devices");
    for d in usage {
        println!("{:<12} {:>9} {:>8.2} {:>8}", d.date, d.sessions, d.total_hours, d.devices);
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut out: String = value.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

const CSV_HEADER: [&str; 18] = [
    "session_id",
    "device_name",
    "user_name",
    "app",
    "title",
    "artist",
    "album",
    "series_name",
    "season",
    "episode",
    "media_type",
    "session_start",
    "session_end",
    "watch_time_seconds",
    "media_duration",
    "max_position_reached",
    "completion_pct",
    "num_entries",
];

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write `sessions` as CSV with a header row. Returns the number of data rows.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn export_csv<W: Write>(sessions: &[Session], mut out: W) -> Result<usize> {
    writeln!(out, "{}", CSV_HEADER.join(",")).context("Failed to write CSV header")?;
    for s in sessions {
        let fields = [
            s.session_id.to_string(),
            s.device_name.clone(),
            opt(s.user_name.as_deref()),
            opt(s.app.as_deref()),
            opt(s.media.title.as_deref()),
            opt(s.media.artist.as_deref()),
            opt(s.media.album.as_deref()),
            opt(s.media.series_name.as_deref()),
            opt(s.media.season),
            opt(s.media.episode),
            opt(s.media_type.as_deref()),
            s.session_start.to_rfc3339(),
            s.session_end.to_rfc3339(),
            s.watch_time.to_string(),
            opt(s.media_duration),
            opt(s.max_position),
            opt(s.completion_percentage),
            s.event_count.to_string(),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        writeln!(out, "{}", line.join(",")).context("Failed to write CSV row")?;
    }
    out.flush().context("Failed to flush CSV output")?;
    Ok(sessions.len())
}
