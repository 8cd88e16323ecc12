//! # Storage
//!
//! Repository interfaces between the session builder and its persisted store.
//!
//! - [`EventSource`]: read side of the append-only `now_playing` log
//! - [`EventLog`]: append side, used by collectors and ingestion
//! - [`SessionStore`]: per-device replacement of `viewing_sessions`
//!
//! [`SqliteStore`] is the real implementation. [`MemoryStore`] keeps everything
//! in memory and backs the unit tests.

mod memory;
pub(crate) mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::event::{RawEvent, StoredEvent};
use crate::session::{DeviceSessions, Session};
use anyhow::Result;

/// Read access to raw playback events.
pub trait EventSource {
    /// Every stored row, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn load_events(&self) -> Result<Vec<StoredEvent>>;
}

/// Append access to raw playback events.
pub trait EventLog {
    /// Append one event and return its row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn append(&mut self, event: &RawEvent) -> Result<i64>;

    /// Most recently appended row for `device_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn last_event(&self, device_name: &str) -> Result<Option<StoredEvent>>;

    /// Run `f` so that every append it makes is kept only if it returns `Ok`.
    ///
    /// The default runs `f` directly; stores that can roll back override it.
    ///
    /// # Errors
    ///
    /// Returns the error from `f` (after discarding its appends) or a
    /// failure to begin or commit.
    fn in_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T>,
    {
        f(self)
    }
}

/// Idempotent upsert target for computed sessions.
pub trait SessionStore {
    /// Replace everything stored for `device_name` with `sessions`.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement cannot be written.
    fn replace_sessions_for_device(&mut self, device_name: &str, sessions: &[Session]) -> Result<()>;

    /// Replace several devices at once. Stores that support transactions
    /// should apply all batches or none.
    ///
    /// # Errors
    ///
    /// Returns the first replacement error.
    fn replace_all(&mut self, batches: &[DeviceSessions]) -> Result<()> {
        for batch in batches {
            self.replace_sessions_for_device(&batch.device_name, &batch.sessions)?;
        }
        Ok(())
    }

    /// Sessions for one device, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn sessions_for_device(&self, device_name: &str) -> Result<Vec<Session>>;

    /// Every stored session, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn all_sessions(&self) -> Result<Vec<Session>>;
}
