use super::{EventLog, EventSource, SessionStore};
use crate::event::{RawEvent, StoredEvent};
use crate::session::Session;
use anyhow::Result;
use std::collections::BTreeMap;

/// In-memory store with the same semantics as [`super::SqliteStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    events: Vec<StoredEvent>,
    sessions: BTreeMap<String, Vec<Session>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event` and return its row id.
    pub fn push_event(&mut self, event: &RawEvent) -> i64 {
        let id = self.next_id();
        self.events.push(StoredEvent::from_event(id, event));
        id
    }

    /// Append a row verbatim, e.g. one a buggy collector wrote.
    pub fn push_row(&mut self, mut row: StoredEvent) -> i64 {
        row.id = self.next_id();
        let id = row.id;
        self.events.push(row);
        id
    }

    fn next_id(&self) -> i64 {
        self.events.last().map_or(1, |row| row.id + 1)
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

impl EventSource for MemoryStore {
    fn load_events(&self) -> Result<Vec<StoredEvent>> {
        Ok(self.events.clone())
    }
}

impl EventLog for MemoryStore {
    fn append(&mut self, event: &RawEvent) -> Result<i64> {
        Ok(self.push_event(event))
    }

    fn last_event(&self, device_name: &str) -> Result<Option<StoredEvent>> {
        Ok(self
            .events
            .iter()
            .rev()
            .find(|row| row.device_name == device_name)
            .cloned())
    }

    fn in_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let mark = self.events.len();
        let result = f(self);
        if result.is_err() {
            self.events.truncate(mark);
        }
        result
    }
}

impl SessionStore for MemoryStore {
    fn replace_sessions_for_device(&mut self, device_name: &str, sessions: &[Session]) -> Result<()> {
        let mut sessions = sessions.to_vec();
        sessions.sort_by_key(|s| s.session_start);
        self.sessions.insert(device_name.to_string(), sessions);
        Ok(())
    }

    fn sessions_for_device(&self, device_name: &str) -> Result<Vec<Session>> {
        Ok(self.sessions.get(device_name).cloned().unwrap_or_default())
    }

    fn all_sessions(&self) -> Result<Vec<Session>> {
        let mut all: Vec<Session> = self.sessions.values().flatten().cloned().collect();
        all.sort_by(|a, b| b.session_start.cmp(&a.session_start));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PlaybackState;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_row_ids_follow_insertion_order() {
        let mut store = MemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let first = store.push_event(&RawEvent::new(ts, "TV", "Movie", PlaybackState::Playing));
        let second = store.append(&RawEvent::new(ts, "iPad", "Show", PlaybackState::Paused)).unwrap();

        assert_eq!((first, second), (1, 2));
        assert_eq!(store.event_count(), 2);
        assert_eq!(store.last_event("TV").unwrap().unwrap().id, 1);
        assert!(store.last_event("HomePod").unwrap().is_none());
    }
}
