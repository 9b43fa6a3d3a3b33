//! Per-category log lists with idempotent push ingestion and unread
//! counters.
//!
//! The push path delivers log events at-least-once: reconnects and server
//! retries can replay entries. [`LogDeduplicator`] keys every entry by its
//! identifier (unique within a category) and silently discards repeats — a
//! duplicate never re-enters the list, never bumps the unread counter, and
//! never overwrites the fields of the entry already held.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::Mutex;
use tracing::debug;

use fleetsync_types::{LogCategory, LogEntry, UnreadCounts};

use crate::config::StoreConfig;
use crate::events::{EngineEvent, EventDispatcher};

#[derive(Debug, Default)]
struct CategoryState {
    /// Entries, newest first.
    entries: VecDeque<LogEntry>,
    /// Every identifier ever seen, including evicted entries, so a late
    /// duplicate of an evicted entry is still discarded.
    seen: HashSet<i64>,
    unread: u64,
}

/// Bounded, ordered, deduplicated log collections plus unread counters.
pub struct LogDeduplicator {
    state: Mutex<HashMap<LogCategory, CategoryState>>,
    events: EventDispatcher,
    window: usize,
}

impl LogDeduplicator {
    /// Create an empty deduplicator.
    pub fn new(config: &StoreConfig, events: EventDispatcher) -> Self {
        let mut state = HashMap::new();
        for category in LogCategory::ALL {
            state.insert(category, CategoryState::default());
        }
        Self {
            state: Mutex::new(state),
            events,
            window: config.log_window,
        }
    }

    /// Replace a category's list wholesale with REST-fetched history.
    ///
    /// Used once at subscription start. Entries are kept in the order
    /// received (the server orders newest first). The seen-id set is rebuilt
    /// from the new list; unread counters are not touched — they are seeded
    /// separately via [`LogDeduplicator::seed_unread`].
    pub async fn seed_from_history(&self, category: LogCategory, entries: Vec<LogEntry>) {
        let mut state = self.state.lock().await;
        let cat = state.entry(category).or_default();
        cat.entries = entries.into_iter().take(self.window).collect();
        cat.seen = cat.entries.iter().map(|e| e.id).collect();
        debug!(%category, count = cat.entries.len(), "seeded log history");
    }

    /// Initialize a category's unread counter from the server's value.
    pub async fn seed_unread(&self, category: LogCategory, count: u64) {
        let mut state = self.state.lock().await;
        state.entry(category).or_default().unread = count;
    }

    /// Ingest one push-delivered entry.
    ///
    /// Returns `true` when the entry was new: it is prepended to the front
    /// of the list and the category's unread counter increments by one. A
    /// duplicate identifier is a silent no-op and returns `false`.
    pub async fn ingest_push(&self, category: LogCategory, entry: LogEntry) -> bool {
        let id = entry.id;
        {
            let mut state = self.state.lock().await;
            let cat = state.entry(category).or_default();
            if !cat.seen.insert(id) {
                debug!(%category, id, "discarding duplicate log entry");
                return false;
            }
            cat.entries.push_front(entry);
            cat.entries.truncate(self.window);
            cat.unread += 1;
        }
        self.events.send(EngineEvent::LogReceived { category, id });
        true
    }

    /// Reset a category's unread counter to zero. Entries are untouched.
    pub async fn mark_read(&self, category: LogCategory) {
        let mut state = self.state.lock().await;
        state.entry(category).or_default().unread = 0;
    }

    /// Get a category's entries, newest first.
    pub async fn entries(&self, category: LogCategory) -> Vec<LogEntry> {
        let state = self.state.lock().await;
        state
            .get(&category)
            .map(|c| c.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get a category's unread counter.
    pub async fn unread(&self, category: LogCategory) -> u64 {
        let state = self.state.lock().await;
        state.get(&category).map(|c| c.unread).unwrap_or(0)
    }

    /// Unread counters in the shape the dashboard badge consumes.
    pub async fn unread_counts(&self) -> UnreadCounts {
        let state = self.state.lock().await;
        let device_logs = state.get(&LogCategory::Device).map(|c| c.unread).unwrap_or(0);
        let admin_logs = state.get(&LogCategory::Admin).map(|c| c.unread).unwrap_or(0);
        UnreadCounts {
            total: device_logs + admin_logs,
            device_logs,
            admin_logs,
        }
    }
}
