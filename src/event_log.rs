//! Per-session history of dispatched commands.
//!
//! Every command, operator line and handler the dispatcher runs is recorded
//! with the mode it ran in, so `run --log` and tests can see how keys were
//! resolved. Only the newest [`DEFAULT_LIMIT`] entries are kept.

use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

use crate::key::KeySequence;

pub const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Command description, or the handler's `<Plug>` name
    pub description: String,
    /// Keys that selected it; empty for doubled operators (`dd`)
    pub keys: KeySequence,
    /// Mode the command was dispatched from
    pub mode: &'static str,
    pub count: Option<usize>,
    /// Whether `.` would repeat it
    pub is_change: bool,
    #[serde(skip)]
    pub at: Instant,
}

impl LogEntry {
    pub fn new(description: impl Into<String>, keys: KeySequence, mode: &'static str) -> Self {
        Self {
            description: description.into(),
            keys,
            mode,
            count: None,
            is_change: false,
            at: Instant::now(),
        }
    }

    pub fn with_count(mut self, count: Option<usize>) -> Self {
        self.count = count;
        self
    }

    pub fn change(mut self, is_change: bool) -> Self {
        self.is_change = is_change;
        self
    }
}

#[derive(Debug)]
pub struct EventLog {
    /// Oldest first
    entries: VecDeque<LogEntry>,
    limit: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn record(&mut self, entry: LogEntry) {
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Newest first
    pub fn recent(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().rev()
    }

    /// Newest entry that changed text
    pub fn last_change(&self) -> Option<&LogEntry> {
        self.recent().find(|entry| entry.is_change)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
