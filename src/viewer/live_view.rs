use crate::models::log_entry::LogEntry;
use std::collections::VecDeque;

/// The entries a viewer has rendered, oldest first, capped at `capacity`.
///
/// Every accepted entry has an id greater than all before it, so
/// `last_seen_id` is both the newest id shown and the catch-up cursor.
#[derive(Debug, Clone)]
pub struct LiveView {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    last_seen_id: i64,
}

impl LiveView {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            last_seen_id: 0,
        }
    }

    pub fn last_seen_id(&self) -> i64 {
        self.last_seen_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Shows a pushed entry unless it is not newer than what is on screen.
    pub fn apply_live(&mut self, entry: LogEntry) -> Option<&LogEntry> {
        if entry.id <= self.last_seen_id {
            return None;
        }
        self.push(entry);
        self.entries.back()
    }

    /// Merges a catch-up result, keeping only entries newer than
    /// `last_seen_id`. Returns the accepted entries in id order.
    pub fn merge_catch_up(&mut self, mut fetched: Vec<LogEntry>) -> Vec<LogEntry> {
        fetched.sort_by_key(|entry| entry.id);
        let mut accepted = Vec::new();
        for entry in fetched {
            if entry.id > self.last_seen_id {
                accepted.push(entry.clone());
                self.push(entry);
            }
        }
        accepted
    }

    fn push(&mut self, entry: LogEntry) {
        self.last_seen_id = entry.id;
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}
