//! Detection history: bounded, newest-first, in memory for the session only.
//! Inserts at the front and evicts from the tail, both O(1) on a VecDeque.

use std::collections::VecDeque;
use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, TimeZone};
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 20;
pub const DEFAULT_TIME_FORMAT: &str = "%H:%M:%S";

/// True when every specifier in `format` is one chrono understands.
pub fn is_valid_time_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// One logged detection event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// Local wall-clock label, e.g. "14:03:27".
    pub time_label: String,
    pub count: u32,
    /// Unix epoch milliseconds.
    pub timestamp_ms: u64,
}

pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    time_format: String,
}

impl HistoryLog {
    pub fn new(capacity: usize, time_format: impl Into<String>) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            time_format: time_format.into(),
        }
    }

    /// Record a detection at `now_ms`, evicting the oldest entry if over capacity.
    pub fn add(&mut self, count: u32, now_ms: u64) {
        let entry = HistoryEntry {
            time_label: self.format_label(now_ms),
            count,
            timestamp_ms: now_ms,
        };
        debug!(count, label = %entry.time_label, "history_entry_added");
        self.entries.push_front(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Newest first. Borrowing, so it can be walked any number of times.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &HistoryEntry> + '_ {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Falls back to the raw millisecond stamp when the time or format is unusable.
    fn format_label(&self, now_ms: u64) -> String {
        let Some(at) = Local.timestamp_millis_opt(now_ms as i64).single() else {
            return now_ms.to_string();
        };
        let mut label = String::new();
        match write!(label, "{}", at.format(&self.time_format)) {
            Ok(()) => label,
            Err(_) => now_ms.to_string(),
        }
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TIME_FORMAT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_entry_comes_first() {
        let mut log = HistoryLog::default();
        assert!(log.is_empty());
        log.add(1, 1_000);
        log.add(3, 5_000);
        let counts: Vec<u32> = log.entries().map(|e| e.count).collect();
        assert_eq!(counts, vec![3, 1]);
        assert_eq!(log.entries().next().map(|e| e.timestamp_ms), Some(5_000));
    }

    #[test]
    fn never_exceeds_capacity_and_evicts_oldest() {
        let mut log = HistoryLog::default();
        for i in 0..57u64 {
            log.add(i as u32, i * 3_000);
            assert!(log.len() <= DEFAULT_CAPACITY);
        }
        assert_eq!(log.len(), 20);
        let newest = log.entries().next().map(|e| e.count);
        let oldest = log.entries().last().map(|e| e.count);
        assert_eq!(newest, Some(56));
        assert_eq!(oldest, Some(37));
    }

    #[test]
    fn entries_can_be_walked_repeatedly() {
        let mut log = HistoryLog::default();
        log.add(2, 10);
        log.add(4, 20);
        let first: Vec<_> = log.entries().cloned().collect();
        let second = log.snapshot();
        assert_eq!(first, second);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn label_uses_configured_format() {
        let mut log = HistoryLog::new(5, "%Y");
        log.add(1, 1_700_000_000_000);
        let label = log.entries().next().map(|e| e.time_label.clone()).unwrap_or_default();
        // 2023-11-14 UTC; any local offset keeps the year.
        assert_eq!(label, "2023");
    }

    #[test]
    fn unusable_format_falls_back_to_millis() {
        let mut log = HistoryLog::new(5, "%Q");
        log.add(2, 1_700_000_000_000);
        let label = log.entries().next().map(|e| e.time_label.clone()).unwrap_or_default();
        assert_eq!(label, "1700000000000");
    }

    #[test]
    fn recognises_bad_specifiers() {
        assert!(is_valid_time_format(DEFAULT_TIME_FORMAT));
        assert!(is_valid_time_format("%Y-%m-%d %H:%M"));
        assert!(!is_valid_time_format("%Q"));
        assert!(!is_valid_time_format("%H:%"));
    }
}
