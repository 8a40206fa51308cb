//! Count-based sliding window request history.
//!
//! Each key (an IP or a lowercase address) owns a chronological list of
//! millisecond timestamps. A key is over its limit when its N-th most recent
//! timestamp is younger than the window, which needs one index lookup instead
//! of a scan.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

/// Per-key request timestamps, oldest first.
#[derive(Debug, Default, Clone)]
pub struct RequestHistory {
    entries: HashMap<String, VecDeque<u64>>,
}

impl RequestHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a timestamp for `key` and return the key's history length.
    ///
    /// Timestamps never go backwards within a key: a clock step back is
    /// recorded at the previous latest timestamp.
    pub fn record(&mut self, key: &str, now_ms: u64) -> usize {
        let history = match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(VecDeque::new()),
        };
        let ts = history.back().map_or(now_ms, |last| now_ms.max(*last));
        history.push_back(ts);
        history.len()
    }

    /// Number of timestamps tracked for `key`.
    pub fn len_of(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, VecDeque::len)
    }

    /// The `n`-th most recent timestamp (1 = latest).
    pub fn nth_most_recent(&self, key: &str, n: usize) -> Option<u64> {
        let history = self.entries.get(key)?;
        if n == 0 || history.len() < n {
            return None;
        }
        history.get(history.len() - n).copied()
    }

    /// True when `key` has at least `lookback` timestamps and the
    /// `lookback`-th most recent is less than `window_ms` old.
    pub fn exceeds(&self, key: &str, lookback: usize, window_ms: u64, now_ms: u64) -> bool {
        self.nth_most_recent(key, lookback)
            .is_some_and(|ts| now_ms.saturating_sub(ts) < window_ms)
    }

    /// Drop timestamps older than the window.
    ///
    /// For every key the first in-window entry is found and everything before
    /// it is removed except the entry immediately preceding it. Keys without
    /// any in-window entry are removed entirely. Returns the number of
    /// timestamps dropped.
    pub fn prune(&mut self, now_ms: u64, window_ms: u64) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, history| {
            let first_fresh = history
                .iter()
                .position(|ts| now_ms.saturating_sub(*ts) < window_ms)
                .unwrap_or(history.len());

            if first_fresh == history.len() {
                removed += history.len();
                return false;
            }
            if first_fresh > 1 {
                history.drain(..first_fresh - 1);
                removed += first_fresh - 1;
            }
            true
        });
        removed
    }

    /// Number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over keys and their history lengths.
    pub fn lengths(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.entries.iter().map(|(key, history)| (key.as_str(), history.len()))
    }

    /// Forget a key.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nth_most_recent() {
        let mut history = RequestHistory::new();
        for ts in [100, 200, 300] {
            history.record("ip", ts);
        }
        assert_eq!(history.nth_most_recent("ip", 1), Some(300));
        assert_eq!(history.nth_most_recent("ip", 3), Some(100));
        assert_eq!(history.nth_most_recent("ip", 4), None);
        assert_eq!(history.nth_most_recent("ip", 0), None);
        assert_eq!(history.nth_most_recent("other", 1), None);
    }

    #[test]
    fn test_record_is_monotonic() {
        let mut history = RequestHistory::new();
        history.record("ip", 1_000);
        history.record("ip", 900);
        assert_eq!(history.nth_most_recent("ip", 1), Some(1_000));
    }

    #[test]
    fn test_exceeds_uses_strict_window() {
        let mut history = RequestHistory::new();
        history.record("ip", 0);
        history.record("ip", 10);

        assert!(history.exceeds("ip", 2, 60_000, 59_999));
        assert!(!history.exceeds("ip", 2, 60_000, 60_000));
        assert!(!history.exceeds("ip", 3, 60_000, 20));
    }

    #[test]
    fn test_prune_keeps_one_entry_of_slack() {
        let mut history = RequestHistory::new();
        for ts in [0, 1_000, 2_000, 70_000, 80_000] {
            history.record("ip", ts);
        }

        // At 100s the first in-window entry is 70s; 2s survives as slack
        let removed = history.prune(100_000, 60_000);
        assert_eq!(removed, 2);
        assert_eq!(history.len_of("ip"), 3);
        assert_eq!(history.nth_most_recent("ip", 3), Some(2_000));
    }

    #[test]
    fn test_prune_drops_fully_stale_keys() {
        let mut history = RequestHistory::new();
        history.record("stale", 0);
        history.record("stale", 1);
        history.record("fresh", 90_000);

        history.prune(100_000, 60_000);
        assert_eq!(history.len_of("stale"), 0);
        assert_eq!(history.len_of("fresh"), 1);
        assert_eq!(history.key_count(), 1);
    }
}
