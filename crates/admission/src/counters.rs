//! Per-cycle request tallies.
//!
//! Reset by every reporting cycle. Three tallies are kept per IP: heavy
//! requests, all requests reaching the gate, and transaction submissions.
//! Heavy requests and submissions are bumped together when a heavy request is
//! recorded; they are reported separately and ban candidates come from the
//! submission tally.

use serde::Serialize;
use std::collections::HashMap;

/// An IP and how often it was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpCount {
    /// Client IP
    pub ip: String,
    /// Tally for the cycle
    pub count: u64,
}

/// Tallies for the current reporting cycle.
#[derive(Debug, Default, Clone)]
pub struct RequestCounters {
    heavy: HashMap<String, u64>,
    all: HashMap<String, u64>,
    total_tx: HashMap<String, u64>,
}

/// Sorted tallies taken at the end of a cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Heavy requests per IP
    pub heavy_requests: Vec<IpCount>,
    /// All requests per IP
    pub all_requests: Vec<IpCount>,
    /// Transaction submissions per IP
    pub total_txs: Vec<IpCount>,
}

impl RequestCounters {
    /// Create empty tallies
    pub fn new() -> Self {
        Self::default()
    }

    /// Count any request from `ip`.
    pub fn record_all(&mut self, ip: &str) {
        bump(&mut self.all, ip);
    }

    /// Count a heavy request, and the transaction it submits, from `ip`.
    pub fn record_heavy(&mut self, ip: &str) {
        bump(&mut self.heavy, ip);
        bump(&mut self.total_tx, ip);
    }

    /// Transaction submissions from `ip` so far this cycle.
    pub fn tx_count(&self, ip: &str) -> u64 {
        self.total_tx.get(ip).copied().unwrap_or(0)
    }

    /// IPs whose transaction tally reached `threshold`, highest first.
    pub fn ips_over(&self, threshold: u64) -> Vec<IpCount> {
        sorted_desc(
            self.total_tx
                .iter()
                .filter(|(_, count)| **count >= threshold)
                .map(|(ip, count)| (ip.clone(), *count)),
        )
        .into_iter()
        .map(|(ip, count)| IpCount { ip, count })
        .collect()
    }

    /// Sorted copy of all tallies.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            heavy_requests: to_ip_counts(&self.heavy),
            all_requests: to_ip_counts(&self.all),
            total_txs: to_ip_counts(&self.total_tx),
        }
    }

    /// True when nothing was counted this cycle.
    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.heavy.is_empty() && self.total_tx.is_empty()
    }
}

fn bump(map: &mut HashMap<String, u64>, key: &str) {
    match map.get_mut(key) {
        Some(count) => *count += 1,
        None => {
            map.insert(key.to_string(), 1);
        }
    }
}

fn to_ip_counts(map: &HashMap<String, u64>) -> Vec<IpCount> {
    sorted_desc(map.iter().map(|(ip, count)| (ip.clone(), *count)))
        .into_iter()
        .map(|(ip, count)| IpCount { ip, count })
        .collect()
}

/// Sort `(key, count)` pairs by count descending, then key ascending.
pub(crate) fn sorted_desc(items: impl Iterator<Item = (String, u64)>) -> Vec<(String, u64)> {
    let mut items: Vec<_> = items.collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    items
}
