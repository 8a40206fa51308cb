//! Recipient abuse aggregation.
//!
//! When a recipient address trips its per-address cap, the offending
//! (recipient, sender, IP) triple is recorded here. The aggregate keeps a
//! count at every level so a report can show which contracts are hammered, by
//! whom, and from where.

use crate::counters::sorted_desc;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
struct CallerEntry {
    count: u64,
    ips: HashMap<String, u64>,
}

#[derive(Debug, Default, Clone)]
struct ContractEntry {
    count: u64,
    callers: HashMap<String, CallerEntry>,
}

/// Three-level map `recipient -> sender -> ip`, counted at every level.
#[derive(Debug, Default, Clone)]
pub struct AbuseAggregate {
    contracts: HashMap<String, ContractEntry>,
}

/// A recipient in the abuse report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbusedContract {
    /// Recipient address
    pub contract: String,
    /// Rejections against this recipient
    pub count: u64,
    /// Senders, highest count first
    pub callers: Vec<AbusiveCaller>,
}

/// A sender under an [`AbusedContract`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbusiveCaller {
    /// Sender address
    pub address: String,
    /// Rejections from this sender
    pub count: u64,
    /// Source IPs with their counts, highest first
    pub ips: Vec<(String, u64)>,
}

impl AbuseAggregate {
    /// Create an empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one rejection of `sender` calling `contract` from `ip`.
    pub fn record(&mut self, contract: &str, sender: &str, ip: &str) {
        let contract = self.contracts.entry(contract.to_string()).or_default();
        contract.count += 1;

        let caller = contract.callers.entry(sender.to_string()).or_default();
        caller.count += 1;

        *caller.ips.entry(ip.to_string()).or_insert(0) += 1;
    }

    /// Number of distinct recipients.
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Sorted report: every level by count descending, ties by key.
    pub fn report(&self) -> Vec<AbusedContract> {
        let order = sorted_desc(self.contracts.iter().map(|(k, v)| (k.clone(), v.count)));

        order
            .into_iter()
            .filter_map(|(contract, count)| {
                let entry = self.contracts.get(&contract)?;
                let callers = sorted_desc(entry.callers.iter().map(|(k, v)| (k.clone(), v.count)))
                    .into_iter()
                    .filter_map(|(address, count)| {
                        let caller = entry.callers.get(&address)?;
                        let ips = sorted_desc(caller.ips.iter().map(|(ip, n)| (ip.clone(), *n)));
                        Some(AbusiveCaller { address, count, ips })
                    })
                    .collect();
                Some(AbusedContract {
                    contract,
                    count,
                    callers,
                })
            })
            .collect()
    }
}
