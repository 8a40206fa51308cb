//! # RPC Gate Admission
//!
//! Decides whether an incoming JSON-RPC request may be forwarded upstream.
//!
//! Heavy (transaction-submitting) requests are rate limited with count-based
//! sliding windows:
//! - a per-IP hard cap, which can ban the offender
//! - a per-IP soft cap, which only rejects
//! - per-address caps on the decoded sender and recipient
//!
//! Read-only methods pass straight through after the ban check. All mutable
//! state sits behind one lock in [`AdmissionController`]; ban persistence and
//! tx status reports run after that lock is released.
//!
//! ## Example
//!
//! ```rust
//! use rpcgate_admission::{AdmissionController, AdmissionDecision};
//! use rpcgate_config::AdmissionConfig;
//!
//! let controller = AdmissionController::new(AdmissionConfig::default());
//! let decision = controller.check_request("203.0.113.9", "eth_blockNumber", &[]);
//! assert_eq!(decision, AdmissionDecision::Accepted);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod abuse;
pub mod ban_list;
pub mod controller;
pub mod counters;
pub mod history;
pub mod maintenance;
pub mod tx_status;

pub use abuse::{AbuseAggregate, AbusedContract, AbusiveCaller};
pub use ban_list::{load_ip_list, BanListStore, BanListWriter};
pub use controller::{
    AdmissionController, AdmissionDecision, AdmissionStats, CycleReport, PruneSummary,
    RejectReason,
};
pub use counters::{CounterSnapshot, IpCount, RequestCounters};
pub use history::RequestHistory;
pub use maintenance::{spawn_pruner, spawn_reporter};
pub use tx_status::{
    HttpTxStatusReporter, LoggingTxStatusReporter, MemoryTxStatusReporter, NoopTxStatusReporter,
    TxStatus, TxStatusReporter, RATE_LIMIT_REASON,
};

use std::path::PathBuf;

/// Result type alias for admission operations
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Errors raised while loading or persisting IP lists
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// Reading an IP list failed
    #[error("failed to read IP list {path}: {source}")]
    Read {
        /// File that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Writing an IP list failed
    #[error("failed to write IP list {path}: {source}")]
    Write {
        /// File that could not be written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An IP list is not a JSON array of strings
    #[error("malformed IP list {path}: {source}")]
    Parse {
        /// File that could not be parsed
        path: PathBuf,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// Serializing an IP list failed
    #[error("failed to encode IP list: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Milliseconds since the Unix epoch.
///
/// A clock before the epoch reads as zero.
pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
