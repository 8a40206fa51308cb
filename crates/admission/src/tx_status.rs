//! Transaction status reporting.
//!
//! Rate-limited transactions are reported to an external status collector so
//! that clients polling for their tx can learn it was never injected. Reports
//! are fire-and-forget: [`TxStatusReporter::report`] never blocks and never
//! fails.

use parking_lot::Mutex;
use rpcgate_types::H256;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reason attached to every rate-limit report.
pub const RATE_LIMIT_REASON: &str = "Rejected by JSON RPC rate limiting";

/// Status of a transaction that never reached a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxStatus {
    /// Transaction hash, `0x` hex
    pub tx_hash: String,
    /// Whether the tx was forwarded to a node
    pub injected: bool,
    /// Whether the network accepted it
    pub accepted: bool,
    /// Human readable reason
    pub reason: String,
}

impl TxStatus {
    /// Status for a transaction rejected by rate limiting.
    pub fn rate_limited(hash: &H256) -> Self {
        Self {
            tx_hash: hash.to_hex(),
            injected: false,
            accepted: false,
            reason: RATE_LIMIT_REASON.to_string(),
        }
    }
}

/// Sink for transaction status reports.
pub trait TxStatusReporter: Send + Sync {
    /// Hand off a report. Must not block.
    fn report(&self, status: TxStatus);
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTxStatusReporter;

impl TxStatusReporter for NoopTxStatusReporter {
    fn report(&self, _status: TxStatus) {}
}

/// Writes reports to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTxStatusReporter;

impl TxStatusReporter for LoggingTxStatusReporter {
    fn report(&self, status: TxStatus) {
        info!(tx_hash = %status.tx_hash, reason = %status.reason, "Transaction rejected");
    }
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct MemoryTxStatusReporter {
    reports: Mutex<Vec<TxStatus>>,
}

impl MemoryTxStatusReporter {
    /// Create an empty reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports received so far.
    pub fn reports(&self) -> Vec<TxStatus> {
        self.reports.lock().clone()
    }
}

impl TxStatusReporter for MemoryTxStatusReporter {
    fn report(&self, status: TxStatus) {
        self.reports.lock().push(status);
    }
}

/// POSTs reports as JSON from a background task.
///
/// Reports are queued on a bounded channel; when the queue is full the report
/// is dropped.
#[derive(Debug, Clone)]
pub struct HttpTxStatusReporter {
    queue: mpsc::Sender<TxStatus>,
}

impl HttpTxStatusReporter {
    /// Start the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(
        client: reqwest::Client,
        url: String,
        capacity: usize,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (queue, mut rx) = mpsc::channel::<TxStatus>(capacity.max(1));

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = rx.recv() => {
                        let Some(status) = next else { break };
                        deliver(&client, &url, &status).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Tx status reporter shutting down");
                        break;
                    }
                }
            }
        });

        (Self { queue }, task)
    }
}

impl TxStatusReporter for HttpTxStatusReporter {
    fn report(&self, status: TxStatus) {
        match self.queue.try_send(status) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(status)) => {
                warn!(tx_hash = %status.tx_hash, "Tx status queue full, dropping report");
            }
            Err(mpsc::error::TrySendError::Closed(status)) => {
                debug!(tx_hash = %status.tx_hash, "Tx status reporter stopped");
            }
        }
    }
}

async fn deliver(client: &reqwest::Client, url: &str, status: &TxStatus) {
    match client.post(url).json(status).send().await {
        Ok(resp) if resp.status().is_success() => {
            debug!(tx_hash = %status.tx_hash, "Tx status reported");
        }
        Ok(resp) => {
            warn!(tx_hash = %status.tx_hash, status = %resp.status(), "Tx status report refused");
        }
        Err(e) => {
            warn!(tx_hash = %status.tx_hash, error = %e, "Tx status report failed");
        }
    }
}
