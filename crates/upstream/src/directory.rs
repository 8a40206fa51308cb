//! Upstream node directory.
//!
//! The archiver publishes the active consensus nodes. [`NodeDirectory`] keeps
//! the last non-empty list it returned; a failed or empty fetch leaves the
//! previous snapshot in place.

use crate::{Result, UpstreamError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A consensus node as published by the archiver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Advertised IP or host
    pub ip: String,
    /// HTTP port
    pub port: u16,
}

impl NodeRecord {
    /// Creates a node record.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    /// `http://ip:port`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

impl std::fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Source of the node list.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Fetch the current node list
    async fn fetch_nodes(&self) -> Result<Vec<NodeRecord>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeListResponse {
    node_list: Vec<NodeRecord>,
}

/// Fetches `GET {archiver}/nodelist`.
#[derive(Debug, Clone)]
pub struct ArchiverDirectorySource {
    client: reqwest::Client,
    url: String,
}

impl ArchiverDirectorySource {
    /// Source backed by the archiver at `base_url`.
    pub fn new(client: reqwest::Client, base_url: impl AsRef<str>) -> Self {
        let url = format!("{}/nodelist", base_url.as_ref().trim_end_matches('/'));
        Self { client, url }
    }

    /// Full node list URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DirectorySource for ArchiverDirectorySource {
    async fn fetch_nodes(&self) -> Result<Vec<NodeRecord>> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        let body = resp.json::<NodeListResponse>().await?;
        Ok(body.node_list)
    }
}

/// Scripted directory source for tests.
///
/// Each fetch pops the next scripted result; `None` entries fail. Once the
/// script runs out every fetch fails.
#[derive(Debug, Default)]
pub struct MockDirectorySource {
    script: Mutex<VecDeque<Option<Vec<NodeRecord>>>>,
    fetches: Mutex<usize>,
}

impl MockDirectorySource {
    /// Create a source with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful fetch
    pub fn push_nodes(&self, nodes: Vec<NodeRecord>) {
        self.script.lock().push_back(Some(nodes));
    }

    /// Queue a failed fetch
    pub fn push_failure(&self) {
        self.script.lock().push_back(None);
    }

    /// Fetches performed so far
    pub fn fetches(&self) -> usize {
        *self.fetches.lock()
    }
}

#[async_trait]
impl DirectorySource for MockDirectorySource {
    async fn fetch_nodes(&self) -> Result<Vec<NodeRecord>> {
        *self.fetches.lock() += 1;
        match self.script.lock().pop_front() {
            Some(Some(nodes)) => Ok(nodes),
            _ => Err(UpstreamError::Unavailable("scripted failure".to_string())),
        }
    }
}

/// What a refresh did to the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Snapshot replaced with this many nodes
    Updated(usize),
    /// Source returned no nodes; snapshot kept
    Empty,
    /// Fetch failed; snapshot kept
    Failed,
}

/// The last known node list.
pub struct NodeDirectory {
    source: Arc<dyn DirectorySource>,
    snapshot: RwLock<Arc<Vec<NodeRecord>>>,
}

impl NodeDirectory {
    /// Create an empty directory fed by `source`.
    pub fn new(source: Arc<dyn DirectorySource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Fetch the node list and replace the snapshot if it is non-empty.
    pub async fn refresh(&self) -> RefreshOutcome {
        match self.source.fetch_nodes().await {
            Ok(nodes) if nodes.is_empty() => {
                warn!("Archiver returned an empty node list, keeping current list");
                RefreshOutcome::Empty
            }
            Ok(nodes) => {
                let count = nodes.len();
                *self.snapshot.write() = Arc::new(nodes);
                info!(nodes = count, "Node list updated");
                RefreshOutcome::Updated(count)
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch node list, keeping current list");
                RefreshOutcome::Failed
            }
        }
    }

    /// The latest snapshot.
    pub fn current_snapshot(&self) -> Arc<Vec<NodeRecord>> {
        self.snapshot.read().clone()
    }

    /// Nodes in the latest snapshot.
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// True before the first successful refresh.
    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }
}

/// Refresh `directory` every `period` until shutdown.
pub fn spawn_directory_refresher(
    directory: Arc<NodeDirectory>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    directory.refresh().await;
                }
                _ = shutdown_rx.recv() => {
                    debug!("Directory refresher shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_list_json() {
        let body = r#"{"nodeList":[{"ip":"10.0.0.1","port":9001},{"ip":"10.0.0.2","port":9002}]}"#;
        let parsed: NodeListResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.node_list[1], NodeRecord::new("10.0.0.2", 9002));
    }

    #[test]
    fn test_archiver_url() {
        let source = ArchiverDirectorySource::new(reqwest::Client::new(), "http://127.0.0.1:4000/");
        assert_eq!(source.url(), "http://127.0.0.1:4000/nodelist");
    }

    #[tokio::test]
    async fn test_refresh_replaces_snapshot() {
        let source = Arc::new(MockDirectorySource::new());
        source.push_nodes(vec![NodeRecord::new("10.0.0.1", 9001)]);
        source.push_nodes(vec![
            NodeRecord::new("10.0.0.2", 9001),
            NodeRecord::new("10.0.0.3", 9001),
        ]);
        let directory = NodeDirectory::new(source);

        assert!(directory.is_empty());
        assert_eq!(directory.refresh().await, RefreshOutcome::Updated(1));
        assert_eq!(directory.refresh().await, RefreshOutcome::Updated(2));
        assert_eq!(directory.current_snapshot()[0].ip, "10.0.0.2");
    }
}
