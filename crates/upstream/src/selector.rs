//! Active node selection.

use crate::directory::{NodeDirectory, NodeRecord};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// How the active node is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Always the configured node
    Static,
    /// Round-robin over the directory
    Dynamic {
        /// Replace private/local advertised IPs with the configured node IP
        use_config_node_ip: bool,
    },
}

impl SelectionMode {
    /// Dynamic mode.
    pub fn dynamic(use_config_node_ip: bool) -> Self {
        SelectionMode::Dynamic { use_config_node_ip }
    }
}

/// Chooses the node each outgoing call goes to.
///
/// In dynamic mode every [`activate`](Self::activate) advances the
/// round-robin cursor, so consecutive calls spread across the pool. When the
/// directory is empty the previously active node stays active.
pub struct NodeSelector {
    directory: Arc<NodeDirectory>,
    mode: SelectionMode,
    configured: NodeRecord,
    cursor: Mutex<usize>,
    active: RwLock<NodeRecord>,
}

impl NodeSelector {
    /// Create a selector. `configured` is the initial active node and the
    /// only node used in static mode.
    pub fn new(directory: Arc<NodeDirectory>, mode: SelectionMode, configured: NodeRecord) -> Self {
        Self {
            directory,
            mode,
            active: RwLock::new(configured.clone()),
            configured,
            cursor: Mutex::new(0),
        }
    }

    /// Selection mode in use.
    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Advance the cursor and return the node under it.
    ///
    /// The cursor moves before the read, so the first pick from a fresh
    /// selector is index 1. A cursor past the end (the snapshot shrank, or it
    /// wrapped) restarts at 0.
    pub fn next(&self) -> Option<NodeRecord> {
        let snapshot = self.directory.current_snapshot();
        if snapshot.is_empty() {
            return None;
        }

        let mut cursor = self.cursor.lock();
        *cursor += 1;
        if *cursor >= snapshot.len() {
            *cursor = 0;
        }
        snapshot.get(*cursor).cloned()
    }

    /// A uniformly random node from the snapshot.
    pub fn pick_random(&self) -> Option<NodeRecord> {
        let snapshot = self.directory.current_snapshot();
        if snapshot.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..snapshot.len());
        snapshot.get(index).cloned()
    }

    /// Recompute and return the active node.
    pub fn activate(&self) -> NodeRecord {
        let chosen = match self.mode {
            SelectionMode::Static => Some(self.configured.clone()),
            SelectionMode::Dynamic { use_config_node_ip } => self.next().map(|node| {
                if use_config_node_ip && is_local_ip(&node.ip) {
                    NodeRecord::new(self.configured.ip.clone(), node.port)
                } else {
                    node
                }
            }),
        };

        let mut active = self.active.write();
        if let Some(node) = chosen {
            if *active != node {
                debug!(node = %node, "Active node changed");
                *active = node;
            }
        }
        active.clone()
    }

    /// The active node, without advancing.
    pub fn active(&self) -> NodeRecord {
        self.active.read().clone()
    }

    /// Activate a node and return its base URL.
    pub fn base_url(&self) -> String {
        self.activate().base_url()
    }
}

/// Private, loopback, link-local or unspecified addresses, and `localhost`.
fn is_local_ip(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
        }
        Ok(IpAddr::V6(ip)) => {
            let first = ip.segments()[0];
            ip.is_loopback()
                || ip.is_unspecified()
                // unique local fc00::/7
                || (first & 0xfe00) == 0xfc00
                // link local fe80::/10
                || (first & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_local_ip() {
        for ip in ["localhost", "127.0.0.1", "10.1.2.3", "192.168.0.5", "172.16.0.1", "169.254.1.1", "0.0.0.0", "::1", "fd00::1", "fe80::1"] {
            assert!(is_local_ip(ip), "{} should be local", ip);
        }
        for ip in ["8.8.8.8", "203.0.113.7", "2001:db8::1", "node.example.com"] {
            assert!(!is_local_ip(ip), "{} should not be local", ip);
        }
    }
}
