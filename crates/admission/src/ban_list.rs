//! Durable IP lists.
//!
//! Both the allow-list and the ban list are JSON arrays of IP strings. The
//! allow-list is read once at startup. The ban list is rewritten on every ban
//! through [`BanListStore`], which serializes writers and replaces the file via
//! a temp file and rename so a crash never leaves a truncated list.
//!
//! The admission controller does not write the file itself. It queues
//! mutations on a [`BanListWriter`], which applies them in order on the
//! blocking pool when called from inside a tokio runtime.

use crate::{AdmissionError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Read a JSON array of IPs. A missing file is an empty list.
pub fn load_ip_list(path: &Path) -> Result<Vec<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "IP list not found, starting empty");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(AdmissionError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(&content).map_err(|e| AdmissionError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// The durable ban list.
#[derive(Debug)]
pub struct BanListStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl BanListStore {
    /// Create a store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// File backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents of the list.
    pub fn load(&self) -> Result<Vec<String>> {
        load_ip_list(&self.path)
    }

    /// Add `ip` unless already present. Returns whether the file changed.
    pub fn append(&self, ip: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();

        let mut ips = self.load()?;
        if ips.iter().any(|existing| existing == ip) {
            debug!(%ip, "IP already in ban list");
            return Ok(false);
        }
        ips.push(ip.to_string());
        self.write_atomic(&ips)?;
        Ok(true)
    }

    /// Remove `ip` if present. Returns whether the file changed.
    pub fn remove(&self, ip: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();

        let mut ips = self.load()?;
        let before = ips.len();
        ips.retain(|existing| existing != ip);
        if ips.len() == before {
            return Ok(false);
        }
        self.write_atomic(&ips)?;
        Ok(true)
    }

    fn write_atomic(&self, ips: &[String]) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(ips)?;
        let temp_path = self.path.with_extension("json.tmp");
        let write_err = |source: std::io::Error| AdmissionError::Write {
            path: self.path.clone(),
            source,
        };

        let mut file = File::create(&temp_path).map_err(write_err)?;
        file.write_all(&encoded).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        std::fs::rename(&temp_path, &self.path).map_err(write_err)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BanListOp {
    Append(String),
    Remove(String),
}

/// Ordered, non-blocking mutations of a [`BanListStore`].
///
/// Inside a tokio runtime, queued mutations are drained by a single
/// `spawn_blocking` task at a time, so async workers never wait on file I/O.
/// Outside a runtime the caller drains the queue itself. Either way
/// mutations reach the file in submission order.
#[derive(Debug)]
pub struct BanListWriter {
    store: BanListStore,
    pending: Mutex<VecDeque<BanListOp>>,
    draining: AtomicBool,
}

impl BanListWriter {
    /// Wrap `store`.
    pub fn new(store: BanListStore) -> Arc<Self> {
        Arc::new(Self {
            store,
            pending: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &BanListStore {
        &self.store
    }

    /// Queue an append of `ip`.
    pub fn append(self: &Arc<Self>, ip: &str) {
        self.submit(BanListOp::Append(ip.to_string()));
    }

    /// Queue a removal of `ip`.
    pub fn remove(self: &Arc<Self>, ip: &str) {
        self.submit(BanListOp::Remove(ip.to_string()));
    }

    /// True when no mutation is queued or being written.
    pub fn is_idle(&self) -> bool {
        !self.draining.load(Ordering::Acquire) && self.pending.lock().is_empty()
    }

    fn submit(self: &Arc<Self>, op: BanListOp) {
        self.pending.lock().push_back(op);
        if self.draining.swap(true, Ordering::AcqRel) {
            // The active drainer picks it up
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let writer = Arc::clone(self);
                handle.spawn_blocking(move || writer.drain());
            }
            Err(_) => self.drain(),
        }
    }

    /// Caller holds the `draining` flag.
    fn drain(&self) {
        loop {
            while let Some(op) = self.next_op() {
                self.write(op);
            }
            self.draining.store(false, Ordering::Release);

            // An op pushed after the last pop but before the flag cleared
            if self.pending.lock().is_empty() || self.draining.swap(true, Ordering::AcqRel) {
                return;
            }
        }
    }

    fn next_op(&self) -> Option<BanListOp> {
        self.pending.lock().pop_front()
    }

    fn write(&self, op: BanListOp) {
        let result = match &op {
            BanListOp::Append(ip) => self.store.append(ip),
            BanListOp::Remove(ip) => self.store.remove(ip),
        };
        if let Err(e) = result {
            error!(?op, error = %e, "Failed to update ban list");
        }
    }
}
