//! The admission controller.
//!
//! One instance owns every piece of rate limiting state: per-IP and
//! per-address request histories, active bans, cycle tallies and the abuse
//! aggregate. A decision runs as a single critical section; ban persistence
//! and tx status reports are collected during the decision and performed
//! after the lock is released.

use crate::abuse::{AbuseAggregate, AbusedContract};
use crate::ban_list::{load_ip_list, BanListStore, BanListWriter};
use crate::counters::{CounterSnapshot, IpCount, RequestCounters};
use crate::history::RequestHistory;
use crate::tx_status::{NoopTxStatusReporter, TxStatus, TxStatusReporter};
use crate::{current_time_ms, Result};

use parking_lot::Mutex;
use rpcgate_config::AdmissionConfig;
use rpcgate_types::{decode_raw_transaction, DecodedTx, TxSummary};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The only method whose parameters are decoded.
pub const SEND_RAW_TRANSACTION: &str = "eth_sendRawTransaction";

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// The IP is banned
    Banned,
    /// The IP exceeded the hard per-IP cap
    IpHardCap,
    /// The IP exceeded the soft per-IP cap
    IpSoftCap,
    /// The transaction sender exceeded its cap
    SenderCap,
    /// The transaction recipient exceeded its cap
    RecipientCap,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Banned => write!(f, "IP banned"),
            RejectReason::IpHardCap => write!(f, "IP hard cap exceeded"),
            RejectReason::IpSoftCap => write!(f, "IP soft cap exceeded"),
            RejectReason::SenderCap => write!(f, "sender cap exceeded"),
            RejectReason::RecipientCap => write!(f, "recipient cap exceeded"),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Forward the request
    Accepted,
    /// Refuse the request
    Rejected(RejectReason),
}

impl AdmissionDecision {
    /// True for [`AdmissionDecision::Accepted`].
    pub fn is_accepted(&self) -> bool {
        matches!(self, AdmissionDecision::Accepted)
    }

    /// The rejection reason, if rejected.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            AdmissionDecision::Accepted => None,
            AdmissionDecision::Rejected(reason) => Some(*reason),
        }
    }
}

/// End-of-cycle report produced by
/// [`AdmissionController::log_and_reset_counters`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Tallies for the cycle, highest first
    pub counters: CounterSnapshot,
    /// Recipients that tripped their cap, highest first
    pub abuse: Vec<AbusedContract>,
    /// IPs whose submission tally reached the candidate threshold
    pub ban_candidates: Vec<IpCount>,
    /// Candidates banned by this report (only with `auto_ban`)
    pub banned: Vec<String>,
}

/// What a pruning pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    /// IPs still tracked afterwards
    pub ips_tracked: usize,
    /// Addresses still tracked afterwards
    pub addresses_tracked: usize,
    /// Timestamps dropped across both histories
    pub timestamps_dropped: usize,
    /// Bans that expired
    pub bans_expired: usize,
}

/// Point-in-time statistics.
#[derive(Debug, Clone, Default)]
pub struct AdmissionStats {
    /// IPs with a request history
    pub tracked_ips: usize,
    /// Addresses with a request history
    pub tracked_addresses: usize,
    /// Bans held in memory (expired ones linger until the next prune)
    pub banned_ips: usize,
    /// Size of the allow-list
    pub allow_listed_ips: usize,
    /// Requests checked since startup
    pub total_requests: u64,
    /// Requests rejected since startup
    pub total_rejected: u64,
}

#[derive(Debug, Default)]
struct AdmissionState {
    ip_history: RequestHistory,
    address_history: RequestHistory,
    /// IP -> ban timestamp (ms)
    bans: HashMap<String, u64>,
    counters: RequestCounters,
    abuse: AbuseAggregate,
}

impl AdmissionState {
    fn is_banned(&self, ip: &str, now_ms: u64, ban_duration_ms: u64) -> bool {
        self.bans
            .get(ip)
            .is_some_and(|banned_at| now_ms.saturating_sub(*banned_at) < ban_duration_ms)
    }
}

/// I/O collected inside the critical section.
#[derive(Debug, Default)]
struct SideEffects {
    reports: Vec<TxStatus>,
    bans: Vec<String>,
}

/// Per-IP and per-address admission control.
pub struct AdmissionController {
    config: AdmissionConfig,
    heavy_methods: HashSet<String>,
    allow_list: HashSet<String>,
    verbose: bool,
    record_tx_status: bool,
    reporter: Arc<dyn TxStatusReporter>,
    ban_store: Option<Arc<BanListWriter>>,
    state: Mutex<AdmissionState>,
    total_requests: AtomicU64,
    total_rejected: AtomicU64,
}

impl AdmissionController {
    /// Create a controller with no allow-list, no persistence and no tx
    /// status reporting.
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            heavy_methods: config.heavy_methods.iter().cloned().collect(),
            config,
            allow_list: HashSet::new(),
            verbose: false,
            record_tx_status: false,
            reporter: Arc::new(NoopTxStatusReporter),
            ban_store: None,
            state: Mutex::new(AdmissionState::default()),
            total_requests: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(AdmissionConfig::default())
    }

    /// Build from configuration, loading the allow-list and the durable ban
    /// list from the configured paths.
    ///
    /// Every IP in the ban list is banned as of now.
    pub fn from_config(config: &AdmissionConfig) -> Result<Self> {
        let allow_list = load_ip_list(Path::new(&config.allow_list_path))?;
        let store = BanListStore::new(&config.ban_list_path);
        let banned = store.load()?;

        info!(
            allow_listed = allow_list.len(),
            banned = banned.len(),
            "Loaded IP lists"
        );

        Ok(Self::new(config.clone())
            .with_allow_list(allow_list)
            .with_bans_at(banned, current_time_ms())
            .with_ban_store(store))
    }

    /// Exempt these IPs from admission control.
    pub fn with_allow_list<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_list.extend(ips.into_iter().map(Into::into));
        self
    }

    /// Ban these IPs as of `now_ms` without touching the durable list.
    pub fn with_bans_at<I, S>(mut self, ips: I, now_ms: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bans = &mut self.state.get_mut().bans;
        for ip in ips {
            bans.insert(ip.into(), now_ms);
        }
        self
    }

    /// Mirror new bans to `store`.
    pub fn with_ban_store(mut self, store: BanListStore) -> Self {
        self.ban_store = Some(BanListWriter::new(store));
        self
    }

    /// Report rate-limited transactions to `reporter`.
    pub fn with_tx_status_reporter(mut self, reporter: Arc<dyn TxStatusReporter>) -> Self {
        self.reporter = reporter;
        self.record_tx_status = true;
        self
    }

    /// Log every decision and the full cycle tallies at info level.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Writer for the durable ban list, if one is attached.
    pub fn ban_writer(&self) -> Option<&Arc<BanListWriter>> {
        self.ban_store.as_ref()
    }

    /// Admission parameters in use.
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Whether `ip` bypasses admission control.
    pub fn is_allow_listed(&self, ip: &str) -> bool {
        self.allow_list.contains(ip)
    }

    /// Whether `method` is rate limited.
    pub fn is_heavy(&self, method: &str) -> bool {
        self.heavy_methods.contains(method)
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Whether a request may be forwarded.
    pub fn is_request_okay(&self, ip: &str, method: &str, params: &[Value]) -> bool {
        self.check_request(ip, method, params).is_accepted()
    }

    /// [`is_request_okay`](Self::is_request_okay) at an explicit time.
    pub fn is_request_okay_at(&self, now_ms: u64, ip: &str, method: &str, params: &[Value]) -> bool {
        self.check_request_at(now_ms, ip, method, params).is_accepted()
    }

    /// Decide on a request, exposing the rejection reason.
    pub fn check_request(&self, ip: &str, method: &str, params: &[Value]) -> AdmissionDecision {
        self.check_request_at(current_time_ms(), ip, method, params)
    }

    /// [`check_request`](Self::check_request) at an explicit time.
    pub fn check_request_at(
        &self,
        now_ms: u64,
        ip: &str,
        method: &str,
        params: &[Value],
    ) -> AdmissionDecision {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if self.allow_list.contains(ip) {
            return AdmissionDecision::Accepted;
        }

        let mut effects = SideEffects::default();
        let decision = {
            let mut state = self.state.lock();
            self.decide(&mut state, now_ms, ip, method, params, &mut effects)
        };
        self.apply(effects);

        if let AdmissionDecision::Rejected(reason) = decision {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            if self.verbose {
                info!(%ip, %method, %reason, "Request rejected");
            }
        }
        decision
    }

    fn decide(
        &self,
        state: &mut AdmissionState,
        now_ms: u64,
        ip: &str,
        method: &str,
        params: &[Value],
        effects: &mut SideEffects,
    ) -> AdmissionDecision {
        let window = self.config.window_ms;
        state.counters.record_all(ip);

        if state.is_banned(ip, now_ms, self.config.ban_duration_ms) {
            debug!(%ip, %method, "Request from banned IP");
            return AdmissionDecision::Rejected(RejectReason::Banned);
        }

        if !self.is_heavy(method) {
            return AdmissionDecision::Accepted;
        }

        state.counters.record_heavy(ip);
        state.ip_history.record(ip, now_ms);

        if state
            .ip_history
            .exceeds(ip, self.config.ip_hard_lookback, window, now_ms)
        {
            warn!(%ip, %method, "IP exceeded hard request cap");
            if self.config.auto_ban {
                self.ban_locked(state, ip, now_ms, effects);
            }
            return AdmissionDecision::Rejected(RejectReason::IpHardCap);
        }

        let tx = decode_submission(method, params);

        if state
            .ip_history
            .exceeds(ip, self.config.ip_soft_lookback, window, now_ms)
        {
            debug!(%ip, %method, "IP exceeded soft request cap");
            self.queue_report(tx.as_ref(), effects);
            return AdmissionDecision::Rejected(RejectReason::IpSoftCap);
        }

        let Some(tx) = tx else {
            return AdmissionDecision::Accepted;
        };

        let sender = tx.from.to_lower_hex();
        let recipient = tx
            .to
            .map(|to| to.to_lower_hex())
            .filter(|to| *to != sender);

        state.address_history.record(&sender, now_ms);
        if let Some(recipient) = &recipient {
            state.address_history.record(recipient, now_ms);
        }

        let lookback = self.config.address_lookback;
        if state.address_history.exceeds(&sender, lookback, window, now_ms) {
            debug!(%ip, %sender, "Sender exceeded address cap");
            self.queue_report(Some(&tx), effects);
            return AdmissionDecision::Rejected(RejectReason::SenderCap);
        }

        if let Some(recipient) = &recipient {
            if state.address_history.exceeds(recipient, lookback, window, now_ms) {
                debug!(%ip, %sender, %recipient, "Recipient exceeded address cap");
                state.abuse.record(recipient, &sender, ip);
                self.queue_report(Some(&tx), effects);
                return AdmissionDecision::Rejected(RejectReason::RecipientCap);
            }
        }

        AdmissionDecision::Accepted
    }

    fn queue_report(&self, tx: Option<&TxSummary>, effects: &mut SideEffects) {
        if let (true, Some(tx)) = (self.record_tx_status, tx) {
            effects.reports.push(TxStatus::rate_limited(&tx.hash));
        }
    }

    /// Returns true when `ip` was not already under an active ban.
    fn ban_locked(
        &self,
        state: &mut AdmissionState,
        ip: &str,
        now_ms: u64,
        effects: &mut SideEffects,
    ) -> bool {
        let newly_banned = !state.is_banned(ip, now_ms, self.config.ban_duration_ms);
        state.bans.insert(ip.to_string(), now_ms);
        if newly_banned {
            warn!(%ip, duration_ms = self.config.ban_duration_ms, "IP banned");
            effects.bans.push(ip.to_string());
        }
        newly_banned
    }

    fn apply(&self, effects: SideEffects) {
        for status in effects.reports {
            self.reporter.report(status);
        }

        let Some(store) = &self.ban_store else {
            return;
        };
        for ip in effects.bans {
            store.append(&ip);
        }
    }

    // -------------------------------------------------------------------------
    // Side channels
    // -------------------------------------------------------------------------

    /// Track a heavy request from `ip` now.
    pub fn add_heavy_request(&self, ip: &str) {
        self.add_heavy_request_at(current_time_ms(), ip);
    }

    /// Track a heavy request from `ip` at `now_ms`.
    pub fn add_heavy_request_at(&self, now_ms: u64, ip: &str) {
        let mut state = self.state.lock();
        state.counters.record_heavy(ip);
        state.ip_history.record(ip, now_ms);
    }

    /// Track a transaction touching `address` now.
    pub fn add_heavy_address(&self, address: &str) {
        self.add_heavy_address_at(current_time_ms(), address);
    }

    /// Track a transaction touching `address` at `now_ms`.
    pub fn add_heavy_address_at(&self, now_ms: u64, address: &str) {
        let key = address.to_ascii_lowercase();
        self.state.lock().address_history.record(&key, now_ms);
    }

    /// Record that `sender` tripped the cap of `contract` from `ip`.
    pub fn add_abused_address(&self, contract: &str, sender: &str, ip: &str) {
        self.state.lock().abuse.record(
            &contract.to_ascii_lowercase(),
            &sender.to_ascii_lowercase(),
            ip,
        );
    }

    /// Count any request from `ip`.
    pub fn add_all_request(&self, ip: &str) {
        self.state.lock().counters.record_all(ip);
    }

    // -------------------------------------------------------------------------
    // Bans
    // -------------------------------------------------------------------------

    /// Ban `ip` now and mirror it to the durable list.
    pub fn ban(&self, ip: &str) {
        self.ban_at(current_time_ms(), ip);
    }

    /// Ban `ip` as of `now_ms`.
    pub fn ban_at(&self, now_ms: u64, ip: &str) {
        let mut effects = SideEffects::default();
        {
            let mut state = self.state.lock();
            self.ban_locked(&mut state, ip, now_ms, &mut effects);
        }
        self.apply(effects);
    }

    /// Lift a ban and forget the IP's history.
    pub fn unban(&self, ip: &str) {
        let removed = {
            let mut state = self.state.lock();
            state.ip_history.remove(ip);
            state.bans.remove(ip).is_some()
        };

        if let Some(store) = &self.ban_store {
            store.remove(ip);
        }
        if removed {
            info!(%ip, "IP unbanned");
        }
    }

    /// Whether `ip` is under an active ban now.
    pub fn is_ip_banned(&self, ip: &str) -> bool {
        self.is_ip_banned_at(current_time_ms(), ip)
    }

    /// Whether `ip` is under an active ban at `now_ms`.
    pub fn is_ip_banned_at(&self, now_ms: u64, ip: &str) -> bool {
        self.state
            .lock()
            .is_banned(ip, now_ms, self.config.ban_duration_ms)
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Prune histories and drop expired bans.
    pub fn clear_old_ips(&self) -> PruneSummary {
        self.clear_old_ips_at(current_time_ms())
    }

    /// [`clear_old_ips`](Self::clear_old_ips) at an explicit time.
    pub fn clear_old_ips_at(&self, now_ms: u64) -> PruneSummary {
        let window = self.config.window_ms;
        let ban_duration = self.config.ban_duration_ms;

        let summary = {
            let mut state = self.state.lock();

            for (ip, len) in state.ip_history.lengths() {
                if self.verbose {
                    info!(%ip, requests = len, "IP request history");
                } else {
                    debug!(%ip, requests = len, "IP request history");
                }
            }

            let mut timestamps_dropped = state.ip_history.prune(now_ms, window);
            timestamps_dropped += state.address_history.prune(now_ms, window);

            let bans_before = state.bans.len();
            state
                .bans
                .retain(|_, banned_at| now_ms.saturating_sub(*banned_at) < ban_duration);

            PruneSummary {
                ips_tracked: state.ip_history.key_count(),
                addresses_tracked: state.address_history.key_count(),
                timestamps_dropped,
                bans_expired: bans_before - state.bans.len(),
            }
        };

        debug!(
            ips = summary.ips_tracked,
            addresses = summary.addresses_tracked,
            dropped = summary.timestamps_dropped,
            bans_expired = summary.bans_expired,
            "Admission state pruned"
        );
        summary
    }

    /// Report the cycle's tallies and abuse, flag ban candidates and reset.
    pub fn log_and_reset_counters(&self) -> CycleReport {
        self.log_and_reset_counters_at(current_time_ms())
    }

    /// [`log_and_reset_counters`](Self::log_and_reset_counters) at an
    /// explicit time. Bans issued by this call are stamped with `now_ms`.
    pub fn log_and_reset_counters_at(&self, now_ms: u64) -> CycleReport {
        let mut effects = SideEffects::default();

        let report = {
            let mut state = self.state.lock();
            let counters = std::mem::take(&mut state.counters);
            let abuse = std::mem::take(&mut state.abuse);

            let ban_candidates: Vec<IpCount> = counters
                .ips_over(self.config.ban_candidate_threshold)
                .into_iter()
                .filter(|candidate| !self.allow_list.contains(&candidate.ip))
                .collect();

            let mut banned = Vec::new();
            if self.config.auto_ban {
                for candidate in &ban_candidates {
                    if self.ban_locked(&mut state, &candidate.ip, now_ms, &mut effects) {
                        banned.push(candidate.ip.clone());
                    }
                }
            }

            CycleReport {
                counters: counters.snapshot(),
                abuse: abuse.report(),
                ban_candidates,
                banned,
            }
        };

        self.apply(effects);
        self.log_report(&report);
        report
    }

    fn log_report(&self, report: &CycleReport) {
        let sum = |counts: &[IpCount]| counts.iter().map(|c| c.count).sum::<u64>();

        info!(
            ips = report.counters.all_requests.len(),
            requests = sum(&report.counters.all_requests),
            heavy = sum(&report.counters.heavy_requests),
            txs = sum(&report.counters.total_txs),
            "Request counters"
        );

        for tally in &report.counters.total_txs {
            if self.verbose {
                info!(ip = %tally.ip, txs = tally.count, "Transactions by IP");
            } else {
                debug!(ip = %tally.ip, txs = tally.count, "Transactions by IP");
            }
        }
        for tally in &report.counters.all_requests {
            if self.verbose {
                info!(ip = %tally.ip, requests = tally.count, "Requests by IP");
            } else {
                debug!(ip = %tally.ip, requests = tally.count, "Requests by IP");
            }
        }

        for contract in &report.abuse {
            info!(
                contract = %contract.contract,
                rejections = contract.count,
                senders = contract.callers.len(),
                "Abused recipient"
            );
            for caller in &contract.callers {
                info!(
                    contract = %contract.contract,
                    sender = %caller.address,
                    rejections = caller.count,
                    ips = ?caller.ips,
                    "Abusive sender"
                );
            }
        }

        for candidate in &report.ban_candidates {
            warn!(ip = %candidate.ip, txs = candidate.count, "Ban candidate");
        }
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Timestamps tracked for `ip`.
    pub fn ip_history_len(&self, ip: &str) -> usize {
        self.state.lock().ip_history.len_of(ip)
    }

    /// Timestamps tracked for `address`.
    pub fn address_history_len(&self, address: &str) -> usize {
        self.state
            .lock()
            .address_history
            .len_of(&address.to_ascii_lowercase())
    }

    /// Get statistics
    pub fn stats(&self) -> AdmissionStats {
        let state = self.state.lock();
        AdmissionStats {
            tracked_ips: state.ip_history.key_count(),
            tracked_addresses: state.address_history.key_count(),
            banned_ips: state.bans.len(),
            allow_listed_ips: self.allow_list.len(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Decode `params[0]` of a raw transaction submission.
///
/// Anything that cannot be decoded yields `None`; per-address limits are then
/// skipped for the request.
fn decode_submission(method: &str, params: &[Value]) -> Option<TxSummary> {
    if method != SEND_RAW_TRANSACTION {
        return None;
    }
    let raw = params.first()?.as_str()?;
    match decode_raw_transaction(raw) {
        DecodedTx::DecodeFailure(reason) => {
            debug!(%reason, "Could not decode raw transaction");
            None
        }
        decoded => decoded.into_summary(),
    }
}
