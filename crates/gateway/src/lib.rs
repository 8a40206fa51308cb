//! # RPC Gate
//!
//! Admission control and upstream node selection for a JSON-RPC proxy that
//! fronts a pool of consensus nodes.
//!
//! [`Gateway`] ties the pieces together: every inbound call is checked by the
//! [`AdmissionController`], accepted calls are forwarded by the
//! [`RetryingDispatcher`] to the node chosen by the [`NodeSelector`], and the
//! [`NodeDirectory`] is refreshed from the archiver in the background.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rpcgate::Gateway;
//! use rpcgate_config::Config;
//! use serde_json::json;
//!
//! let gateway = Gateway::from_config(&Config::default(), None)?;
//! let request = json!({"jsonrpc": "2.0", "id": 1, "method": "eth_chainId", "params": []});
//! if let Some(response) = gateway.handle("203.0.113.9", &request).await {
//!     println!("{:?}", response.data);
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

use anyhow::Result;
use rpcgate_admission::{
    spawn_pruner, spawn_reporter, AdmissionController, HttpTxStatusReporter,
    LoggingTxStatusReporter, TxStatusReporter,
};
use rpcgate_config::{Config, ScheduleConfig};
use rpcgate_upstream::{
    spawn_directory_refresher, ArchiverDirectorySource, HttpMethod, NodeDirectory, NodeRecord,
    NodeSelector, ReqwestTransport, RetryingDispatcher, SelectionMode, UpstreamResponse,
};
use rpcgate_types::int_string_to_hex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use rpcgate_admission as admission;
pub use rpcgate_config as config;
pub use rpcgate_types as types;
pub use rpcgate_upstream as upstream;

/// Queued tx status reports before new ones are dropped.
const TX_STATUS_QUEUE: usize = 1024;

/// The admission and upstream halves of the proxy.
pub struct Gateway {
    admission: Arc<AdmissionController>,
    directory: Arc<NodeDirectory>,
    selector: Arc<NodeSelector>,
    dispatcher: Arc<RetryingDispatcher>,
}

impl Gateway {
    /// Assemble a gateway from its parts.
    pub fn new(
        admission: Arc<AdmissionController>,
        directory: Arc<NodeDirectory>,
        selector: Arc<NodeSelector>,
        dispatcher: Arc<RetryingDispatcher>,
    ) -> Self {
        Self {
            admission,
            directory,
            selector,
            dispatcher,
        }
    }

    /// Build every component from configuration.
    ///
    /// IP lists are loaded from disk. `tx_status` receives rate-limit reports
    /// when `gateway.record_tx_status` is set; without one, reports are
    /// logged.
    pub fn from_config(
        config: &Config,
        tx_status: Option<Arc<dyn TxStatusReporter>>,
    ) -> Result<Self> {
        let mut admission =
            AdmissionController::from_config(&config.admission)?.with_verbose(config.gateway.verbose);
        if config.gateway.record_tx_status {
            let reporter =
                tx_status.unwrap_or_else(|| Arc::new(LoggingTxStatusReporter) as Arc<dyn TxStatusReporter>);
            admission = admission.with_tx_status_reporter(reporter);
        }

        let client = reqwest::Client::builder()
            .timeout(config.dispatcher.request_timeout())
            .build()?;

        let source = ArchiverDirectorySource::new(client.clone(), config.archiver_url());
        let directory = Arc::new(NodeDirectory::new(Arc::new(source)));

        let mode = if config.gateway.dynamic_consensor_node {
            SelectionMode::dynamic(config.gateway.use_config_node_ip)
        } else {
            SelectionMode::Static
        };
        let configured = NodeRecord::new(
            config.node_ip_info.external_ip.clone(),
            config.node_ip_info.external_port,
        );
        let selector = Arc::new(NodeSelector::new(directory.clone(), mode, configured));

        let transport = Arc::new(ReqwestTransport::with_client(client));
        let dispatcher = Arc::new(RetryingDispatcher::new(transport, &config.dispatcher));

        info!(
            archiver = %config.archiver_url(),
            mode = ?mode,
            "Gateway assembled"
        );

        Ok(Self::new(Arc::new(admission), directory, selector, dispatcher))
    }

    /// The admission controller.
    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// The node directory.
    pub fn directory(&self) -> &Arc<NodeDirectory> {
        &self.directory
    }

    /// The node selector.
    pub fn selector(&self) -> &Arc<NodeSelector> {
        &self.selector
    }

    /// The upstream dispatcher.
    pub fn dispatcher(&self) -> &Arc<RetryingDispatcher> {
        &self.dispatcher
    }

    /// Admission check for one call.
    pub fn admit(&self, ip: &str, method: &str, params: &[Value]) -> bool {
        self.admission.is_request_okay(ip, method, params)
    }

    /// POST a JSON-RPC body to the active node.
    pub async fn forward(&self, request: &Value) -> UpstreamResponse {
        let url = self.selector.base_url();
        self.dispatcher.call(HttpMethod::Post, &url, Some(request)).await
    }

    /// Admit and forward a JSON-RPC request. `None` when rejected.
    pub async fn handle(&self, ip: &str, request: &Value) -> Option<UpstreamResponse> {
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let params = request
            .get("params")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        if !self.admit(ip, method, params) {
            debug!(%ip, %method, "Request not admitted");
            return None;
        }
        Some(self.forward(request).await)
    }

    /// Account state from the active node.
    pub async fn get_account(&self, address: &str) -> Option<Value> {
        let url = self.selector.base_url();
        self.dispatcher.fetch_account(&url, address).await
    }

    /// Account balance as a `0x` hex quantity.
    ///
    /// Nodes report balances as base-10 strings or numbers; hex strings pass
    /// through unchanged.
    pub async fn get_balance(&self, address: &str) -> Option<String> {
        let account = self.get_account(address).await?;
        let balance = match account.get("balance")? {
            Value::String(s) if s.starts_with("0x") => return Some(s.clone()),
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };

        match int_string_to_hex(&balance) {
            Ok(hex) => Some(hex),
            Err(e) => {
                warn!(%address, %balance, error = %e, "Unreadable account balance");
                None
            }
        }
    }

    /// Start the pruner, the counter reporter and, in dynamic mode, the
    /// directory refresher.
    pub fn spawn_maintenance(
        &self,
        schedule: &ScheduleConfig,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            spawn_pruner(
                self.admission.clone(),
                schedule.prune_interval(),
                shutdown_tx.subscribe(),
            ),
            spawn_reporter(
                self.admission.clone(),
                schedule.report_interval(),
                shutdown_tx.subscribe(),
            ),
        ];

        if matches!(self.selector.mode(), SelectionMode::Dynamic { .. }) {
            handles.push(spawn_directory_refresher(
                self.directory.clone(),
                schedule.directory_refresh_interval(),
                shutdown_tx.subscribe(),
            ));
        }
        handles
    }
}

/// The tx status reporter the configuration asks for.
///
/// `None` when reporting is off. With `tx_status_url` set, reports are POSTed
/// by a background task whose handle is returned alongside.
pub fn tx_status_reporter(
    config: &Config,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<(Option<Arc<dyn TxStatusReporter>>, Option<JoinHandle<()>>)> {
    if !config.gateway.record_tx_status {
        return Ok((None, None));
    }

    match &config.gateway.tx_status_url {
        Some(url) => {
            let client = reqwest::Client::builder()
                .timeout(config.dispatcher.request_timeout())
                .build()?;
            let (reporter, task) = HttpTxStatusReporter::spawn(
                client,
                url.clone(),
                TX_STATUS_QUEUE,
                shutdown_tx.subscribe(),
            );
            info!(%url, "Reporting rejected transactions");
            let reporter: Arc<dyn TxStatusReporter> = Arc::new(reporter);
            Ok((Some(reporter), Some(task)))
        }
        None => {
            let reporter: Arc<dyn TxStatusReporter> = Arc::new(LoggingTxStatusReporter);
            Ok((Some(reporter), None))
        }
    }
}
