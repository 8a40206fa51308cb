//! Main configuration module for RPC Gate
//!
//! All gateway settings live in one `rpcgate.toml` file. Every section has a
//! `Default`, so a file only needs to name the values it changes.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration struct containing all RPC Gate settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Gateway behaviour switches
    pub gateway: GatewayConfig,

    /// Archiver (node directory) address
    pub archiver_ip_info: IpInfo,

    /// Static upstream node address
    pub node_ip_info: IpInfo,

    /// Rate limiting and ban parameters
    pub admission: AdmissionConfig,

    /// Upstream retry parameters
    pub dispatcher: DispatcherConfig,

    /// Background task intervals
    pub schedule: ScheduleConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use rpcgate_config::Config;
    /// use std::path::Path;
    ///
    /// let config = Config::load(Path::new("rpcgate.toml"))?;
    /// ```
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!("Loading configuration from {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config = Self::from_str(&content)?;

        info!(
            archiver = %config.archiver_url(),
            dynamic_node = config.gateway.dynamic_consensor_node,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Load configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        debug!("Configuration parsed successfully, validating...");
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.archiver_ip_info.validate("archiver_ip_info")?;
        self.node_ip_info.validate("node_ip_info")?;
        self.admission.validate()?;
        self.dispatcher.validate()?;
        self.schedule.validate()?;
        self.logging.validate()?;

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    /// Base URL of the archiver that serves the node list.
    ///
    /// With `ask_local_host_for_archiver` the archiver is expected on this
    /// host, so the configured external IP is replaced by `127.0.0.1`.
    pub fn archiver_url(&self) -> String {
        let host = if self.gateway.ask_local_host_for_archiver {
            "127.0.0.1"
        } else {
            self.archiver_ip_info.external_ip.as_str()
        };
        format!("http://{}:{}", host, self.archiver_ip_info.external_port)
    }
}

// =============================================================================
// Gateway Configuration
// =============================================================================

/// Gateway behaviour switches.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Log every admission decision and node rotation
    pub verbose: bool,

    /// Rotate across the archiver's node list instead of the static node
    pub dynamic_consensor_node: bool,

    /// Replace private/local node IPs with `node_ip_info.external_ip`
    pub use_config_node_ip: bool,

    /// Query the archiver on localhost instead of its external IP
    pub ask_local_host_for_archiver: bool,

    /// Report rate-limited transactions to the tx status collaborator
    pub record_tx_status: bool,

    /// Endpoint that receives tx status reports; logged only when unset
    pub tx_status_url: Option<String>,
}

// =============================================================================
// Address Configuration
// =============================================================================

/// An externally reachable host and port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInfo {
    /// Host or IP address
    pub external_ip: String,

    /// TCP port
    pub external_port: u16,
}

impl IpInfo {
    /// Creates a new address entry.
    pub fn new(external_ip: impl Into<String>, external_port: u16) -> Self {
        Self {
            external_ip: external_ip.into(),
            external_port,
        }
    }

    fn validate(&self, section: &'static str) -> ConfigResult<()> {
        if self.external_ip.trim().is_empty() {
            return Err(ConfigError::EmptyHost { section });
        }
        if self.external_port == 0 {
            return Err(ConfigError::InvalidPort { section });
        }
        Ok(())
    }
}

impl Default for IpInfo {
    fn default() -> Self {
        Self::new("localhost", 9001)
    }
}

// =============================================================================
// Admission Configuration
// =============================================================================

/// Rate limiting and ban parameters.
///
/// Lookbacks are counts: a request is rejected when the N-th most recent
/// tracked timestamp for its key is younger than `window_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Sliding window length in milliseconds
    pub window_ms: u64,

    /// Per-IP hard cap lookback (61 means "more than 60 per window")
    pub ip_hard_lookback: usize,

    /// Per-IP soft cap lookback
    pub ip_soft_lookback: usize,

    /// Per-address lookback, applied to senders and recipients
    pub address_lookback: usize,

    /// How long a ban lasts in milliseconds
    pub ban_duration_ms: u64,

    /// Heavy requests per reporting cycle that flag an IP as a ban candidate
    pub ban_candidate_threshold: u64,

    /// Ban candidates and hard-cap offenders automatically
    pub auto_ban: bool,

    /// Methods subject to rate limiting
    pub heavy_methods: Vec<String>,

    /// JSON array of IPs that bypass admission control
    pub allow_list_path: String,

    /// JSON array of banned IPs, appended to on every ban
    pub ban_list_path: String,
}

impl AdmissionConfig {
    /// Sliding window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Ban duration as a duration.
    pub fn ban_duration(&self) -> Duration {
        Duration::from_millis(self.ban_duration_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.window_ms == 0 {
            return Err(ConfigError::InvalidWindow);
        }

        for (name, value) in [
            ("ip_hard_lookback", self.ip_hard_lookback),
            ("ip_soft_lookback", self.ip_soft_lookback),
            ("address_lookback", self.address_lookback),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidLookback { name, value });
            }
        }

        if self.ban_duration_ms == 0 {
            return Err(ConfigError::InvalidBanDuration);
        }

        if self.heavy_methods.is_empty() {
            return Err(ConfigError::NoHeavyMethods);
        }

        Ok(())
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            ip_hard_lookback: 61,
            ip_soft_lookback: 10,
            address_lookback: 10,
            ban_duration_ms: 3_600_000, // 1 hour
            ban_candidate_threshold: 20,
            auto_ban: false,
            heavy_methods: vec![
                "eth_sendRawTransaction".to_string(),
                "eth_sendTransaction".to_string(),
            ],
            allow_list_path: "whitelist.json".to_string(),
            ban_list_path: "blacklist.json".to_string(),
        }
    }
}

// =============================================================================
// Dispatcher Configuration
// =============================================================================

/// Upstream retry parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Lower bound of the randomized wait between attempts
    pub backoff_min_ms: u64,

    /// Upper bound of the randomized wait between attempts
    pub backoff_max_ms: u64,

    /// Per-request transport timeout
    pub request_timeout_ms: u64,
}

impl DispatcherConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.backoff_min_ms > self.backoff_max_ms {
            return Err(ConfigError::InvalidBackoff {
                min: self.backoff_min_ms,
                max: self.backoff_max_ms,
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidRequestTimeout);
        }
        Ok(())
    }

    /// Per-request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_min_ms: 1_000,
            backoff_max_ms: 5_000,
            request_timeout_ms: 10_000,
        }
    }
}

// =============================================================================
// Schedule Configuration
// =============================================================================

/// Background task intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// History pruning and ban expiry
    pub prune_interval_secs: u64,

    /// Counter report and reset
    pub report_interval_secs: u64,

    /// Node list refresh
    pub directory_refresh_interval_secs: u64,
}

impl ScheduleConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        for (name, value) in [
            ("prune_interval_secs", self.prune_interval_secs),
            ("report_interval_secs", self.report_interval_secs),
            ("directory_refresh_interval_secs", self.directory_refresh_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidInterval { name });
            }
        }
        Ok(())
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn directory_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.directory_refresh_interval_secs)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            prune_interval_secs: 60,
            report_interval_secs: 300,
            directory_refresh_interval_secs: 60,
        }
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json, compact)
    pub format: String,
}

impl LoggingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.level.clone()));
        }

        let valid_formats = ["text", "json", "compact"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.format.clone()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
