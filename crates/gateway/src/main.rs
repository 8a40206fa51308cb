//! # RPC Gate
//!
//! Entry point for the gateway process: loads `rpcgate.toml`, installs the
//! tracing subscriber, builds the [`Gateway`], fetches the initial node list
//! and runs the maintenance tasks until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use rpcgate::{tx_status_reporter, Gateway};
use rpcgate_config::Config;
use rpcgate_upstream::{RefreshOutcome, SelectionMode};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose level follows `gateway.verbose`.
const GATEWAY_TARGETS: [&str; 3] = ["rpcgate", "rpcgate_admission", "rpcgate_upstream"];

/// JSON-RPC gateway with admission control
#[derive(Parser, Debug)]
#[command(name = "rpcgate")]
#[command(author = "RPC Gate Team")]
#[command(version)]
#[command(about = "JSON-RPC gateway - per-IP and per-address rate limiting in front of a node pool")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "rpcgate.toml")]
    config: PathBuf,

    /// Enable verbose logging (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format: text, json, or compact (overrides config)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
    Compact,
}

impl LogFormat {
    fn from_config(format: &str) -> Self {
        match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Text,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let config = if config_found {
        Config::load(&cli.config)
            .with_context(|| format!("failed to load config from {}", cli.config.display()))?
    } else {
        Config::default()
    };

    init_tracing(&cli, &config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting RPC Gate");
    if !config_found {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (reporter, reporter_task) = tx_status_reporter(&config, &shutdown_tx)?;
    let gateway = Gateway::from_config(&config, reporter)?;

    if matches!(gateway.selector().mode(), SelectionMode::Dynamic { .. }) {
        match gateway.directory().refresh().await {
            RefreshOutcome::Updated(nodes) => info!(nodes, "Initial node list loaded"),
            outcome => warn!(?outcome, "No initial node list, using configured node"),
        }
    }

    let mut handles = gateway.spawn_maintenance(&config.schedule, &shutdown_tx);
    handles.extend(reporter_task);

    info!(
        node = %gateway.selector().active(),
        allow_listed = gateway.admission().stats().allow_listed_ips,
        banned = gateway.admission().stats().banned_ips,
        "RPC Gate running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, initiating shutdown");

    let _ = shutdown_tx.send(());

    let timeout = Duration::from_secs(30);
    for handle in handles {
        match tokio::time::timeout(timeout, handle).await {
            Ok(_) => debug!("Background task stopped"),
            Err(_) => warn!("Background task shutdown timed out"),
        }
    }

    let report = gateway.admission().log_and_reset_counters();
    debug!(candidates = report.ban_candidates.len(), "Final counter report");

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(cli: &Cli, config: &Config) -> Result<()> {
    let level = config.logging.level.to_lowercase();
    let gateway_level = if config.gateway.verbose { "debug" } else { level.as_str() };

    let filter = match cli.verbose {
        0 => GATEWAY_TARGETS
            .iter()
            .fold(level.clone(), |acc, target| format!("{},{}={}", acc, target, gateway_level)),
        1 => GATEWAY_TARGETS
            .iter()
            .fold("info".to_string(), |acc, target| format!("{},{}=debug", acc, target)),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_config(&config.logging.format));

    match format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true))
                .with(env_filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(env_filter)
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(fmt::layer().compact())
                .with(env_filter)
                .init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from(["rpcgate", "-c", "gate.toml", "-vv", "--log-format", "json"]);
        assert_eq!(cli.config, PathBuf::from("gate.toml"));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, Some(LogFormat::Json)));
    }

    #[test]
    fn test_log_format_from_config() {
        assert!(matches!(LogFormat::from_config("JSON"), LogFormat::Json));
        assert!(matches!(LogFormat::from_config("compact"), LogFormat::Compact));
        assert!(matches!(LogFormat::from_config("text"), LogFormat::Text));
    }
}
