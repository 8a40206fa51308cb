//! Tests for Config module

use rpcgate_config::{AdmissionConfig, Config, ConfigError, DispatcherConfig, IpInfo, ScheduleConfig};
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.admission.window_ms, 60_000);
    assert_eq!(config.admission.ip_hard_lookback, 61);
    assert_eq!(config.admission.ip_soft_lookback, 10);
    assert_eq!(config.admission.address_lookback, 10);
    assert_eq!(config.admission.ban_duration(), Duration::from_secs(3600));
    assert_eq!(config.dispatcher.max_retries, 5);
    assert_eq!(config.schedule.prune_interval(), Duration::from_secs(60));
    assert_eq!(config.schedule.report_interval(), Duration::from_secs(300));
    assert!(!config.admission.auto_ban);
    assert!(!config.gateway.dynamic_consensor_node);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = Config::from_str(
        r#"
        [gateway]
        dynamic_consensor_node = true
        use_config_node_ip = true

        [archiver_ip_info]
        external_ip = "198.51.100.4"
        external_port = 4000

        [admission]
        auto_ban = true
        "#,
    )
    .unwrap();

    assert!(config.gateway.dynamic_consensor_node);
    assert!(config.gateway.use_config_node_ip);
    assert!(config.admission.auto_ban);
    assert_eq!(config.admission.ip_soft_lookback, 10);
    assert_eq!(config.node_ip_info, IpInfo::default());
    assert_eq!(config.archiver_url(), "http://198.51.100.4:4000");
}

#[test]
fn test_invalid_port_rejected() {
    let result = Config::from_str(
        r#"
        [node_ip_info]
        external_ip = "10.0.0.1"
        external_port = 0
        "#,
    );
    assert!(matches!(
        result,
        Err(ConfigError::InvalidPort { section: "node_ip_info" })
    ));
}

#[test]
fn test_zero_lookback_rejected() {
    let config = AdmissionConfig {
        ip_soft_lookback: 0,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidLookback { name: "ip_soft_lookback", value: 0 })
    ));
}

#[test]
fn test_empty_heavy_methods_rejected() {
    let config = AdmissionConfig {
        heavy_methods: vec![],
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::NoHeavyMethods)));
}

#[test]
fn test_backoff_bounds_checked() {
    let config = DispatcherConfig {
        backoff_min_ms: 5_000,
        backoff_max_ms: 1_000,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidBackoff { min: 5_000, max: 1_000 })
    ));
}

#[test]
fn test_zero_request_timeout_rejected() {
    let config = DispatcherConfig {
        request_timeout_ms: 0,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidRequestTimeout)));

    let toml = "[dispatcher]\nrequest_timeout_ms = 0\n";
    assert!(matches!(
        Config::from_str(toml),
        Err(ConfigError::InvalidRequestTimeout)
    ));
}

#[test]
fn test_zero_interval_rejected() {
    let config = ScheduleConfig {
        report_interval_secs: 0,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidInterval { name: "report_interval_secs" })
    ));
}

#[test]
fn test_invalid_log_format_rejected() {
    let result = Config::from_str(
        r#"
        [logging]
        level = "info"
        format = "xml"
        "#,
    );
    assert!(matches!(result, Err(ConfigError::InvalidLogFormat(_))));
}

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rpcgate.toml");

    let mut config = Config::default();
    config.gateway.record_tx_status = true;
    config.gateway.tx_status_url = Some("http://127.0.0.1:3000/tx-status".to_string());
    config.admission.heavy_methods.push("eth_call".to_string());
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert!(loaded.gateway.record_tx_status);
    assert_eq!(loaded.gateway.tx_status_url, config.gateway.tx_status_url);
    assert_eq!(loaded.admission.heavy_methods.len(), 3);
}

#[test]
fn test_load_missing_file() {
    let result = Config::load(std::path::Path::new("/nonexistent/rpcgate.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead { .. })));
}
