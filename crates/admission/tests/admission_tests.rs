//! Admission decisions over whole request sequences

use rpcgate_admission::{
    AdmissionController, AdmissionDecision, BanListStore, MemoryTxStatusReporter, RejectReason,
    RATE_LIMIT_REASON,
};
use rpcgate_config::AdmissionConfig;
use rpcgate_types::testing::{address_of, sign_legacy, test_key, to_hex_param, TestTx};
use rpcgate_types::{Address, H256};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

const SEND_RAW: &str = "eth_sendRawTransaction";
const SEND: &str = "eth_sendTransaction";

fn contract() -> Address {
    Address::from_hex("0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb1").unwrap()
}

/// Signed transfer to the test contract, as JSON-RPC params.
fn raw_tx_params(key_seed: u8, nonce: u64) -> (Vec<Value>, H256) {
    let raw = sign_legacy(&test_key(key_seed), &TestTx::transfer(contract(), nonce), true);
    (vec![json!(to_hex_param(&raw))], H256::keccak256(&raw))
}

fn reject_reason(decision: AdmissionDecision) -> Option<RejectReason> {
    decision.reject_reason()
}

#[test]
fn test_allow_listed_ip_always_accepted() {
    let controller = AdmissionController::with_defaults().with_allow_list(["127.0.0.1"]);

    for _ in 0..200 {
        assert!(controller.is_request_okay_at(0, "127.0.0.1", SEND, &[]));
    }
    assert_eq!(controller.ip_history_len("127.0.0.1"), 0);
    assert_eq!(controller.stats().tracked_ips, 0);
}

#[test]
fn test_allow_list_beats_ban() {
    let controller = AdmissionController::with_defaults()
        .with_allow_list(["127.0.0.1"])
        .with_bans_at(["127.0.0.1"], 0);

    assert!(controller.is_request_okay_at(1, "127.0.0.1", "eth_chainId", &[]));
}

#[test]
fn test_banned_ip_always_rejected() {
    let controller = AdmissionController::with_defaults();
    controller.ban_at(1_000, "10.0.0.1");

    for method in ["eth_chainId", "eth_getBalance", SEND, SEND_RAW] {
        assert_eq!(
            reject_reason(controller.check_request_at(2_000, "10.0.0.1", method, &[])),
            Some(RejectReason::Banned)
        );
    }
    assert!(controller.is_request_okay_at(2_000, "10.0.0.2", SEND, &[]));
}

#[test]
fn test_tenth_heavy_request_within_window_rejected() {
    let controller = AdmissionController::with_defaults();

    for i in 0..9u64 {
        assert!(controller.is_request_okay_at(i * 6_000, "10.0.0.1", SEND, &[]));
    }
    assert_eq!(
        reject_reason(controller.check_request_at(59_000, "10.0.0.1", SEND, &[])),
        Some(RejectReason::IpSoftCap)
    );
}

#[test]
fn test_tenth_heavy_request_after_window_accepted() {
    let controller = AdmissionController::with_defaults();

    // 9 * 6_667 = 60_003 ms after the first
    for i in 0..10u64 {
        assert!(controller.is_request_okay_at(i * 6_667, "10.0.0.1", SEND, &[]));
    }
}

#[test]
fn test_hard_cap_is_independent_of_soft_cap() {
    let config = AdmissionConfig {
        ip_soft_lookback: 1_000,
        ..Default::default()
    };
    let controller = AdmissionController::new(config);

    for i in 0..60u64 {
        assert!(controller.is_request_okay_at(i * 100, "10.0.0.1", SEND, &[]));
    }
    assert_eq!(
        reject_reason(controller.check_request_at(6_000, "10.0.0.1", SEND, &[])),
        Some(RejectReason::IpHardCap)
    );
    // Detection only: no ban without auto_ban
    assert!(!controller.is_ip_banned_at(6_000, "10.0.0.1"));
}

#[test]
fn test_hard_cap_bans_with_auto_ban() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blacklist.json");
    let config = AdmissionConfig {
        ip_soft_lookback: 1_000,
        auto_ban: true,
        ..Default::default()
    };
    let controller = AdmissionController::new(config).with_ban_store(BanListStore::new(&path));

    for i in 0..61u64 {
        controller.check_request_at(i, "10.0.0.1", SEND, &[]);
    }

    assert!(controller.is_ip_banned_at(100, "10.0.0.1"));
    assert_eq!(
        reject_reason(controller.check_request_at(100, "10.0.0.1", "eth_chainId", &[])),
        Some(RejectReason::Banned)
    );
    assert_eq!(BanListStore::new(&path).load().unwrap(), vec!["10.0.0.1"]);
}

#[test]
fn test_clear_old_ips_prunes_history() {
    let controller = AdmissionController::with_defaults();
    for ts in [0, 1_000, 2_000, 3_000] {
        controller.add_heavy_request_at(ts, "10.0.0.1");
    }
    for ts in [70_000, 80_000] {
        controller.add_heavy_request_at(ts, "10.0.0.1");
    }
    controller.add_heavy_request_at(0, "10.0.0.2");
    controller.add_heavy_address_at(0, "0xAbC");

    let summary = controller.clear_old_ips_at(100_000);

    // Two recent entries plus one of slack
    assert_eq!(controller.ip_history_len("10.0.0.1"), 3);
    assert_eq!(controller.ip_history_len("10.0.0.2"), 0);
    assert_eq!(controller.address_history_len("0xabc"), 0);
    assert_eq!(summary.ips_tracked, 1);
    assert_eq!(summary.addresses_tracked, 0);
    assert_eq!(summary.timestamps_dropped, 5);
}

#[test]
fn test_clear_old_ips_expires_bans() {
    let controller = AdmissionController::with_defaults();
    controller.ban_at(0, "10.0.0.1");
    controller.ban_at(1_000, "10.0.0.2");

    let summary = controller.clear_old_ips_at(3_600_500);

    assert_eq!(summary.bans_expired, 1);
    assert_eq!(controller.stats().banned_ips, 1);
    assert!(!controller.is_ip_banned_at(3_600_500, "10.0.0.1"));
    assert!(controller.is_ip_banned_at(3_600_500, "10.0.0.2"));
}

#[test]
fn test_sender_cap_across_ips() {
    let reporter = Arc::new(MemoryTxStatusReporter::new());
    let controller =
        AdmissionController::with_defaults().with_tx_status_reporter(reporter.clone());

    // One sender spread over many IPs never trips the per-IP caps
    for nonce in 0..9u64 {
        let (params, _) = raw_tx_params(1, nonce);
        let ip = format!("10.0.1.{}", nonce);
        assert!(controller.is_request_okay_at(nonce * 10, &ip, SEND_RAW, &params));
    }

    let (params, hash) = raw_tx_params(1, 9);
    let decision = controller.check_request_at(100, "10.0.1.9", SEND_RAW, &params);
    assert_eq!(reject_reason(decision), Some(RejectReason::SenderCap));

    let reports = reporter.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].tx_hash, hash.to_hex());
    assert_eq!(reports[0].reason, RATE_LIMIT_REASON);
    assert!(!reports[0].injected);

    let sender = address_of(&test_key(1)).to_lower_hex();
    assert_eq!(controller.address_history_len(&sender), 10);
}

#[test]
fn test_recipient_cap_aggregates_abuse_by_sender() {
    let reporter = Arc::new(MemoryTxStatusReporter::new());
    let controller =
        AdmissionController::with_defaults().with_tx_status_reporter(reporter.clone());

    // Two senders on two IPs share one recipient
    let mut now = 0;
    for nonce in 0..5u64 {
        let (params, _) = raw_tx_params(1, nonce);
        assert!(controller.is_request_okay_at(now, "10.0.0.1", SEND_RAW, &params));
        now += 10;

        let (params, _) = raw_tx_params(2, nonce);
        let decision = controller.check_request_at(now, "10.0.0.2", SEND_RAW, &params);
        now += 10;
        if nonce < 4 {
            assert!(decision.is_accepted());
        } else {
            assert_eq!(reject_reason(decision), Some(RejectReason::RecipientCap));
        }
    }

    let (params, _) = raw_tx_params(1, 5);
    assert_eq!(
        reject_reason(controller.check_request_at(now, "10.0.0.1", SEND_RAW, &params)),
        Some(RejectReason::RecipientCap)
    );

    let report = controller.log_and_reset_counters_at(now);
    assert_eq!(report.abuse.len(), 1);

    let abused = &report.abuse[0];
    assert_eq!(abused.contract, contract().to_lower_hex());
    assert_eq!(abused.count, 2);
    assert_eq!(abused.callers.len(), 2);

    let sender_one = address_of(&test_key(1)).to_lower_hex();
    let sender_two = address_of(&test_key(2)).to_lower_hex();
    for caller in &abused.callers {
        assert_eq!(caller.count, 1);
        let expected_ip = if caller.address == sender_one {
            "10.0.0.1"
        } else {
            assert_eq!(caller.address, sender_two);
            "10.0.0.2"
        };
        assert_eq!(caller.ips, vec![(expected_ip.to_string(), 1)]);
    }

    assert_eq!(reporter.reports().len(), 2);
}

#[test]
fn test_self_transfer_tracks_sender_once() {
    let controller = AdmissionController::with_defaults();
    let key = test_key(3);
    let sender = address_of(&key);
    let raw = sign_legacy(&key, &TestTx::transfer(sender, 0), true);

    assert!(controller.is_request_okay_at(0, "10.0.0.1", SEND_RAW, &[json!(to_hex_param(&raw))]));
    assert_eq!(controller.address_history_len(&sender.to_lower_hex()), 1);
    assert_eq!(controller.stats().tracked_addresses, 1);
}

#[test]
fn test_soft_cap_reports_decoded_tx() {
    let reporter = Arc::new(MemoryTxStatusReporter::new());
    let controller =
        AdmissionController::with_defaults().with_tx_status_reporter(reporter.clone());

    for i in 0..9u64 {
        controller.check_request_at(i, "10.0.0.1", SEND, &[]);
    }
    let (params, hash) = raw_tx_params(4, 0);
    assert_eq!(
        reject_reason(controller.check_request_at(9, "10.0.0.1", SEND_RAW, &params)),
        Some(RejectReason::IpSoftCap)
    );

    let reports = reporter.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].tx_hash, hash.to_hex());
}

#[test]
fn test_no_reports_without_reporter() {
    let controller = AdmissionController::with_defaults();
    for nonce in 0..12u64 {
        let (params, _) = raw_tx_params(5, nonce);
        controller.check_request_at(nonce, "10.0.0.1", SEND_RAW, &params);
    }
    assert_eq!(controller.stats().total_rejected, 3);
}

#[test]
fn test_cycle_report_flags_ban_candidates() {
    let controller = AdmissionController::with_defaults();

    for i in 0..25u64 {
        controller.check_request_at(i, "10.0.0.1", SEND, &[]);
    }
    for i in 0..5u64 {
        controller.check_request_at(i, "10.0.0.2", SEND, &[]);
        controller.check_request_at(i, "10.0.0.2", "eth_chainId", &[]);
    }

    let report = controller.log_and_reset_counters_at(100);

    assert_eq!(report.ban_candidates.len(), 1);
    assert_eq!(report.ban_candidates[0].ip, "10.0.0.1");
    assert_eq!(report.ban_candidates[0].count, 25);
    assert!(report.banned.is_empty());
    assert!(!controller.is_ip_banned_at(100, "10.0.0.1"));

    assert_eq!(report.counters.all_requests[0].ip, "10.0.0.1");
    assert_eq!(report.counters.all_requests[1].count, 10);
    assert_eq!(report.counters.heavy_requests[1].count, 5);

    // Counters start over
    let next = controller.log_and_reset_counters_at(200);
    assert!(next.counters.all_requests.is_empty());
    assert!(next.ban_candidates.is_empty());
}

#[test]
fn test_cycle_report_bans_with_auto_ban() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blacklist.json");
    let config = AdmissionConfig {
        auto_ban: true,
        ..Default::default()
    };
    let controller = AdmissionController::new(config).with_ban_store(BanListStore::new(&path));

    for i in 0..20u64 {
        controller.add_heavy_request_at(i, "10.0.0.1");
    }

    let report = controller.log_and_reset_counters_at(1_000);
    assert_eq!(report.banned, vec!["10.0.0.1"]);
    assert!(controller.is_ip_banned_at(1_000, "10.0.0.1"));
    assert_eq!(BanListStore::new(&path).load().unwrap(), vec!["10.0.0.1"]);
}

#[test]
fn test_unban_lifts_ban_and_history() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blacklist.json");
    let controller = AdmissionController::with_defaults().with_ban_store(BanListStore::new(&path));

    controller.add_heavy_request_at(0, "10.0.0.1");
    controller.ban_at(0, "10.0.0.1");
    controller.unban("10.0.0.1");

    assert!(!controller.is_ip_banned_at(1, "10.0.0.1"));
    assert_eq!(controller.ip_history_len("10.0.0.1"), 0);
    assert!(BanListStore::new(&path).load().unwrap().is_empty());
}

#[test]
fn test_from_config_loads_ip_lists() {
    let dir = TempDir::new().unwrap();
    let allow = dir.path().join("whitelist.json");
    let bans = dir.path().join("blacklist.json");
    std::fs::write(&allow, r#"["1.1.1.1"]"#).unwrap();
    std::fs::write(&bans, r#"["2.2.2.2"]"#).unwrap();

    let config = AdmissionConfig {
        allow_list_path: allow.to_string_lossy().into_owned(),
        ban_list_path: bans.to_string_lossy().into_owned(),
        ..Default::default()
    };
    let controller = AdmissionController::from_config(&config).unwrap();

    assert!(controller.is_allow_listed("1.1.1.1"));
    assert!(controller.is_ip_banned("2.2.2.2"));
    assert!(!controller.is_request_okay("2.2.2.2", "eth_chainId", &[]));
    assert!(controller.is_request_okay("1.1.1.1", SEND, &[]));

    // New bans land in the configured file
    controller.ban("3.3.3.3");
    assert_eq!(
        BanListStore::new(&bans).load().unwrap(),
        vec!["2.2.2.2", "3.3.3.3"]
    );
}

#[test]
fn test_from_config_without_files() {
    let dir = TempDir::new().unwrap();
    let config = AdmissionConfig {
        allow_list_path: dir.path().join("none.json").to_string_lossy().into_owned(),
        ban_list_path: dir.path().join("none-either.json").to_string_lossy().into_owned(),
        ..Default::default()
    };
    let controller = AdmissionController::from_config(&config).unwrap();

    let stats = controller.stats();
    assert_eq!(stats.allow_listed_ips, 0);
    assert_eq!(stats.banned_ips, 0);
}

#[test]
fn test_concurrent_checks_are_counted() {
    let controller = Arc::new(AdmissionController::with_defaults());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let controller = controller.clone();
            std::thread::spawn(move || {
                let ip = format!("10.1.0.{}", t);
                for _ in 0..50 {
                    controller.check_request(&ip, SEND, &[]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = controller.stats();
    assert_eq!(stats.total_requests, 400);
    assert_eq!(stats.tracked_ips, 8);
    // Each IP gets its first 9 through the soft cap
    assert_eq!(stats.total_rejected, 8 * 41);
}

#[test]
fn test_racing_checks_from_one_ip() {
    let controller = Arc::new(AdmissionController::with_defaults());
    let accepted = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let controller = controller.clone();
            let accepted = accepted.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    if controller.check_request_at(1_000, "10.9.9.9", SEND, &[]).is_accepted() {
                        accepted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let soft = controller.config().ip_soft_lookback;
    assert_eq!(accepted.load(std::sync::atomic::Ordering::Relaxed), soft - 1);
    assert_eq!(controller.ip_history_len("10.9.9.9"), 400);
    assert_eq!(controller.stats().total_rejected, 400 - (soft as u64 - 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auto_ban_persists_off_the_runtime_workers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blacklist.json");
    let config = AdmissionConfig {
        ip_soft_lookback: 1_000,
        auto_ban: true,
        ..Default::default()
    };
    let controller = AdmissionController::new(config).with_ban_store(BanListStore::new(&path));

    for i in 0..61u64 {
        controller.check_request_at(i, "10.0.0.1", SEND, &[]);
    }
    controller.ban_at(100, "10.0.0.2");
    controller.unban("10.0.0.2");

    let writer = controller.ban_writer().unwrap();
    for _ in 0..500 {
        if writer.is_idle() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(writer.is_idle());
    assert!(controller.is_ip_banned_at(100, "10.0.0.1"));
    assert_eq!(BanListStore::new(&path).load().unwrap(), vec!["10.0.0.1"]);
}
