//! Recurring admission maintenance.
//!
//! Two background tasks share the controller with request handling: one
//! prunes histories and expired bans, the other reports and resets the cycle
//! tallies. Both stop on the shutdown broadcast.

use crate::controller::AdmissionController;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Run [`AdmissionController::clear_old_ips`] every `period`.
pub fn spawn_pruner(
    controller: Arc<AdmissionController>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let summary = controller.clear_old_ips();
                    if summary.bans_expired > 0 {
                        info!(expired = summary.bans_expired, "Expired bans removed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Admission pruner shutting down");
                    break;
                }
            }
        }
    })
}

/// Run [`AdmissionController::log_and_reset_counters`] every `period`.
pub fn spawn_reporter(
    controller: Arc<AdmissionController>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = controller.log_and_reset_counters();
                    if !report.banned.is_empty() {
                        info!(banned = report.banned.len(), "Ban candidates banned");
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Admission reporter shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pruner_drops_expired_bans() {
        let controller = Arc::new(AdmissionController::with_defaults());
        controller.ban_at(0, "10.0.0.1");
        assert_eq!(controller.stats().banned_ips, 1);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = spawn_pruner(controller.clone(), Duration::from_secs(60), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(61)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(controller.stats().banned_ips, 0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_resets_counters() {
        let controller = Arc::new(AdmissionController::with_defaults());
        controller.add_all_request("10.0.0.1");

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = spawn_reporter(controller.clone(), Duration::from_secs(300), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(301)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(controller.log_and_reset_counters().counters.all_requests.is_empty());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
