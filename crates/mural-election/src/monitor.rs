//! Coordinator-liveness monitor.

use crate::ElectionManager;
use std::sync::Arc;
use tokio::sync::watch;

/// Periodically checks the coordinator's registry heartbeat and starts an
/// election when it goes stale. Also seeds the coordinator role at cold
/// start (lowest live rank).
pub async fn run_monitor(manager: Arc<ElectionManager>, mut stop: watch::Receiver<bool>) {
    let interval = manager.config().monitor_interval;
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        manager.check_coordinator().await;
    }
}
