//! Periodic status reconciliation

use crate::tracker::StatusTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Reconcile `tracker` every `period` until `shutdown` turns true or its
/// sender is dropped. A failed tick is logged and the loop carries on.
pub fn spawn_reconciler(
    tracker: Arc<StatusTracker>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(instance_id = %tracker.instance_id(), ?period, "Status reconciliation started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match tracker.reconcile().await {
                        Ok(Some(status)) => debug!(%status, "Status reconciled"),
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "Status reconciliation failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(instance_id = %tracker.instance_id(), "Status reconciliation stopped");
    })
}
