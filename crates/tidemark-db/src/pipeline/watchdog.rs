//! Snapshot completion watchdog.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::catalog::{Catalog, SyncMode};

/// Returns `true` when a snapshot was seen and has been quiet for at
/// least `quiet_hours`.
#[must_use]
pub fn snapshot_looks_complete(hours_since: Option<f64>, quiet_hours: f64) -> bool {
    hours_since.is_some_and(|h| h >= quiet_hours)
}

/// Logs the end-of-snapshot advisory for `source` if due, resetting the
/// snapshot record. Returns `true` if the advisory was logged.
pub fn check_snapshot(catalog: &Catalog, source: &str) -> bool {
    let hours_since = catalog.hours_since_last_snapshot_record();
    let quiet_hours = catalog.snapshot_quiet_hours();
    if !snapshot_looks_complete(hours_since, quiet_hours) {
        return false;
    }
    let mode = catalog.sync_mode(source);
    if mode == SyncMode::Resync {
        warn!(
            source,
            quiet_hours,
            "snapshot appears complete; run end_sync to close rows that were not re-observed"
        );
    } else {
        info!(source, quiet_hours, %mode, "snapshot appears complete");
    }
    catalog.reset_last_snapshot_record();
    true
}

/// Checks every `interval` until `stop` is set.
pub(crate) async fn run_watchdog(
    catalog: Arc<Catalog>,
    source: String,
    interval: Duration,
    stop: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if stop.load(Ordering::Acquire) {
            break;
        }
        check_snapshot(&catalog, &source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::testing::RecordingStore;

    use crate::catalog::SNAPSHOT_QUIET_HOURS;

    #[test]
    fn test_snapshot_looks_complete() {
        assert!(!snapshot_looks_complete(None, 2.0));
        assert!(!snapshot_looks_complete(Some(1.5), 2.0));
        assert!(snapshot_looks_complete(Some(2.0), 2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_advisory_after_quiet_period() {
        let catalog = Catalog::open(Arc::new(RecordingStore::new())).await.unwrap();
        catalog.set_config(SNAPSHOT_QUIET_HOURS, "1").await.unwrap();
        assert!(!check_snapshot(&catalog, "pg1"));

        catalog.record_snapshot_event();
        tokio::time::advance(Duration::from_secs(1800)).await;
        assert!(!check_snapshot(&catalog, "pg1"));

        tokio::time::advance(Duration::from_secs(1800)).await;
        assert!(check_snapshot(&catalog, "pg1"));
        assert_eq!(catalog.hours_since_last_snapshot_record(), None);
    }
}
