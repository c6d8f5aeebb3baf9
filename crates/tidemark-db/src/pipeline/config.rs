//! Pipeline configuration.

use std::time::Duration;

use tidemark_connectors::PollLimits;

use crate::catalog::SyncMode;

/// Configuration of the stream coordinator and its consumer tasks.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum messages per `poll_batch()` call.
    pub max_poll_records: usize,

    /// Timeout of each individual broker receive.
    pub poll_timeout: Duration,

    /// Receives that may time out in a row before a partial batch is
    /// handed on.
    pub max_consecutive_timeouts: u32,

    /// Wall-clock budget of one batch.
    pub batch_budget: Duration,

    /// Consumer tasks per generation while the source is resyncing.
    ///
    /// Normal streaming always uses a single consumer so that ordering
    /// across partitions is preserved.
    pub resync_consumers: usize,

    /// Pause before a failed batch is polled again.
    pub retry_backoff: Duration,

    /// How often the snapshot watchdog checks for a quiet period.
    pub watchdog_interval: Duration,

    /// Distinct unparsable messages remembered per task, so each one is
    /// logged once.
    pub parse_error_dedup_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_poll_records: 10_000,
            poll_timeout: Duration::from_millis(100),
            max_consecutive_timeouts: 20,
            batch_budget: Duration::from_secs(5),
            resync_consumers: 4,
            retry_backoff: Duration::from_secs(1),
            watchdog_interval: Duration::from_secs(60),
            parse_error_dedup_capacity: 1024,
        }
    }
}

impl PipelineConfig {
    /// Broker poll bounds for one batch.
    #[must_use]
    pub fn poll_limits(&self) -> PollLimits {
        PollLimits {
            max_records: self.max_poll_records,
            poll_timeout: self.poll_timeout,
            max_consecutive_timeouts: self.max_consecutive_timeouts,
            batch_budget: self.batch_budget,
        }
    }

    /// Consumer tasks for a generation in `mode`.
    #[must_use]
    pub fn consumers_for(&self, mode: SyncMode) -> usize {
        match mode {
            SyncMode::NoSync => 1,
            SyncMode::Resync => self.resync_consumers.max(1),
        }
    }
}
