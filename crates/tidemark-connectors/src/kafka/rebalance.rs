//! Kafka consumer group rebalance handling.
//!
//! [`RebalanceState`] tracks which topic-partitions are currently
//! assigned to this consumer and counts rebalance events.
//!
//! [`TidemarkConsumerContext`] is an rdkafka `ConsumerContext` that
//! requests a pipeline restart when partitions are revoked, so every
//! consumer drains its batch and the group is rebuilt before any offsets
//! of the new assignment are committed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rdkafka::consumer::{ConsumerContext, Rebalance};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientContext, TopicPartitionList};
use tracing::{error, info, warn};

use crate::connector::RestartSignal;

/// Tracks partition assignments across consumer group rebalances.
#[derive(Debug, Clone, Default)]
pub struct RebalanceState {
    /// Currently assigned (topic, partition) pairs.
    assigned: HashSet<(String, i32)>,
    /// Total number of rebalance events.
    rebalance_count: u64,
}

impl RebalanceState {
    /// Creates a new empty rebalance state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles a partition assignment event.
    ///
    /// Adds to the assignment set and increments the rebalance counter.
    pub fn on_assign(&mut self, partitions: &[(String, i32)]) {
        for (topic, partition) in partitions {
            self.assigned.insert((topic.clone(), *partition));
        }
        self.rebalance_count += 1;
    }

    /// Handles a partition revocation event.
    pub fn on_revoke(&mut self, partitions: &[(String, i32)]) {
        for (topic, partition) in partitions {
            self.assigned.remove(&(topic.clone(), *partition));
        }
    }

    /// Returns the set of currently assigned partitions.
    #[must_use]
    pub fn assigned_partitions(&self) -> &HashSet<(String, i32)> {
        &self.assigned
    }

    /// Returns the total number of rebalance events.
    #[must_use]
    pub fn rebalance_count(&self) -> u64 {
        self.rebalance_count
    }

    /// Returns `true` if the given topic-partition is currently assigned.
    #[must_use]
    pub fn is_assigned(&self, topic: &str, partition: i32) -> bool {
        self.assigned.contains(&(topic.to_string(), partition))
    }
}

fn pairs(tpl: &TopicPartitionList) -> Vec<(String, i32)> {
    tpl.elements()
        .iter()
        .map(|e| (e.topic().to_string(), e.partition()))
        .collect()
}

/// rdkafka consumer context that requests a restart on partition revocation.
///
/// Revocations are ignored until the consumer is armed, which happens after
/// its first applied batch; the initial assignment dance of a new
/// generation therefore does not restart it again.
///
/// Rebalance callbacks run on rdkafka's background thread, so all shared
/// state uses `Arc` + atomic types for thread safety.
pub struct TidemarkConsumerContext {
    /// Shared restart request of the current generation.
    restart: Arc<RestartSignal>,
    /// Set once the consumer applied its first batch.
    armed: Arc<AtomicBool>,
    /// Assignment bookkeeping.
    state: Mutex<RebalanceState>,
    /// Rebalance event counter (for observability).
    rebalance_count: AtomicU64,
}

impl TidemarkConsumerContext {
    /// Creates a context wired to `restart`, armed through `armed`.
    #[must_use]
    pub fn new(restart: Arc<RestartSignal>, armed: Arc<AtomicBool>) -> Self {
        Self {
            restart,
            armed,
            state: Mutex::new(RebalanceState::new()),
            rebalance_count: AtomicU64::new(0),
        }
    }

    /// Returns the total number of rebalance events observed.
    #[must_use]
    pub fn rebalance_count(&self) -> u64 {
        self.rebalance_count.load(Ordering::Relaxed)
    }

    /// Snapshot of the current assignment.
    #[must_use]
    pub fn assignment(&self) -> RebalanceState {
        self.state.lock().clone()
    }

    /// Applies a revocation; returns `true` if a restart was requested.
    fn handle_revoke(&self, partitions: &[(String, i32)]) -> bool {
        self.rebalance_count.fetch_add(1, Ordering::Relaxed);
        self.state.lock().on_revoke(partitions);
        if partitions.is_empty() || !self.armed.load(Ordering::Acquire) {
            return false;
        }
        self.restart.request();
        true
    }

    fn handle_assign(&self, partitions: &[(String, i32)]) {
        self.rebalance_count.fetch_add(1, Ordering::Relaxed);
        self.state.lock().on_assign(partitions);
    }
}

impl ClientContext for TidemarkConsumerContext {
    fn error(&self, err: KafkaError, reason: &str) {
        // Both classes are logged; polling continues either way.
        let fatal = err.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal);
        if fatal {
            error!(error = %err, reason, fatal, "kafka client error");
        } else {
            warn!(error = %err, reason, fatal, "kafka client error");
        }
    }
}

impl ConsumerContext for TidemarkConsumerContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                let revoked = pairs(tpl);
                let requested = self.handle_revoke(&revoked);
                info!(
                    partitions_revoked = revoked.len(),
                    restart_requested = requested,
                    "kafka rebalance: partitions being revoked"
                );
            }
            Rebalance::Assign(tpl) => {
                let assigned = pairs(tpl);
                self.handle_assign(&assigned);
                info!(
                    partitions_assigned = assigned.len(),
                    "kafka rebalance: new partitions assigned"
                );
            }
            Rebalance::Error(msg) => {
                warn!(error = %msg, "kafka rebalance error");
            }
        }
    }
}
