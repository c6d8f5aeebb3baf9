//! Change source abstraction.
//!
//! A [`ChangeSource`] delivers raw change messages in partition order and
//! lets the caller commit or rewind positions once a batch has been applied
//! or has failed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ConnectorError;

/// One raw message from the upstream broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    /// Message key bytes.
    pub key: Option<Vec<u8>>,
    /// Message value bytes; `None` for tombstones.
    pub value: Option<Vec<u8>>,
    /// Topic name.
    pub topic: String,
    /// Partition number.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// Position in one topic-partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionOffset {
    /// Topic name.
    pub topic: String,
    /// Partition number.
    pub partition: i32,
    /// Offset.
    pub offset: i64,
}

/// First and last offsets per partition of one polled batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPositions {
    ranges: BTreeMap<(String, i32), (i64, i64)>,
}

impl BatchPositions {
    /// Collects positions from a batch.
    #[must_use]
    pub fn from_messages(messages: &[SourceMessage]) -> Self {
        let mut positions = Self::default();
        for msg in messages {
            positions.track(&msg.topic, msg.partition, msg.offset);
        }
        positions
    }

    /// Records one delivered offset.
    pub fn track(&mut self, topic: &str, partition: i32, offset: i64) {
        self.ranges
            .entry((topic.to_string(), partition))
            .and_modify(|(first, last)| {
                *first = (*first).min(offset);
                *last = (*last).max(offset);
            })
            .or_insert((offset, offset));
    }

    /// Returns `true` if no message was tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of partitions touched.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.ranges.len()
    }

    /// Offsets to commit: one past the last delivered offset.
    #[must_use]
    pub fn commit_offsets(&self) -> Vec<PartitionOffset> {
        self.ranges
            .iter()
            .map(|((topic, partition), (_, last))| PartitionOffset {
                topic: topic.clone(),
                partition: *partition,
                offset: last + 1,
            })
            .collect()
    }

    /// Offsets to seek back to for redelivery: the first delivered offset.
    #[must_use]
    pub fn rewind_offsets(&self) -> Vec<PartitionOffset> {
        self.ranges
            .iter()
            .map(|((topic, partition), (first, _))| PartitionOffset {
                topic: topic.clone(),
                partition: *partition,
                offset: *first,
            })
            .collect()
    }
}

/// Bounds on one `poll_batch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollLimits {
    /// Maximum messages per batch.
    pub max_records: usize,
    /// Timeout of each individual receive.
    pub poll_timeout: Duration,
    /// Receives that may time out in a row before the batch is returned.
    pub max_consecutive_timeouts: u32,
    /// Wall-clock budget for the whole batch.
    pub batch_budget: Duration,
}

impl Default for PollLimits {
    fn default() -> Self {
        Self {
            max_records: 10_000,
            poll_timeout: Duration::from_millis(100),
            max_consecutive_timeouts: 20,
            batch_budget: Duration::from_secs(5),
        }
    }
}

/// Restart request shared between every consumer of one generation.
///
/// Rebalance callbacks and sync-mode changes set it; consumer tasks check
/// it between batches.
#[derive(Debug, Default)]
pub struct RestartSignal {
    requested: AtomicBool,
    requests: AtomicU64,
}

impl RestartSignal {
    /// Creates a shared, unset signal.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Requests a restart.
    pub fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.requested.store(true, Ordering::Release);
    }

    /// Returns `true` if a restart was requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Clears the request, returning whether one was pending.
    pub fn clear(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }

    /// Total requests since creation.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Upstream source of raw change messages.
#[async_trait]
pub trait ChangeSource: Send {
    /// Polls up to `limits.max_records` messages.
    ///
    /// Returns an empty batch when nothing arrived within the limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::ReadError`] on unrecoverable read failures.
    async fn poll_batch(&mut self, limits: &PollLimits)
        -> Result<Vec<SourceMessage>, ConnectorError>;

    /// Commits positions so they are not redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::OffsetError`] if the commit fails.
    async fn commit(&mut self, offsets: &[PartitionOffset]) -> Result<(), ConnectorError>;

    /// Moves the read position back so messages are delivered again.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::OffsetError`] if seeking fails.
    async fn rewind(&mut self, offsets: &[PartitionOffset]) -> Result<(), ConnectorError>;

    /// Enables restart requests on partition revocation.
    ///
    /// Called once the consumer has applied its first batch, so the initial
    /// assignment of a fresh consumer does not trigger a restart.
    fn arm_rebalance(&mut self) {}

    /// Closes the source, leaving the consumer group.
    ///
    /// # Errors
    ///
    /// Returns an error if shutdown fails; the source is unusable either way.
    async fn close(&mut self) -> Result<(), ConnectorError>;
}

/// Creates change sources for one consumer generation.
pub trait SourceFactory: Send + Sync {
    /// Creates one consumer wired to `restart`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] if the source cannot be created.
    fn create(&self, restart: Arc<RestartSignal>) -> Result<Box<dyn ChangeSource>, ConnectorError>;
}

impl fmt::Display for PartitionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}
