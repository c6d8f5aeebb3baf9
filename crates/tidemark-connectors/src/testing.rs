//! In-memory change source for tests.
//!
//! [`MemoryChangeSource`] serves messages from a shared queue and records
//! commits and rewinds. A rewind puts the rewound messages back at the head
//! of their partition, like a broker seek would.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connector::{
    ChangeSource, PartitionOffset, PollLimits, RestartSignal, SourceFactory, SourceMessage,
};
use crate::error::ConnectorError;

#[derive(Debug, Default)]
struct Shared {
    pending: VecDeque<SourceMessage>,
    delivered: Vec<SourceMessage>,
    committed: Vec<PartitionOffset>,
    rewinds: Vec<PartitionOffset>,
    closes: usize,
    armed: usize,
}

/// Queue-backed [`ChangeSource`].
///
/// Clones share the same queue and records, so a test keeps one handle
/// while the pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryChangeSource {
    shared: Arc<Mutex<Shared>>,
    restart: Option<Arc<RestartSignal>>,
}

impl MemoryChangeSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message on `topic`/`partition` with the next offset.
    pub fn push(&self, topic: &str, partition: i32, key: Option<&str>, value: Option<&str>) {
        let mut shared = self.shared.lock();
        let offset = shared
            .pending
            .iter()
            .chain(shared.delivered.iter())
            .filter(|m| m.topic == topic && m.partition == partition)
            .map(|m| m.offset + 1)
            .max()
            .unwrap_or(0);
        shared.pending.push_back(SourceMessage {
            key: key.map(|k| k.as_bytes().to_vec()),
            value: value.map(|v| v.as_bytes().to_vec()),
            topic: topic.to_string(),
            partition,
            offset,
        });
    }

    /// Messages not yet delivered.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Every commit call's offsets, in order.
    #[must_use]
    pub fn committed(&self) -> Vec<PartitionOffset> {
        self.shared.lock().committed.clone()
    }

    /// Every rewind position, in order.
    #[must_use]
    pub fn rewinds(&self) -> Vec<PartitionOffset> {
        self.shared.lock().rewinds.clone()
    }

    /// Number of `close()` calls.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.shared.lock().closes
    }

    /// Number of `arm_rebalance()` calls.
    #[must_use]
    pub fn arm_count(&self) -> usize {
        self.shared.lock().armed
    }

    /// Simulates a revocation: requests a restart on the wired signal.
    pub fn revoke(&self) {
        if let Some(restart) = &self.restart {
            restart.request();
        }
    }
}

#[async_trait]
impl ChangeSource for MemoryChangeSource {
    async fn poll_batch(
        &mut self,
        limits: &PollLimits,
    ) -> Result<Vec<SourceMessage>, ConnectorError> {
        let batch: Vec<SourceMessage> = {
            let mut shared = self.shared.lock();
            let n = shared.pending.len().min(limits.max_records);
            let batch: Vec<SourceMessage> = shared.pending.drain(..n).collect();
            shared.delivered.extend(batch.iter().cloned());
            batch
        };
        if batch.is_empty() {
            tokio::time::sleep(limits.poll_timeout).await;
        }
        Ok(batch)
    }

    async fn commit(&mut self, offsets: &[PartitionOffset]) -> Result<(), ConnectorError> {
        self.shared.lock().committed.extend_from_slice(offsets);
        Ok(())
    }

    async fn rewind(&mut self, offsets: &[PartitionOffset]) -> Result<(), ConnectorError> {
        let mut shared = self.shared.lock();
        for p in offsets {
            let mut replay: Vec<SourceMessage> = shared
                .delivered
                .iter()
                .filter(|m| m.topic == p.topic && m.partition == p.partition && m.offset >= p.offset)
                .cloned()
                .collect();
            shared
                .delivered
                .retain(|m| !(m.topic == p.topic && m.partition == p.partition && m.offset >= p.offset));
            replay.sort_by_key(|m| m.offset);
            for m in replay.into_iter().rev() {
                shared.pending.push_front(m);
            }
            shared.rewinds.push(p.clone());
        }
        Ok(())
    }

    fn arm_rebalance(&mut self) {
        self.shared.lock().armed += 1;
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        self.shared.lock().closes += 1;
        Ok(())
    }
}

/// Factory handing out clones of one [`MemoryChangeSource`].
#[derive(Debug, Clone, Default)]
pub struct MemorySourceFactory {
    source: MemoryChangeSource,
    created: Arc<AtomicUsize>,
    last_restart: Arc<Mutex<Option<Arc<RestartSignal>>>>,
}

impl MemorySourceFactory {
    /// Creates a factory sharing `source`'s queue.
    #[must_use]
    pub fn new(source: MemoryChangeSource) -> Self {
        Self {
            source,
            created: Arc::new(AtomicUsize::new(0)),
            last_restart: Arc::new(Mutex::new(None)),
        }
    }

    /// Number of sources created so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Simulates a revocation on the most recent generation.
    pub fn revoke(&self) {
        if let Some(restart) = self.last_restart.lock().as_ref() {
            restart.request();
        }
    }
}

impl SourceFactory for MemorySourceFactory {
    fn create(&self, restart: Arc<RestartSignal>) -> Result<Box<dyn ChangeSource>, ConnectorError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.last_restart.lock() = Some(Arc::clone(&restart));
        let mut source = self.source.clone();
        source.restart = Some(restart);
        Ok(Box::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_commit_rewind() {
        let source = MemoryChangeSource::new();
        for i in 0..3 {
            source.push("cdc", 0, Some("k"), Some(&format!("v{i}")));
        }
        let mut handle = source.clone();
        let limits = PollLimits {
            max_records: 2,
            ..PollLimits::default()
        };

        let batch = handle.poll_batch(&limits).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].offset, 0);
        assert_eq!(batch[1].offset, 1);

        handle
            .rewind(&[PartitionOffset {
                topic: "cdc".into(),
                partition: 0,
                offset: 0,
            }])
            .await
            .unwrap();
        assert_eq!(source.pending(), 3);

        let batch = handle.poll_batch(&limits).await.unwrap();
        assert_eq!(batch[0].offset, 0);
        handle
            .commit(&[PartitionOffset {
                topic: "cdc".into(),
                partition: 0,
                offset: 2,
            }])
            .await
            .unwrap();
        assert_eq!(source.committed().len(), 1);
        assert_eq!(source.rewinds().len(), 1);
    }

    #[tokio::test]
    async fn test_factory_wires_restart() {
        let factory = MemorySourceFactory::new(MemoryChangeSource::new());
        let restart = RestartSignal::new();
        let _source = factory.create(Arc::clone(&restart)).unwrap();
        assert_eq!(factory.created(), 1);
        factory.revoke();
        assert!(restart.is_requested());
    }
}
