//! Kafka change source.
//!
//! [`KafkaChangeSource`] implements [`ChangeSource`] over rdkafka's
//! `StreamConsumer`. Batches are bounded by record count, a per-receive
//! timeout, a cap on consecutive timeouts and a wall-clock budget. Offsets
//! are committed synchronously and only on request, after the batch has
//! been applied.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use super::config::{KafkaSourceConfig, TopicSubscription};
use super::rebalance::TidemarkConsumerContext;
use crate::connector::{
    ChangeSource, PartitionOffset, PollLimits, RestartSignal, SourceFactory, SourceMessage,
};
use crate::error::ConnectorError;

/// Kafka consumer delivering raw change messages.
///
/// # Lifecycle
///
/// 1. Create with [`KafkaChangeSource::open`], which subscribes
/// 2. Call `poll_batch()` in a loop
/// 3. Call `commit()` after a batch is applied, `rewind()` after it failed
/// 4. Call `close()` to leave the group
pub struct KafkaChangeSource {
    /// rdkafka consumer; `None` after `close()`.
    consumer: Option<StreamConsumer<TidemarkConsumerContext>>,
    /// Parsed configuration.
    config: KafkaSourceConfig,
    /// Arms restart requests on revocation.
    armed: Arc<AtomicBool>,
    /// Messages delivered.
    messages: AtomicU64,
    /// Consumer errors observed.
    errors: AtomicU64,
}

impl KafkaChangeSource {
    /// Creates a consumer and subscribes it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::ConnectionFailed`] if the consumer cannot be
    /// created or subscribed.
    pub fn open(
        config: KafkaSourceConfig,
        restart: Arc<RestartSignal>,
    ) -> Result<Self, ConnectorError> {
        info!(
            brokers = %config.bootstrap_servers,
            subscription = ?config.subscription,
            group_id = %config.group_id,
            "opening Kafka change source"
        );

        let armed = Arc::new(AtomicBool::new(false));
        let context = TidemarkConsumerContext::new(restart, Arc::clone(&armed));
        let consumer: StreamConsumer<TidemarkConsumerContext> = config
            .to_rdkafka_config()
            .create_with_context(context)
            .map_err(|e| {
                ConnectorError::ConnectionFailed(format!("failed to create consumer: {e}"))
            })?;

        match &config.subscription {
            TopicSubscription::Topics(topics) => {
                let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
                consumer.subscribe(&topic_refs).map_err(|e| {
                    ConnectorError::ConnectionFailed(format!("failed to subscribe: {e}"))
                })?;
            }
            TopicSubscription::Pattern(pattern) => {
                // rdkafka requires a ^ prefix for regex patterns
                let regex_pattern = if pattern.starts_with('^') {
                    pattern.clone()
                } else {
                    format!("^{pattern}")
                };
                consumer.subscribe(&[&regex_pattern]).map_err(|e| {
                    ConnectorError::ConnectionFailed(format!("failed to subscribe to pattern: {e}"))
                })?;
            }
        }

        Ok(Self {
            consumer: Some(consumer),
            config,
            armed,
            messages: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    /// Total messages delivered.
    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Total consumer errors observed.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn consumer(&self) -> Result<&StreamConsumer<TidemarkConsumerContext>, ConnectorError> {
        self.consumer.as_ref().ok_or(ConnectorError::Closed)
    }
}

impl std::fmt::Debug for KafkaChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaChangeSource")
            .field("group_id", &self.config.group_id)
            .field("open", &self.consumer.is_some())
            .field("messages", &self.message_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ChangeSource for KafkaChangeSource {
    async fn poll_batch(
        &mut self,
        limits: &PollLimits,
    ) -> Result<Vec<SourceMessage>, ConnectorError> {
        let consumer = self.consumer()?;
        let deadline = Instant::now() + limits.batch_budget;
        let mut batch = Vec::new();
        let mut timeouts = 0_u32;

        while batch.len() < limits.max_records {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(limits.poll_timeout.min(remaining), consumer.recv()).await {
                Err(_) => {
                    timeouts += 1;
                    if timeouts >= limits.max_consecutive_timeouts {
                        break;
                    }
                }
                Ok(Ok(msg)) => {
                    timeouts = 0;
                    batch.push(SourceMessage {
                        key: msg.key().map(<[u8]>::to_vec),
                        value: msg.payload().map(<[u8]>::to_vec),
                        topic: msg.topic().to_string(),
                        partition: msg.partition(),
                        offset: msg.offset(),
                    });
                }
                Ok(Err(e)) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Kafka consumer error");
                    timeouts += 1;
                    if timeouts >= limits.max_consecutive_timeouts {
                        break;
                    }
                }
            }
        }

        self.messages
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        if !batch.is_empty() {
            debug!(records = batch.len(), "polled Kafka batch");
        }
        Ok(batch)
    }

    async fn commit(&mut self, offsets: &[PartitionOffset]) -> Result<(), ConnectorError> {
        if offsets.is_empty() {
            return Ok(());
        }
        let mut tpl = TopicPartitionList::new();
        for p in offsets {
            tpl.add_partition_offset(&p.topic, p.partition, Offset::Offset(p.offset))
                .map_err(|e| ConnectorError::OffsetError(format!("invalid offset {p}: {e}")))?;
        }
        self.consumer()?
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| ConnectorError::OffsetError(format!("commit failed: {e}")))
    }

    async fn rewind(&mut self, offsets: &[PartitionOffset]) -> Result<(), ConnectorError> {
        let consumer = self.consumer()?;
        for p in offsets {
            consumer
                .seek(
                    &p.topic,
                    p.partition,
                    Offset::Offset(p.offset),
                    self.config.seek_timeout,
                )
                .map_err(|e| ConnectorError::OffsetError(format!("seek to {p} failed: {e}")))?;
        }
        Ok(())
    }

    fn arm_rebalance(&mut self) {
        self.armed.store(true, Ordering::Release);
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!(group_id = %self.config.group_id, "Kafka change source closed");
        }
        Ok(())
    }
}

/// Creates one [`KafkaChangeSource`] per consumer of a generation.
#[derive(Debug, Clone)]
pub struct KafkaSourceFactory {
    config: KafkaSourceConfig,
}

impl KafkaSourceFactory {
    /// Creates a factory for `config`.
    #[must_use]
    pub fn new(config: KafkaSourceConfig) -> Self {
        Self { config }
    }
}

impl SourceFactory for KafkaSourceFactory {
    fn create(
        &self,
        restart: Arc<RestartSignal>,
    ) -> Result<Box<dyn ChangeSource>, ConnectorError> {
        Ok(Box::new(KafkaChangeSource::open(self.config.clone(), restart)?))
    }
}
