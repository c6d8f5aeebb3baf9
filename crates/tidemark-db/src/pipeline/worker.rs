//! Per-consumer task loop.
//!
//! Each consumer owns its change source exclusively. A batch is decoded,
//! rewritten and executed, and only then committed; a failed batch is
//! rewound so the broker delivers it again.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Barrier;
use tracing::{debug, error, warn};

use tidemark_connectors::cdc::debezium::DebeziumDecoder;
use tidemark_connectors::{BatchPositions, ChangeSource, RestartSignal, SourceMessage};
use tidemark_core::{Command, Result};

use super::config::PipelineConfig;
use super::metrics::ConsumerMetrics;
use crate::catalog::Catalog;
use crate::exec::Executor;
use crate::rewrite::JsonRewriter;

/// Bounded memory of messages that already failed to decode.
#[derive(Debug)]
pub(crate) struct ParseErrorLog {
    capacity: usize,
    seen: HashSet<u64>,
    order: VecDeque<u64>,
}

impl ParseErrorLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns `true` the first time `msg` is reported.
    pub(crate) fn first_report(&mut self, msg: &SourceMessage) -> bool {
        let mut hasher = DefaultHasher::new();
        (&msg.topic, msg.partition, msg.offset).hash(&mut hasher);
        let fingerprint = hasher.finish();
        if !self.seen.insert(fingerprint) {
            return false;
        }
        self.order.push_back(fingerprint);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

/// One consumer of a generation.
pub(crate) struct ConsumerTask {
    pub(crate) id: usize,
    pub(crate) source: Box<dyn ChangeSource>,
    pub(crate) decoder: Arc<DebeziumDecoder>,
    pub(crate) rewriter: JsonRewriter,
    pub(crate) executor: Executor,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) restart: Arc<RestartSignal>,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) barrier: Arc<Barrier>,
    pub(crate) metrics: Arc<ConsumerMetrics>,
    pub(crate) config: PipelineConfig,
}

impl ConsumerTask {
    /// Consumes until stop or restart, then waits for the rest of the
    /// generation and closes the source.
    ///
    /// A fatal error sets the stop flag so the other consumers wind down
    /// too.
    pub(crate) async fn run(mut self) -> Result<()> {
        let result = self.consume().await;
        if result.is_err() {
            self.stop.store(true, Ordering::Release);
        }
        self.barrier.wait().await;
        if let Err(e) = self.source.close().await {
            warn!(consumer = self.id, error = %e, "closing source failed");
        }
        debug!(consumer = self.id, "consumer stopped");
        result
    }

    async fn consume(&mut self) -> Result<()> {
        let limits = self.config.poll_limits();
        let mut parse_log = ParseErrorLog::new(self.config.parse_error_dedup_capacity);
        let mut armed = false;

        loop {
            if self.stop.load(Ordering::Acquire) || self.restart.is_requested() {
                return Ok(());
            }

            let messages = match self.source.poll_batch(&limits).await {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(consumer = self.id, error = %e, "poll failed");
                    tokio::time::sleep(self.config.retry_backoff).await;
                    continue;
                }
            };
            if messages.is_empty() {
                continue;
            }

            let started = Instant::now();
            let positions = BatchPositions::from_messages(&messages);
            let commands = self.decode(&messages, &mut parse_log);
            let commands = self.rewriter.rewrite(commands);

            match self.executor.execute(&commands).await {
                Ok(stats) => {
                    if let Err(e) = self.source.commit(&positions.commit_offsets()).await {
                        warn!(consumer = self.id, error = %e, "offset commit failed, batch may be redelivered");
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    let latency_ns = started.elapsed().as_nanos() as u64;
                    self.metrics.record_batch(
                        messages.len() as u64,
                        commands.len() as u64,
                        stats.versions,
                        latency_ns,
                    );
                    if !armed {
                        self.source.arm_rebalance();
                        armed = true;
                    }
                    debug!(
                        consumer = self.id,
                        messages = messages.len(),
                        commands = commands.len(),
                        versions = stats.versions,
                        "batch applied"
                    );
                }
                Err(e) if e.is_fatal() => {
                    error!(consumer = self.id, error = %e, "fatal error, stopping");
                    return Err(e);
                }
                Err(e) => {
                    self.metrics.record_retry();
                    warn!(
                        consumer = self.id,
                        error = %e,
                        partitions = positions.partition_count(),
                        "batch failed, rewinding"
                    );
                    if let Err(seek) = self.source.rewind(&positions.rewind_offsets()).await {
                        warn!(consumer = self.id, error = %seek, "rewind failed");
                    }
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }
        }
    }

    fn decode(&self, messages: &[SourceMessage], parse_log: &mut ParseErrorLog) -> Vec<Command> {
        let mut commands = Vec::with_capacity(messages.len());
        for msg in messages {
            match self.decoder.decode(msg) {
                Ok(Some(cmd)) => {
                    if cmd.snapshot {
                        self.catalog.record_snapshot_event();
                    }
                    commands.push(cmd);
                }
                Ok(None) => {}
                Err(e) => {
                    self.metrics.record_parse_error();
                    if parse_log.first_report(msg) {
                        warn!(
                            topic = %msg.topic,
                            partition = msg.partition,
                            offset = msg.offset,
                            error = %e,
                            "undecodable message skipped"
                        );
                    }
                }
            }
        }
        commands
    }
}
