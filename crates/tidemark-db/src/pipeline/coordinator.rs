//! Stream coordinator.
//!
//! Runs consumer generations for one source:
//! - **Generation**: one consumer in normal mode, `resync_consumers` while
//!   resyncing. Every consumer owns its source exclusively.
//! - **Restart**: a rebalance or a sync-mode change sets the shared
//!   [`RestartSignal`]; consumers finish their batch, meet at a barrier,
//!   close their sources, and the coordinator starts the next generation.
//! - **Stop**: the stop flag ends the current generation without a
//!   successor. Fatal errors set it too. A panicked consumer aborts the
//!   rest of its generation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use tidemark_connectors::cdc::debezium::{DebeziumDecoder, DecoderConfig};
use tidemark_connectors::{RestartSignal, SourceFactory};
use tidemark_core::{Error, Result};

use super::config::PipelineConfig;
use super::metrics::{ConsumerMetrics, MetricsSnapshot};
use super::watchdog::run_watchdog;
use super::worker::ConsumerTask;
use crate::catalog::Catalog;
use crate::exec::Executor;
use crate::rewrite::JsonRewriter;
use crate::sync::SyncControl;

/// Drives consumption of one source into the store.
pub struct StreamCoordinator {
    catalog: Arc<Catalog>,
    factory: Arc<dyn SourceFactory>,
    decoder: Arc<DebeziumDecoder>,
    source: String,
    config: PipelineConfig,
    restart: Arc<RestartSignal>,
    stop: Arc<AtomicBool>,
    metrics: Arc<ConsumerMetrics>,
}

impl std::fmt::Debug for StreamCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCoordinator")
            .field("source", &self.source)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StreamCoordinator {
    /// Creates a coordinator for the source named in `decoder_config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a schema filter does not compile.
    pub fn new(
        catalog: Arc<Catalog>,
        factory: Arc<dyn SourceFactory>,
        decoder_config: &DecoderConfig,
        config: PipelineConfig,
    ) -> Result<Self> {
        Ok(Self {
            catalog,
            factory,
            decoder: Arc::new(DebeziumDecoder::new(decoder_config)?),
            source: decoder_config.source_name.clone(),
            config,
            restart: RestartSignal::new(),
            stop: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(ConsumerMetrics::default()),
        })
    }

    /// Flag that stops the coordinator after in-flight batches.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Signal that ends the current generation.
    #[must_use]
    pub fn restart_signal(&self) -> Arc<RestartSignal> {
        Arc::clone(&self.restart)
    }

    /// Sync control wired to this coordinator's restart signal.
    #[must_use]
    pub fn sync_control(&self) -> SyncControl {
        SyncControl::new(Arc::clone(&self.catalog), Arc::clone(&self.restart))
    }

    /// Current consumer metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Runs generations until stopped.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of any consumer, or an error if a
    /// generation's sources could not be created.
    pub async fn run(&self) -> Result<()> {
        let watchdog = tokio::spawn(run_watchdog(
            Arc::clone(&self.catalog),
            self.source.clone(),
            self.config.watchdog_interval,
            Arc::clone(&self.stop),
        ));
        let result = self.run_generations().await;
        self.stop.store(true, Ordering::Release);
        watchdog.abort();
        if let Err(e) = &result {
            error!(source = %self.source, error = %e, "coordinator stopped on error");
        }
        result
    }

    async fn run_generations(&self) -> Result<()> {
        let mut generation: u64 = 0;
        while !self.stop.load(Ordering::Acquire) {
            generation += 1;
            self.restart.clear();
            if self.catalog.take_maintenance_request() {
                self.run_maintenance().await;
            }

            let mode = self.catalog.sync_mode(&self.source);
            let consumers = self.config.consumers_for(mode);
            info!(source = %self.source, generation, consumers, %mode, "starting consumer generation");

            // Every source is created before any consumer is spawned.
            let mut sources = Vec::with_capacity(consumers);
            for _ in 0..consumers {
                sources.push(self.factory.create(Arc::clone(&self.restart))?);
            }

            let barrier = Arc::new(Barrier::new(consumers));
            let mut tasks = JoinSet::new();
            for (id, source) in sources.into_iter().enumerate() {
                let task = ConsumerTask {
                    id,
                    source,
                    decoder: Arc::clone(&self.decoder),
                    rewriter: JsonRewriter::new(Arc::clone(&self.catalog)),
                    executor: Executor::new(Arc::clone(&self.catalog)),
                    catalog: Arc::clone(&self.catalog),
                    restart: Arc::clone(&self.restart),
                    stop: Arc::clone(&self.stop),
                    barrier: Arc::clone(&barrier),
                    metrics: Arc::clone(&self.metrics),
                    config: self.config.clone(),
                };
                tasks.spawn(task.run());
            }

            let mut outcome = Ok(());
            while let Some(joined) = tasks.join_next().await {
                let result = match joined {
                    Ok(result) => result,
                    Err(e) if e.is_cancelled() => continue,
                    Err(e) => {
                        // A lost consumer never reaches the barrier, so the
                        // rest of the generation is cancelled.
                        error!(source = %self.source, error = %e, "consumer task failed");
                        self.stop.store(true, Ordering::Release);
                        tasks.abort_all();
                        Err(Error::FatalInvariantViolation(format!(
                            "consumer task failed: {e}"
                        )))
                    }
                };
                if let Err(e) = result {
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
            }
            outcome?;

            if !self.stop.load(Ordering::Acquire) {
                info!(
                    source = %self.source,
                    generation,
                    restarts = self.restart.request_count(),
                    "generation ended, restarting consumers"
                );
            }
        }
        info!(source = %self.source, "coordinator stopped");
        Ok(())
    }

    /// Refreshes planner statistics of every tracked relation.
    async fn run_maintenance(&self) {
        let tables = self.catalog.tables();
        info!(tables = tables.len(), "running maintenance");
        for table in tables {
            for relation in [table.current_sql(), table.history_sql()] {
                if let Err(e) = self
                    .catalog
                    .store()
                    .execute(&format!("ANALYZE {relation}"))
                    .await
                {
                    warn!(%relation, error = %e, "analyze failed");
                }
            }
        }
    }
}
