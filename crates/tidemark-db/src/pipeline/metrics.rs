//! Lock-free consumer metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every consumer task of a coordinator.
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Batches applied and committed.
    pub batches: AtomicU64,
    /// Messages in applied batches.
    pub messages: AtomicU64,
    /// Commands executed, derived commands included.
    pub commands: AtomicU64,
    /// New versions written.
    pub versions: AtomicU64,
    /// Messages that failed to decode.
    pub parse_errors: AtomicU64,
    /// Batches rewound after a failed execution.
    pub retries: AtomicU64,
    /// Last batch execution latency in nanoseconds.
    pub last_batch_ns: AtomicU64,
}

impl ConsumerMetrics {
    /// Records an applied batch.
    pub fn record_batch(&self, messages: u64, commands: u64, versions: u64, latency_ns: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.messages.fetch_add(messages, Ordering::Relaxed);
        self.commands.fetch_add(commands, Ordering::Relaxed);
        self.versions.fetch_add(versions, Ordering::Relaxed);
        self.last_batch_ns.store(latency_ns, Ordering::Relaxed);
    }

    /// Records an undecodable message.
    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rewound batch.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the current metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            versions: self.versions.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            last_batch_ns: self.last_batch_ns.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of consumer metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Batches applied.
    pub batches: u64,
    /// Messages applied.
    pub messages: u64,
    /// Commands executed.
    pub commands: u64,
    /// Versions written.
    pub versions: u64,
    /// Undecodable messages.
    pub parse_errors: u64,
    /// Rewound batches.
    pub retries: u64,
    /// Last batch latency in nanoseconds.
    pub last_batch_ns: u64,
}
