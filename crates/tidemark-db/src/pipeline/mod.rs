//! Stream coordinator and consumer tasks.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌────────────┐
//! │ Consumer 0 │   │ Consumer 1 │   │ Consumer N │   one task per source
//! │  poll      │   │  poll      │   │  poll      │   (N > 0 only while resyncing)
//! │  decode    │   │  decode    │   │  decode    │
//! │  rewrite   │   │  rewrite   │   │  rewrite   │
//! │  execute   │   │  execute   │   │  execute   │
//! │  commit    │   │  commit    │   │  commit    │
//! └─────┬──────┘   └─────┬──────┘   └─────┬──────┘
//!       └────────────────┼────────────────┘
//!                        ▼
//!               ┌─────────────────┐
//!               │     Barrier     │  restart / stop
//!               └────────┬────────┘
//!                        ▼
//!               ┌─────────────────┐
//!               │   Coordinator   │  next generation, maintenance
//!               └─────────────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod watchdog;
mod worker;

pub use config::PipelineConfig;
pub use coordinator::StreamCoordinator;
pub use metrics::{ConsumerMetrics, MetricsSnapshot};
pub use watchdog::{check_snapshot, snapshot_looks_complete};
