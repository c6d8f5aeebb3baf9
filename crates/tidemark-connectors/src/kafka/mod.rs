//! Kafka change source.
//!
//! One [`KafkaChangeSource`] wraps one group member. The pipeline creates
//! a generation of them through [`KafkaSourceFactory`] and tears the whole
//! generation down when a rebalance revokes partitions.

mod config;
mod rebalance;
mod source;

pub use config::{KafkaSourceConfig, TopicSubscription};
pub use rebalance::{RebalanceState, TidemarkConsumerContext};
pub use source::{KafkaChangeSource, KafkaSourceFactory};
