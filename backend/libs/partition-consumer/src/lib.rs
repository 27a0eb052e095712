//! # Partition Consumer Library
//!
//! Fetch-retry-buffer engine for a single Kafka topic partition. It pulls
//! batches at a locally owned offset cursor, buffers them in a bounded
//! delivery queue, and re-delivers offsets the downstream processor reported
//! as failed, with exponential backoff.
//!
//! ## Problem
//!
//! A stream processor that hands messages one at a time to downstream work
//! needs:
//! - **Pull at its own pace**: no consumer group, no committed offsets
//! - **Retry by offset**: a failed message is refetched from the broker, not
//!   kept in memory
//! - **Survive retention**: an offset deleted by the broker must not wedge
//!   the consumer
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────── FetchCycle ─────────────┐
//! Broker ──► │ retry due? ─► refetch one offset    │ ──► DeliveryQueue ──► host
//!            │ else       ─► batch at OffsetCursor │          ▲              │
//!            └─────────────────────────────────────┘          │         ack / fail
//!                             ▲                                │              │
//!                             └──────── RetryManager ◄──── DeliveryTracker ◄──┘
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use partition_consumer::{ConsumerConfig, PartitionConsumer, RdKafkaBrokerClient};
//! use std::sync::Arc;
//!
//! # async fn example() -> partition_consumer::ConsumerResult<()> {
//! let config = ConsumerConfig::from_env()?;
//! let client = Arc::new(RdKafkaBrokerClient::new(&config)?);
//! let mut consumer = PartitionConsumer::open(&config, client).await?;
//!
//! loop {
//!     consumer.run_fetch_cycle().await;
//!
//!     while let Some(message) = consumer.poll_next_deliverable() {
//!         match process(&message.payload).await {
//!             Ok(()) => consumer.on_ack(&message.identity),
//!             Err(_) => consumer.on_fail(&message.identity),
//!         }
//!     }
//! }
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - At-least-once within one process lifetime; nothing survives a restart
//! - The cursor never moves backwards
//! - Retry passes never move the cursor
//! - Broker faults are handled inside `run_fetch_cycle` and never reach the host

pub mod broker;
pub mod config;
pub mod consumer;
pub mod cursor;
pub mod error;
pub mod fetch;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod telemetry;
pub mod tracker;

pub use broker::{BrokerClient, FetchedMessage, PartitionId};
pub use config::ConsumerConfig;
pub use consumer::PartitionConsumer;
pub use cursor::OffsetCursor;
pub use error::{ConfigError, ConsumerError, ConsumerResult, FetchError};
pub use fetch::{FetchCycle, FetchOutcome};
#[cfg(feature = "kafka")]
pub use kafka::RdKafkaBrokerClient;
pub use message::{BufferedMessage, MessageIdentity, MessageType};
pub use metrics::ConsumerMetrics;
pub use queue::{DeliveryQueue, OrderingPolicy, PushError};
pub use retry::{FailureOutcome, RetryConfig, RetryManager, RetrySnapshot, RetryState};
pub use telemetry::init_tracing;
pub use tracker::DeliveryTracker;
