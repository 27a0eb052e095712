//! Broker-client boundary
//!
//! The engine never speaks the wire protocol itself. Anything that can fetch
//! a batch at an offset and report the partition's latest offset can drive
//! it: the rdkafka client behind the `kafka` feature, or an in-memory fake in
//! tests.

use crate::error::FetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Topic + partition number
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionId {
    pub topic: String,
    pub partition: i32,
}

impl PartitionId {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// One message as returned by a batch fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub offset: i64,
    /// Offset to fetch after this message (normally `offset + 1`)
    pub next_offset: i64,
    pub payload: Vec<u8>,
}

impl FetchedMessage {
    pub fn new(offset: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            offset,
            next_offset: offset + 1,
            payload: payload.into(),
        }
    }
}

/// Broker operations the fetch cycle depends on.
///
/// Implementations must report a deleted/expired offset as
/// [`FetchError::OutOfRange`]; every other error is treated as transient.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Fetch one batch starting at `offset`.
    ///
    /// The batch may begin before `offset` (compressed sets are returned
    /// whole); the caller filters those out.
    async fn fetch_batch(
        &self,
        partition: &PartitionId,
        offset: i64,
    ) -> Result<Vec<FetchedMessage>, FetchError>;

    /// Offset the next produced message will get (high watermark)
    async fn latest_offset(&self, partition: &PartitionId) -> Result<i64, FetchError>;
}
