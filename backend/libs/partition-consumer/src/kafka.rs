//! rdkafka-backed [`BrokerClient`]
//!
//! Uses a `BaseConsumer` with manual assignment: every fetch re-assigns the
//! partition at the requested offset and drains what the client has buffered.
//! No consumer group, no offset commits; the engine owns the position.
//! `auto.offset.reset=error` makes a deleted offset surface as an error
//! instead of being silently reset by librdkafka.

use crate::broker::{BrokerClient, FetchedMessage, PartitionId};
use crate::config::ConsumerConfig;
use crate::error::{ConsumerResult, FetchError};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct RdKafkaBrokerClient {
    consumer: Arc<BaseConsumer>,
    fetch_max_bytes: usize,
    poll_timeout: Duration,
}

impl RdKafkaBrokerClient {
    pub fn new(config: &ConsumerConfig) -> ConsumerResult<Self> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("client.id", &config.client_id)
            .set("group.id", &config.client_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "error")
            .set("socket.timeout.ms", config.connection_timeout_ms.to_string())
            .set("fetch.message.max.bytes", config.fetch_max_bytes.to_string())
            .create()?;

        info!(
            bootstrap_servers = %config.bootstrap_servers(),
            client_id = %config.client_id,
            coordination = %config.coordination_connect,
            "Kafka broker client created"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            fetch_max_bytes: config.fetch_max_bytes,
            // Leave headroom under the engine's own fetch timeout
            poll_timeout: config.connection_timeout() / 2,
        })
    }
}

#[async_trait]
impl BrokerClient for RdKafkaBrokerClient {
    async fn fetch_batch(
        &self,
        partition: &PartitionId,
        offset: i64,
    ) -> Result<Vec<FetchedMessage>, FetchError> {
        let consumer = self.consumer.clone();
        let partition = partition.clone();
        let max_bytes = self.fetch_max_bytes;
        let poll_timeout = self.poll_timeout;

        tokio::task::spawn_blocking(move || {
            fetch_blocking(&consumer, &partition, offset, max_bytes, poll_timeout)
        })
        .await
        .map_err(|e| FetchError::Transient(format!("fetch task failed: {}", e)))?
    }

    async fn latest_offset(&self, partition: &PartitionId) -> Result<i64, FetchError> {
        let consumer = self.consumer.clone();
        let partition = partition.clone();
        let timeout = self.poll_timeout;

        tokio::task::spawn_blocking(move || {
            consumer
                .fetch_watermarks(&partition.topic, partition.partition, timeout)
                .map(|(_low, high)| high)
                .map_err(transient)
        })
        .await
        .map_err(|e| FetchError::Transient(format!("watermark task failed: {}", e)))?
    }
}

fn fetch_blocking(
    consumer: &BaseConsumer,
    partition: &PartitionId,
    offset: i64,
    max_bytes: usize,
    poll_timeout: Duration,
) -> Result<Vec<FetchedMessage>, FetchError> {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition_offset(&partition.topic, partition.partition, Offset::Offset(offset))
        .map_err(transient)?;
    consumer.assign(&tpl).map_err(transient)?;

    let mut batch = Vec::new();
    let mut bytes = 0usize;

    loop {
        // Wait for the first message only; afterwards take what is already buffered
        let wait = if batch.is_empty() {
            poll_timeout
        } else {
            Duration::ZERO
        };

        match consumer.poll(wait) {
            None => break,
            Some(Ok(message)) => {
                let payload = message.payload().unwrap_or_default().to_vec();
                bytes += payload.len();
                batch.push(FetchedMessage::new(message.offset(), payload));

                if bytes >= max_bytes {
                    break;
                }
            }
            Some(Err(e)) if is_out_of_range(&e) => {
                return Err(FetchError::OutOfRange { offset });
            }
            Some(Err(e)) => {
                if batch.is_empty() {
                    return Err(transient(e));
                }
                debug!(error = %e, "Fetch ended early, returning partial batch");
                break;
            }
        }
    }

    Ok(batch)
}

fn is_out_of_range(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::OffsetOutOfRange) | Some(RDKafkaErrorCode::AutoOffsetReset)
    )
}

fn transient(error: KafkaError) -> FetchError {
    FetchError::Transient(error.to_string())
}
