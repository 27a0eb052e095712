//! Partition consumer facade driven by the host scheduler

use crate::broker::BrokerClient;
use crate::config::ConsumerConfig;
use crate::cursor::OffsetCursor;
use crate::error::{ConsumerResult, FetchError};
use crate::fetch::{FetchCycle, FetchOutcome};
use crate::message::{BufferedMessage, MessageIdentity};
use crate::metrics::ConsumerMetrics;
use crate::queue::DeliveryQueue;
use crate::retry::RetryManager;
use crate::tracker::DeliveryTracker;
use std::sync::Arc;
use tracing::info;

/// Fetch-retry-buffer engine for one partition.
///
/// The host scheduler drives it:
/// 1. `run_fetch_cycle()` to pull at most one batch into the delivery queue
/// 2. `poll_next_deliverable()` to hand one message downstream
/// 3. `on_ack` / `on_fail` (here or on a [`DeliveryTracker`] handle) once the
///    downstream outcome is known
///
/// Nothing is persisted. After a restart the consumer starts from wherever
/// it is opened, and messages fetched but not acked before shutdown may be
/// delivered again.
pub struct PartitionConsumer<B: BrokerClient> {
    fetch: FetchCycle<B>,
    retries: Arc<RetryManager>,
    queue: Arc<DeliveryQueue>,
    tracker: DeliveryTracker,
    metrics: Option<ConsumerMetrics>,
}

impl<B: BrokerClient> PartitionConsumer<B> {
    /// Create a consumer starting at `start_offset`
    pub fn new(config: &ConsumerConfig, client: Arc<B>, start_offset: i64) -> Self {
        Self::build(config, client, start_offset, None)
    }

    /// Same as `new`, also exporting Prometheus metrics for the partition
    pub fn new_with_metrics(config: &ConsumerConfig, client: Arc<B>, start_offset: i64) -> Self {
        let metrics = ConsumerMetrics::new(&config.partition_id());
        Self::build(config, client, start_offset, Some(metrics))
    }

    /// Create a consumer positioned at the partition's latest offset, so only
    /// messages produced from now on are delivered.
    pub async fn open(config: &ConsumerConfig, client: Arc<B>) -> ConsumerResult<Self> {
        config.validate()?;
        let partition = config.partition_id();

        let start_offset = tokio::time::timeout(
            config.connection_timeout(),
            client.latest_offset(&partition),
        )
        .await
        .map_err(|_| FetchError::Timeout(config.connection_timeout_ms))??;

        info!(
            partition = %partition,
            client_id = %config.client_id,
            start_offset,
            queue_capacity = config.queue_capacity,
            ordering = ?config.ordering,
            "Partition consumer opened"
        );

        Ok(Self::new_with_metrics(config, client, start_offset))
    }

    fn build(
        config: &ConsumerConfig,
        client: Arc<B>,
        start_offset: i64,
        metrics: Option<ConsumerMetrics>,
    ) -> Self {
        let retries = Arc::new(RetryManager::new(config.retry_config()));
        let queue = Arc::new(DeliveryQueue::new(config.queue_capacity, config.ordering));
        let cursor = OffsetCursor::new(config.partition_id(), start_offset);

        let mut fetch = FetchCycle::new(
            client,
            cursor,
            retries.clone(),
            queue.clone(),
            config.message_type,
            config.connection_timeout(),
        );
        let tracker = match &metrics {
            Some(metrics) => {
                fetch = fetch.with_metrics(metrics.clone());
                DeliveryTracker::with_metrics(retries.clone(), metrics.clone())
            }
            None => DeliveryTracker::new(retries.clone()),
        };

        Self {
            fetch,
            retries,
            queue,
            tracker,
            metrics,
        }
    }

    /// One fetch pass; faults are handled inside and reported in the outcome
    pub async fn run_fetch_cycle(&mut self) -> FetchOutcome {
        self.fetch.run().await
    }

    /// Next buffered message, without waiting
    pub fn poll_next_deliverable(&self) -> Option<BufferedMessage> {
        let message = self.queue.try_pop()?;
        self.emitted(&message);
        Some(message)
    }

    /// Next buffered message, waiting until one arrives.
    ///
    /// Returns `ConsumerError::QueueClosed` after `shutdown`.
    pub async fn next_deliverable(&self) -> ConsumerResult<BufferedMessage> {
        let message = self.queue.pop().await?;
        self.emitted(&message);
        Ok(message)
    }

    pub fn on_ack(&self, identity: &MessageIdentity) {
        self.tracker.on_ack(identity);
    }

    pub fn on_fail(&self, identity: &MessageIdentity) {
        self.tracker.on_fail(identity);
    }

    /// Handle for ack/fail callbacks running on other tasks
    pub fn tracker(&self) -> DeliveryTracker {
        self.tracker.clone()
    }

    pub fn queue(&self) -> Arc<DeliveryQueue> {
        self.queue.clone()
    }

    pub fn retries(&self) -> &Arc<RetryManager> {
        &self.retries
    }

    pub fn cursor(&self) -> &OffsetCursor {
        self.fetch.cursor()
    }

    /// Stop accepting messages and wake anything blocked on the queue.
    ///
    /// Retry and in-flight state is dropped with the consumer.
    pub fn shutdown(&self) {
        self.queue.close();

        info!(
            partition = %self.cursor().partition(),
            next_offset = self.cursor().next_offset(),
            buffered = self.queue.len(),
            retry_pending = self.retries.len(),
            outstanding = self.tracker.outstanding(),
            "Partition consumer shut down, undelivered state discarded"
        );
    }

    fn emitted(&self, message: &BufferedMessage) {
        self.tracker.track(&message.identity);
        if let Some(metrics) = &self.metrics {
            metrics.queue_depth.set(self.queue.len() as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{FetchedMessage, PartitionId};
    use crate::error::ConsumerError;
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::predicate::eq;
    use std::time::Duration;

    mock! {
        pub Broker {}

        #[async_trait]
        impl BrokerClient for Broker {
            async fn fetch_batch(
                &self,
                partition: &PartitionId,
                offset: i64,
            ) -> Result<Vec<FetchedMessage>, FetchError>;

            async fn latest_offset(&self, partition: &PartitionId) -> Result<i64, FetchError>;
        }
    }

    fn config() -> ConsumerConfig {
        ConsumerConfig {
            topic: "consumer-facade-test".to_string(),
            queue_capacity: 8,
            ..ConsumerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_starts_at_latest_offset() {
        let mut broker = MockBroker::new();
        broker.expect_latest_offset().times(1).returning(|_| Ok(1_000));
        broker
            .expect_fetch_batch()
            .with(mockall::predicate::always(), eq(1_000))
            .returning(|_, _| Ok(Vec::new()));

        let mut consumer = PartitionConsumer::open(&config(), Arc::new(broker))
            .await
            .unwrap();
        assert_eq!(consumer.cursor().next_offset(), 1_000);

        consumer.run_fetch_cycle().await;
        assert!(consumer.poll_next_deliverable().is_none());
    }

    #[tokio::test]
    async fn test_open_propagates_lookup_failure() {
        let mut broker = MockBroker::new();
        broker
            .expect_latest_offset()
            .returning(|_| Err(FetchError::Transient("no leader".to_string())));

        let result = PartitionConsumer::open(&config(), Arc::new(broker)).await;
        assert!(matches!(
            result,
            Err(ConsumerError::Fetch(FetchError::Transient(_)))
        ));
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let mut broker = MockBroker::new();
        broker.expect_latest_offset().times(0);

        let invalid = ConsumerConfig {
            queue_capacity: 0,
            ..config()
        };
        let result = PartitionConsumer::open(&invalid, Arc::new(broker)).await;
        assert!(matches!(result, Err(ConsumerError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_then_retry_then_ack() {
        let mut broker = MockBroker::new();
        broker
            .expect_fetch_batch()
            .returning(|_, offset| Ok(vec![FetchedMessage::new(offset, b"payload".to_vec())]));

        let config = ConsumerConfig {
            retry_initial_backoff_ms: 1_000,
            ..config()
        };
        let mut consumer = PartitionConsumer::new(&config, Arc::new(broker), 7);

        consumer.run_fetch_cycle().await;
        let first = consumer.poll_next_deliverable().unwrap();
        assert_eq!(first.offset(), 7);
        assert_eq!(consumer.tracker().outstanding(), 1);

        consumer.on_fail(&first.identity);
        assert_eq!(consumer.tracker().outstanding(), 0);
        assert!(consumer.retries().is_tracked(7));

        // Not due yet: the pass reads new messages at the cursor
        assert!(matches!(
            consumer.run_fetch_cycle().await,
            FetchOutcome::NewMessages { requested: 8, .. }
        ));
        assert_eq!(consumer.poll_next_deliverable().unwrap().offset(), 8);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert_eq!(
            consumer.run_fetch_cycle().await,
            FetchOutcome::RetryEnqueued { offset: 7 }
        );

        let retry = consumer.poll_next_deliverable().unwrap();
        assert_eq!(retry.offset(), 7);
        assert_ne!(retry.identity.attempt_id(), first.identity.attempt_id());
        assert!(consumer.retries().snapshot(7).unwrap().is_in_flight());

        consumer.on_ack(&retry.identity);
        assert!(!consumer.retries().is_tracked(7));
        assert_eq!(consumer.cursor().next_offset(), 9);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_waiting_consumer() {
        let broker = MockBroker::new();
        let consumer = Arc::new(PartitionConsumer::new(&config(), Arc::new(broker), 0));

        let waiter = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.next_deliverable().await })
        };
        tokio::task::yield_now().await;

        consumer.shutdown();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ConsumerError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_tracker_handle_routes_to_same_retries() {
        let mut broker = MockBroker::new();
        broker
            .expect_fetch_batch()
            .returning(|_, _| Ok(vec![FetchedMessage::new(3, b"x".to_vec())]));

        let mut consumer = PartitionConsumer::new(&config(), Arc::new(broker), 3);
        consumer.run_fetch_cycle().await;
        let message = consumer.poll_next_deliverable().unwrap();

        let handle = consumer.tracker();
        handle.on_fail(&message.identity);

        assert!(consumer.retries().is_tracked(3));
        assert_eq!(consumer.tracker().outstanding(), 0);
    }
}
