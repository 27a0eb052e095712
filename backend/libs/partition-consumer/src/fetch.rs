//! One fetch pass over a partition
//!
//! Each call to [`FetchCycle::run`] issues at most one batch fetch:
//! - a due retry offset wins over new messages; the pass marks just that
//!   offset in flight and enqueues it
//! - otherwise the pass reads at the cursor, enqueues what fits in the
//!   delivery queue and advances the cursor past it
//!
//! Faults never escape. Out-of-range moves the cursor to the broker's latest
//! offset; anything else is logged and the same offset is tried again on the
//! next call.

use crate::broker::{BrokerClient, FetchedMessage};
use crate::cursor::OffsetCursor;
use crate::error::FetchError;
use crate::message::{BufferedMessage, MessageIdentity, MessageType};
use crate::metrics::ConsumerMetrics;
use crate::queue::{DeliveryQueue, PushError};
use crate::retry::RetryManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Summary of a single fetch pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Read at the cursor
    NewMessages {
        requested: i64,
        enqueued: usize,
        stale: usize,
        /// Messages left for a later pass because the queue filled up
        deferred: usize,
    },
    /// Due retry offset refetched and queued for redelivery
    RetryEnqueued { offset: i64 },
    /// Due retry offset fetched but the queue had no room; still awaiting retry
    RetryDeferred { offset: i64 },
    /// Due retry offset no longer exists on the broker
    RetryAbandoned { offset: i64 },
    /// Due retry offset was acked, failed again or abandoned during the fetch
    RetrySkipped { offset: i64 },
    /// Queue full, nothing fetched
    Backpressure,
    /// Broker reported the requested offset out of range
    OutOfRange {
        requested: i64,
        /// Cursor position after the reset, if the latest offset could be read
        reset_to: Option<i64>,
    },
    /// Fetch failed; nothing changed
    TransientFault { requested: i64, error: FetchError },
}

pub struct FetchCycle<B: BrokerClient> {
    client: Arc<B>,
    cursor: OffsetCursor,
    retries: Arc<RetryManager>,
    queue: Arc<DeliveryQueue>,
    message_type: MessageType,
    fetch_timeout: Duration,
    metrics: Option<ConsumerMetrics>,
}

impl<B: BrokerClient> FetchCycle<B> {
    pub fn new(
        client: Arc<B>,
        cursor: OffsetCursor,
        retries: Arc<RetryManager>,
        queue: Arc<DeliveryQueue>,
        message_type: MessageType,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            client,
            cursor,
            retries,
            queue,
            message_type,
            fetch_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ConsumerMetrics) -> Self {
        metrics.cursor_offset.set(self.cursor.next_offset());
        self.metrics = Some(metrics);
        self
    }

    pub fn cursor(&self) -> &OffsetCursor {
        &self.cursor
    }

    /// Run one pass. Never returns an error; see [`FetchOutcome`].
    pub async fn run(&mut self) -> FetchOutcome {
        let outcome = match self.retries.due_offset_for_retry() {
            Some(offset) => self.retry_pass(offset).await,
            None => self.new_message_pass().await,
        };

        self.update_gauges();
        outcome
    }

    async fn new_message_pass(&mut self) -> FetchOutcome {
        let requested = self.cursor.next_offset();

        if self.queue.remaining_capacity() == 0 {
            debug!(
                partition = %self.cursor.partition(),
                offset = requested,
                "Delivery queue full, skipping fetch"
            );
            self.count(|m| &m.backpressure_skips);
            return FetchOutcome::Backpressure;
        }

        let batch = match self.fetch(requested).await {
            Ok(batch) => batch,
            Err(FetchError::OutOfRange { .. }) => {
                return self.reset_after_out_of_range(requested).await
            }
            Err(e) => return self.transient_fault(requested, e),
        };
        self.count(|m| &m.new_message_passes);

        let mut enqueued = 0;
        let mut stale = 0;
        let mut deferred = 0;
        let mut highest_next_offset = None;

        let mut messages = batch.into_iter();
        while let Some(message) = messages.next() {
            if message.offset < requested {
                stale += 1;
                continue;
            }

            let next_offset = message.next_offset;
            match self.queue.try_push(self.buffer(message)) {
                Ok(()) => {
                    enqueued += 1;
                    highest_next_offset = highest_next_offset.max(Some(next_offset));
                }
                Err(e) => {
                    // Everything from here on is refetched once there is room
                    deferred = 1 + messages
                        .by_ref()
                        .filter(|m| m.offset >= requested)
                        .count();
                    debug!(
                        partition = %self.cursor.partition(),
                        offset = e.into_inner().offset(),
                        deferred,
                        "Delivery queue rejected message, deferring rest of batch"
                    );
                    break;
                }
            }
        }

        if let Some(next_offset) = highest_next_offset {
            self.cursor.advance(next_offset);
        }

        if stale > 0 {
            debug!(
                partition = %self.cursor.partition(),
                requested,
                stale,
                "Discarded messages preceding requested offset"
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.messages_enqueued.inc_by(enqueued as u64);
            metrics.stale_discarded.inc_by(stale as u64);
        }

        debug!(
            partition = %self.cursor.partition(),
            requested,
            enqueued,
            next_offset = self.cursor.next_offset(),
            "New message pass complete"
        );

        FetchOutcome::NewMessages {
            requested,
            enqueued,
            stale,
            deferred,
        }
    }

    async fn retry_pass(&mut self, offset: i64) -> FetchOutcome {
        if self.queue.remaining_capacity() == 0 {
            debug!(offset, "Delivery queue full, postponing retry");
            self.count(|m| &m.backpressure_skips);
            return FetchOutcome::Backpressure;
        }

        let batch = match self.fetch(offset).await {
            Ok(batch) => batch,
            Err(FetchError::OutOfRange { .. }) => {
                // Drop the entry instead of leaving it due: a deleted offset
                // fails out of range on every later attempt. The cursor is
                // checked by the next new-message pass.
                self.retries.abandon(offset);
                self.count(|m| &m.abandoned);
                return FetchOutcome::RetryAbandoned { offset };
            }
            Err(e) => return self.transient_fault(offset, e),
        };
        self.count(|m| &m.retry_passes);

        let skipped_past = batch.iter().any(|m| m.offset > offset);
        let Some(message) = batch.into_iter().find(|m| m.offset == offset) else {
            if skipped_past {
                self.retries.abandon(offset);
                self.count(|m| &m.abandoned);
                return FetchOutcome::RetryAbandoned { offset };
            }
            return self.transient_fault(offset, FetchError::EmptyResponse);
        };

        // In flight before it becomes visible in the queue, so an outcome
        // for the redelivered attempt always lands after the transition
        if !self.retries.mark_retry_started(offset) {
            debug!(offset, "Retry state changed while fetching, not redelivering");
            return FetchOutcome::RetrySkipped { offset };
        }

        match self.queue.try_push(self.buffer(message)) {
            Ok(()) => {
                self.count(|m| &m.messages_enqueued);
                info!(
                    partition = %self.cursor.partition(),
                    offset,
                    "Failed offset re-enqueued for delivery"
                );
                FetchOutcome::RetryEnqueued { offset }
            }
            Err(PushError::Full(_)) | Err(PushError::Closed(_)) => {
                self.retries.release_retry(offset);
                debug!(offset, "Delivery queue rejected retry, leaving it due");
                FetchOutcome::RetryDeferred { offset }
            }
        }
    }

    async fn reset_after_out_of_range(&mut self, requested: i64) -> FetchOutcome {
        let partition = self.cursor.partition().clone();

        let latest = match tokio::time::timeout(
            self.fetch_timeout,
            self.client.latest_offset(&partition),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout.as_millis() as u64)),
        };

        match latest {
            Ok(latest) => {
                warn!(
                    partition = %partition,
                    requested,
                    latest,
                    "Fetch offset out of range on broker"
                );
                self.cursor.reset_to_latest(latest);
                self.count(|m| &m.out_of_range_resets);
                FetchOutcome::OutOfRange {
                    requested,
                    reset_to: Some(self.cursor.next_offset()),
                }
            }
            Err(e) => {
                error!(
                    partition = %partition,
                    requested,
                    error = %e,
                    "Offset out of range and latest offset lookup failed"
                );
                self.count(|m| &m.transient_faults);
                FetchOutcome::OutOfRange {
                    requested,
                    reset_to: None,
                }
            }
        }
    }

    fn transient_fault(&self, requested: i64, error: FetchError) -> FetchOutcome {
        error!(
            partition = %self.cursor.partition(),
            offset = requested,
            error = %error,
            "Could not consume messages"
        );
        self.count(|m| &m.transient_faults);
        FetchOutcome::TransientFault { requested, error }
    }

    async fn fetch(&self, offset: i64) -> Result<Vec<FetchedMessage>, FetchError> {
        let partition = self.cursor.partition();

        match tokio::time::timeout(self.fetch_timeout, self.client.fetch_batch(partition, offset))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout.as_millis() as u64)),
        }
    }

    fn buffer(&self, message: FetchedMessage) -> BufferedMessage {
        BufferedMessage::new(
            message.payload,
            MessageIdentity::new(message.offset, self.message_type),
        )
    }

    fn count<F>(&self, pick: F)
    where
        F: FnOnce(&ConsumerMetrics) -> &prometheus::IntCounter,
    {
        if let Some(metrics) = &self.metrics {
            pick(metrics).inc();
        }
    }

    fn update_gauges(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.queue_depth.set(self.queue.len() as i64);
            metrics.retry_pending.set(self.retries.len() as i64);
            metrics.cursor_offset.set(self.cursor.next_offset());
        }
    }
}
