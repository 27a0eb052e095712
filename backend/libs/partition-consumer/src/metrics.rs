//! Prometheus metrics for one partition consumer

use crate::broker::PartitionId;
use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

/// Prometheus metrics for one partition consumer.
///
/// Registered on the default registry with `topic` and `partition` const
/// labels. A second instance for the same partition fails to register; that
/// is logged and the instance still works, it just isn't exported.
#[derive(Clone)]
pub struct ConsumerMetrics {
    pub new_message_passes: IntCounter,
    pub retry_passes: IntCounter,
    pub messages_enqueued: IntCounter,
    pub stale_discarded: IntCounter,
    pub out_of_range_resets: IntCounter,
    pub transient_faults: IntCounter,
    pub backpressure_skips: IntCounter,
    pub acked: IntCounter,
    pub failed: IntCounter,
    pub abandoned: IntCounter,
    pub queue_depth: IntGauge,
    pub retry_pending: IntGauge,
    pub outstanding: IntGauge,
    pub cursor_offset: IntGauge,
}

impl ConsumerMetrics {
    pub fn new(partition: &PartitionId) -> Self {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .const_label("topic", partition.topic.clone())
                .const_label("partition", partition.partition.to_string())
        };
        let counter = |name: &str, help: &str| {
            IntCounter::with_opts(opts(name, help)).expect("valid metric opts for consumer counter")
        };
        let gauge = |name: &str, help: &str| {
            IntGauge::with_opts(opts(name, help)).expect("valid metric opts for consumer gauge")
        };

        let metrics = Self {
            new_message_passes: counter(
                "partition_consumer_new_message_passes_total",
                "Fetch cycles that read new messages at the cursor",
            ),
            retry_passes: counter(
                "partition_consumer_retry_passes_total",
                "Fetch cycles that refetched a failed offset",
            ),
            messages_enqueued: counter(
                "partition_consumer_messages_enqueued_total",
                "Messages placed in the delivery queue",
            ),
            stale_discarded: counter(
                "partition_consumer_stale_discarded_total",
                "Fetched messages dropped for preceding the requested offset",
            ),
            out_of_range_resets: counter(
                "partition_consumer_out_of_range_resets_total",
                "Cursor resets after the broker reported an out-of-range offset",
            ),
            transient_faults: counter(
                "partition_consumer_transient_faults_total",
                "Fetch cycles that ended in a transient fault",
            ),
            backpressure_skips: counter(
                "partition_consumer_backpressure_skips_total",
                "Fetch cycles skipped because the delivery queue was full",
            ),
            acked: counter(
                "partition_consumer_acked_total",
                "Delivered messages acknowledged downstream",
            ),
            failed: counter(
                "partition_consumer_failed_total",
                "Delivered messages reported as failed downstream",
            ),
            abandoned: counter(
                "partition_consumer_abandoned_total",
                "Offsets dropped from retry tracking without an acknowledgment",
            ),
            queue_depth: gauge(
                "partition_consumer_queue_depth",
                "Messages currently buffered for delivery",
            ),
            retry_pending: gauge(
                "partition_consumer_retry_pending",
                "Offsets awaiting retry or in flight after a failure",
            ),
            outstanding: gauge(
                "partition_consumer_outstanding_deliveries",
                "Emitted messages still waiting for an ack or fail",
            ),
            cursor_offset: gauge(
                "partition_consumer_cursor_offset",
                "Next offset the cursor will fetch",
            ),
        };

        metrics.register();
        metrics
    }

    fn register(&self) {
        let registry = prometheus::default_registry();

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(self.new_message_passes.clone()),
            Box::new(self.retry_passes.clone()),
            Box::new(self.messages_enqueued.clone()),
            Box::new(self.stale_discarded.clone()),
            Box::new(self.out_of_range_resets.clone()),
            Box::new(self.transient_faults.clone()),
            Box::new(self.backpressure_skips.clone()),
            Box::new(self.acked.clone()),
            Box::new(self.failed.clone()),
            Box::new(self.abandoned.clone()),
            Box::new(self.queue_depth.clone()),
            Box::new(self.retry_pending.clone()),
            Box::new(self.outstanding.clone()),
            Box::new(self.cursor_offset.clone()),
        ];

        for metric in collectors {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register partition consumer metric: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_registration_is_not_fatal() {
        let partition = PartitionId::new("metrics-test-topic", 9);
        let first = ConsumerMetrics::new(&partition);
        let second = ConsumerMetrics::new(&partition);

        first.acked.inc();
        second.acked.inc();
        assert_eq!(first.acked.get(), 1);
        assert_eq!(second.acked.get(), 1);
    }
}
