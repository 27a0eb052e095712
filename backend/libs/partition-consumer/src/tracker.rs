//! Routes ack/fail outcomes for emitted messages back to the retry table

use crate::message::MessageIdentity;
use crate::metrics::ConsumerMetrics;
use crate::retry::{FailureOutcome, RetryManager};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Cloneable handle the host scheduler's ack/fail callbacks go through.
///
/// Routing only looks at the identity's offset. The record of emitted
/// attempts feeds `outstanding()` and never gates an ack or a fail, so
/// outcomes for identities emitted before a restart still land.
#[derive(Clone)]
pub struct DeliveryTracker {
    retries: Arc<RetryManager>,
    emitted: Arc<DashMap<Uuid, i64>>,
    metrics: Option<ConsumerMetrics>,
}

impl DeliveryTracker {
    pub fn new(retries: Arc<RetryManager>) -> Self {
        Self {
            retries,
            emitted: Arc::new(DashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(retries: Arc<RetryManager>, metrics: ConsumerMetrics) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new(retries)
        }
    }

    /// Remember an identity handed to the emit path
    pub fn track(&self, identity: &MessageIdentity) {
        self.emitted.insert(identity.attempt_id(), identity.offset());
        self.update_outstanding();
    }

    pub fn on_ack(&self, identity: &MessageIdentity) {
        self.forget(identity);
        self.retries.record_acknowledgment(identity.offset());

        debug!(offset = identity.offset(), attempt_id = %identity.attempt_id(), "Message acked");
        if let Some(metrics) = &self.metrics {
            metrics.acked.inc();
        }
    }

    pub fn on_fail(&self, identity: &MessageIdentity) {
        self.forget(identity);
        let outcome = self.retries.record_failure(identity.offset());

        warn!(
            offset = identity.offset(),
            attempt_id = %identity.attempt_id(),
            kind = %identity.kind(),
            outcome = ?outcome,
            "Message failed"
        );

        if let Some(metrics) = &self.metrics {
            metrics.failed.inc();
            if let FailureOutcome::Abandoned { .. } = outcome {
                metrics.abandoned.inc();
            }
            metrics.retry_pending.set(self.retries.len() as i64);
        }
    }

    /// Emitted attempts still waiting for an ack or fail
    pub fn outstanding(&self) -> usize {
        self.emitted.len()
    }

    fn forget(&self, identity: &MessageIdentity) {
        if self.emitted.remove(&identity.attempt_id()).is_none() {
            debug!(
                offset = identity.offset(),
                attempt_id = %identity.attempt_id(),
                "Outcome for an attempt this tracker did not emit"
            );
        }
        self.update_outstanding();
    }

    fn update_outstanding(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.outstanding.set(self.emitted.len() as i64);
        }
    }
}
