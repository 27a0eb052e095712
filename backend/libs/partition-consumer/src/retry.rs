//! Failed-offset tracking with exponential backoff
//!
//! State transitions per offset:
//! - NotTracked → AwaitingRetry: first failure, due after the initial backoff
//! - AwaitingRetry → InFlight: due retry about to be redelivered (`mark_retry_started`)
//! - InFlight → AwaitingRetry: redelivery could not be queued (`release_retry`)
//! - InFlight / AwaitingRetry → AwaitingRetry: another failure, backoff grows
//! - any → NotTracked: acknowledgment, or abandonment

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Backoff after the first failure
    pub initial_backoff: Duration,
    /// Factor applied to the backoff on each further consecutive failure
    pub backoff_multiplier: f64,
    /// Upper bound for any single backoff
    pub max_backoff: Duration,
    /// Give up on an offset after this many failures (None = never)
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(0),
            backoff_multiplier: 1.0,
            max_backoff: Duration::from_secs(60),
            max_retries: None,
        }
    }
}

impl RetryConfig {
    /// Backoff scheduled by the `failures`-th consecutive failure:
    /// `min(initial * multiplier^(failures - 1), max)`
    fn backoff_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled =
            self.initial_backoff.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);

        if self.initial_backoff.is_zero() {
            Duration::ZERO
        } else if !scaled.is_finite() || scaled >= self.max_backoff.as_nanos() as f64 {
            self.max_backoff
        } else {
            Duration::from_nanos(scaled as u64)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Failed; eligible for refetch once `due_at` has passed
    AwaitingRetry { due_at: Instant },
    /// Refetched and handed out again, outcome pending
    InFlight,
}

/// Point-in-time view of one tracked offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySnapshot {
    pub state: RetryState,
    pub backoff: Duration,
    pub failures: u32,
}

impl RetrySnapshot {
    pub fn due_at(&self) -> Option<Instant> {
        match self.state {
            RetryState::AwaitingRetry { due_at } => Some(due_at),
            RetryState::InFlight => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.state == RetryState::InFlight
    }
}

/// What `record_failure` decided for the offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Scheduled { due_at: Instant, backoff: Duration },
    /// Retry limit exceeded; the offset is no longer tracked
    Abandoned { failures: u32 },
}

#[derive(Debug)]
struct RetryEntry {
    state: RetryState,
    backoff: Duration,
    failures: u32,
}

/// Per-offset retry table.
///
/// Sole owner of its map; every access goes through the internal lock, so a
/// single instance can be shared (via `Arc`) between the fetch cycle and the
/// ack/fail callbacks.
#[derive(Debug)]
pub struct RetryManager {
    config: RetryConfig,
    entries: Mutex<BTreeMap<i64, RetryEntry>>,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Lowest offset whose backoff has elapsed and that is not in flight
    pub fn due_offset_for_retry(&self) -> Option<i64> {
        let now = Instant::now();
        let entries = self.entries.lock();

        entries.iter().find_map(|(offset, entry)| match entry.state {
            RetryState::AwaitingRetry { due_at } if due_at <= now => Some(*offset),
            _ => None,
        })
    }

    /// AwaitingRetry → InFlight, only while the offset is still due.
    ///
    /// Returns false if the offset was acknowledged, abandoned, already in
    /// flight, or rescheduled into the future since `due_offset_for_retry`
    /// reported it; the caller must not redeliver it then.
    pub fn mark_retry_started(&self, offset: i64) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(&offset) else {
            return false;
        };
        match entry.state {
            RetryState::AwaitingRetry { due_at } if due_at <= now => {
                entry.state = RetryState::InFlight;
                debug!(offset, failures = entry.failures, "Retry started");
                true
            }
            _ => false,
        }
    }

    /// InFlight → AwaitingRetry, due immediately. Undoes `mark_retry_started`
    /// when the refetched message could not be handed out. Returns false if
    /// the offset is no longer in flight.
    pub fn release_retry(&self, offset: i64) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(&offset) {
            Some(entry) if entry.state == RetryState::InFlight => {
                entry.state = RetryState::AwaitingRetry { due_at: now };
                debug!(offset, failures = entry.failures, "Retry released, due again");
                true
            }
            _ => false,
        }
    }

    /// Schedule (or reschedule) an offset for redelivery
    pub fn record_failure(&self, offset: i64) -> FailureOutcome {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let failures = entries
            .get(&offset)
            .map_or(1, |entry| entry.failures.saturating_add(1));
        let backoff = self.config.backoff_for(failures);

        if let Some(max_retries) = self.config.max_retries {
            if failures > max_retries {
                entries.remove(&offset);
                error!(
                    offset,
                    failures,
                    max_retries,
                    "Offset exceeded max retries, abandoning (message will not be redelivered)"
                );
                return FailureOutcome::Abandoned { failures };
            }
        }

        let due_at = now + backoff;
        entries.insert(
            offset,
            RetryEntry {
                state: RetryState::AwaitingRetry { due_at },
                backoff,
                failures,
            },
        );

        debug!(
            offset,
            failures,
            backoff_ms = backoff.as_millis() as u64,
            "Offset scheduled for retry"
        );

        FailureOutcome::Scheduled { due_at, backoff }
    }

    /// Resolve an offset for good, whatever state it was in
    pub fn record_acknowledgment(&self, offset: i64) {
        if let Some(entry) = self.entries.lock().remove(&offset) {
            info!(
                offset,
                failures = entry.failures,
                "Retried offset acknowledged"
            );
        }
    }

    /// Drop an offset that can no longer be fetched. Returns true if it was tracked.
    pub fn abandon(&self, offset: i64) -> bool {
        match self.entries.lock().remove(&offset) {
            Some(entry) => {
                error!(
                    offset,
                    failures = entry.failures,
                    "Offset no longer available on broker, abandoning retry"
                );
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, offset: i64) -> Option<RetrySnapshot> {
        self.entries.lock().get(&offset).map(|entry| RetrySnapshot {
            state: entry.state,
            backoff: entry.backoff,
            failures: entry.failures,
        })
    }

    pub fn is_tracked(&self, offset: i64) -> bool {
        self.entries.lock().contains_key(&offset)
    }

    /// Number of offsets awaiting retry or in flight
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
