//! Error types for the partition consumer library

use thiserror::Error;

/// Result type for consumer operations
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Errors surfaced by the consumer engine.
///
/// Fetch faults never reach the host scheduler through `run_fetch_cycle`;
/// they only show up here when a caller talks to the broker directly
/// (e.g. `PartitionConsumer::open` looking up the starting offset).
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Broker-side fetch or offset lookup failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// The delivery queue was closed while an operation was waiting on it.
    ///
    /// This is a request to stop the current unit of work, not a failure.
    #[error("Delivery queue closed")]
    QueueClosed,

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Kafka client could not be created
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl ConsumerError {
    /// Check if error is a cooperative shutdown signal
    pub fn is_interrupt(&self) -> bool {
        matches!(self, ConsumerError::QueueClosed)
    }
}

/// Faults reported by the broker-client collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Requested offset no longer exists in the partition's retained log
    #[error("Offset {offset} out of range")]
    OutOfRange { offset: i64 },

    /// Broker returned no usable response (null/malformed message set)
    #[error("Empty or malformed fetch response")]
    EmptyResponse,

    /// Call did not complete within the connection timeout
    #[error("Fetch timed out after {0} ms")]
    Timeout(u64),

    /// Any other broker or transport failure
    #[error("Transient fetch failure: {0}")]
    Transient(String),
}

impl FetchError {
    /// Out-of-range is the only fault that moves the cursor; everything
    /// else is retried by the next cycle without touching state.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, FetchError::OutOfRange { .. })
    }

    pub fn is_transient(&self) -> bool {
        !self.is_out_of_range()
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable missing or not parseable
    #[error("Environment error: {0}")]
    Env(#[from] envy::Error),

    /// A value parsed but is not usable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_classification() {
        assert!(FetchError::OutOfRange { offset: 10 }.is_out_of_range());
        assert!(!FetchError::OutOfRange { offset: 10 }.is_transient());
        assert!(FetchError::EmptyResponse.is_transient());
        assert!(FetchError::Timeout(100).is_transient());
        assert!(FetchError::Transient("broker down".to_string()).is_transient());
    }

    #[test]
    fn test_queue_closed_is_interrupt() {
        assert!(ConsumerError::QueueClosed.is_interrupt());
        assert!(!ConsumerError::Fetch(FetchError::EmptyResponse).is_interrupt());
    }
}
