//! Configuration for the partition consumer
//!
//! Loaded once at startup from `PARTITION_CONSUMER_*` environment variables
//! (a `.env` file is honoured), with defaults for everything.

use crate::broker::PartitionId;
use crate::error::ConfigError;
use crate::message::MessageType;
use crate::queue::OrderingPolicy;
use crate::retry::RetryConfig;
use serde::Deserialize;
use std::time::Duration;

pub const ENV_PREFIX: &str = "PARTITION_CONSUMER_";

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_broker_host")]
    pub broker_host: String,
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    #[serde(default)]
    pub partition: i32,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Coordination service (ZooKeeper) connection string
    #[serde(default = "default_coordination_connect")]
    pub coordination_connect: String,
    /// Upper bound on bytes returned by one batch fetch
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub ordering: OrderingPolicy,
    /// Type tag stamped on every message fetched from this partition
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub retry_initial_backoff_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,
    #[serde(default)]
    pub retry_max_retries: Option<u32>,
}

fn default_topic() -> String {
    "phish-storm-request".to_string()
}

fn default_client_id() -> String {
    "phish-storm-client".to_string()
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    9092
}

fn default_connection_timeout_ms() -> u64 {
    100_000
}

fn default_coordination_connect() -> String {
    "localhost:2181".to_string()
}

fn default_fetch_max_bytes() -> usize {
    64 * 1024
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_retry_backoff_multiplier() -> f64 {
    1.0
}

fn default_retry_max_backoff_ms() -> u64 {
    60_000
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            client_id: default_client_id(),
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            partition: 0,
            connection_timeout_ms: default_connection_timeout_ms(),
            coordination_connect: default_coordination_connect(),
            fetch_max_bytes: default_fetch_max_bytes(),
            queue_capacity: default_queue_capacity(),
            ordering: OrderingPolicy::default(),
            message_type: MessageType::default(),
            retry_initial_backoff_ms: 0,
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            retry_max_retries: None,
        }
    }
}

impl ConsumerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let config: ConsumerConfig = envy::prefixed(ENV_PREFIX).from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from explicit `(NAME, value)` pairs (names carry the prefix)
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: ConsumerConfig = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("topic cannot be empty".to_string()));
        }
        if self.partition < 0 {
            return Err(ConfigError::Invalid(format!(
                "partition must be >= 0, got {}",
                self.partition
            )));
        }
        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be > 0".to_string(),
            ));
        }
        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry_backoff_multiplier must be a finite value >= 1.0, got {}",
                self.retry_backoff_multiplier
            )));
        }
        if self.retry_initial_backoff_ms > self.retry_max_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "retry_initial_backoff_ms ({}) exceeds retry_max_backoff_ms ({})",
                self.retry_initial_backoff_ms, self.retry_max_backoff_ms
            )));
        }
        Ok(())
    }

    pub fn partition_id(&self) -> PartitionId {
        PartitionId::new(self.topic.clone(), self.partition)
    }

    pub fn bootstrap_servers(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
            backoff_multiplier: self.retry_backoff_multiplier,
            max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
            max_retries: self.retry_max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = ConsumerConfig::from_vars(Vec::new()).unwrap();

        assert_eq!(config.topic, "phish-storm-request");
        assert_eq!(config.client_id, "phish-storm-client");
        assert_eq!(config.bootstrap_servers(), "localhost:9092");
        assert_eq!(config.partition, 0);
        assert_eq!(config.connection_timeout(), Duration::from_secs(100));
        assert_eq!(config.coordination_connect, "localhost:2181");
        assert_eq!(config.fetch_max_bytes, 65536);
        assert_eq!(config.ordering, OrderingPolicy::Offset);
        assert_eq!(config.message_type, MessageType::Primary);
        assert_eq!(config.retry_config(), RetryConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = ConsumerConfig::from_vars(vars(&[
            ("TOPIC", "classifier-requests"),
            ("BROKER_HOST", "kafka-0"),
            ("BROKER_PORT", "19092"),
            ("PARTITION", "3"),
            ("ORDERING", "arrival"),
            ("MESSAGE_TYPE", "derived_classification"),
            ("RETRY_INITIAL_BACKOFF_MS", "1000"),
            ("RETRY_BACKOFF_MULTIPLIER", "2.0"),
            ("RETRY_MAX_RETRIES", "5"),
        ]))
        .unwrap();

        assert_eq!(config.partition_id(), PartitionId::new("classifier-requests", 3));
        assert_eq!(config.bootstrap_servers(), "kafka-0:19092");
        assert_eq!(config.ordering, OrderingPolicy::Arrival);
        assert_eq!(config.message_type, MessageType::DerivedClassification);

        let retry = config.retry_config();
        assert_eq!(retry.initial_backoff, Duration::from_millis(1000));
        assert_eq!(retry.backoff_multiplier, 2.0);
        assert_eq!(retry.max_retries, Some(5));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ConsumerConfig::from_vars(vars(&[("RETRY_BACKOFF_MULTIPLIER", "0.5")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ConsumerConfig::from_vars(vars(&[("QUEUE_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ConsumerConfig::from_vars(vars(&[("BROKER_PORT", "not-a-port")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env(_)));
    }
}
