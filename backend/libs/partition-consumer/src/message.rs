//! Message identity and buffered payload types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type tag carried by every fetched message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Messages read straight off the request topic
    #[default]
    Primary,
    /// Messages originating from a secondary source feed
    SecondarySource,
    /// Messages produced by a downstream classification step
    DerivedClassification,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MessageType::Primary => write!(f, "primary"),
            MessageType::SecondarySource => write!(f, "secondary_source"),
            MessageType::DerivedClassification => write!(f, "derived_classification"),
        }
    }
}

/// Identifies one delivery attempt of one partition offset.
///
/// Every attempt gets a fresh `attempt_id`, so a redelivered offset never
/// shares an identity with its earlier attempts. Fields are private; an
/// identity cannot be changed after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageIdentity {
    offset: i64,
    kind: MessageType,
    attempt_id: Uuid,
    correlation: Option<String>,
}

impl MessageIdentity {
    pub fn new(offset: i64, kind: MessageType) -> Self {
        Self {
            offset,
            kind,
            attempt_id: Uuid::new_v4(),
            correlation: None,
        }
    }

    /// Derive an identity for the same attempt that carries an opaque
    /// correlation value (e.g. the URL a downstream step extracted).
    pub fn with_correlation(&self, value: impl Into<String>) -> Self {
        Self {
            correlation: Some(value.into()),
            ..self.clone()
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn correlation(&self) -> Option<&str> {
        self.correlation.as_deref()
    }
}

impl std::fmt::Display for MessageIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}@{} ({})",
            self.kind, self.offset, self.attempt_id
        )
    }
}

/// A fetched message waiting in, or handed out of, the delivery queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedMessage {
    pub payload: Vec<u8>,
    pub identity: MessageIdentity,
}

impl BufferedMessage {
    pub fn new(payload: Vec<u8>, identity: MessageIdentity) -> Self {
        Self { payload, identity }
    }

    pub fn offset(&self) -> i64 {
        self.identity.offset()
    }
}
