use std::fmt;

use crate::record::SubscriptionId;

/// Error returned by codec, producer and consumer operations.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("topic '{0}' not found")]
    UnknownTopic(String),

    #[error("topic '{0}' already exists")]
    TopicExists(String),

    #[error("subscription {0} not found")]
    UnknownSubscription(SubscriptionId),

    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("malformed payload: {len} bytes is not a multiple of element width {width}")]
    MalformedPayload { len: usize, width: usize },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("storage: {0}")]
    Storage(String),
}

impl IngestError {
    pub fn storage(msg: impl Into<String>) -> Self {
        IngestError::Storage(msg.into())
    }

    /// Add context to the error.
    ///
    /// Only message-carrying variants are rewritten; identifiers stay intact
    /// so callers can still match on them.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        match self {
            IngestError::Storage(msg) => IngestError::Storage(format!("{ctx}: {msg}")),
            IngestError::InvalidRecord(msg) => IngestError::InvalidRecord(format!("{ctx}: {msg}")),
            IngestError::UnsupportedOperation(msg) => {
                IngestError::UnsupportedOperation(format!("{ctx}: {msg}"))
            }
            other => other,
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        IngestError::Storage(format!("config: {e}"))
    }
}

/// Failure reported by a consume callback.
///
/// The delivery system logs it and redelivers; it never reaches the producer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConsumeError {
    pub message: String,
}

impl ConsumeError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into() }
    }
}

impl From<String> for ConsumeError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ConsumeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<IngestError> for ConsumeError {
    fn from(e: IngestError) -> Self {
        Self::new(e.to_string())
    }
}
