use std::future::Future;
use std::pin::Pin;

use crate::error::IngestError;
use crate::record::{SeqId, SubmitEmbeddingRecord};

/// Write side of an ingest log: topic lifecycle and appends.
pub trait Producer: Send + Sync {
    /// Create an empty topic. Re-creating an existing topic is an error
    /// (`TopicExists`).
    fn create_topic(&self, topic: &str)
        -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>>;

    /// Destroy a topic with all its records and subscriptions.
    fn delete_topic(&self, topic: &str)
        -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>>;

    /// Append a record and return the SeqId assigned to it.
    ///
    /// Resolves once the record is visible to subscriptions registered
    /// afterwards; active subscriptions may observe it later.
    fn submit_embedding(
        &self,
        topic: &str,
        record: SubmitEmbeddingRecord,
    ) -> Pin<Box<dyn Future<Output = Result<SeqId, IngestError>> + Send + '_>>;

    /// Delete all topics and data. For test harnesses only; production
    /// backends return `UnsupportedOperation`.
    fn reset(&self) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>>;
}
