use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{ConsumeError, IngestError};
use crate::record::{EmbeddingRecord, SeqId, SubscriptionId};

/// Callback receiving batches of records for one subscription.
///
/// May be called any number of times with any non-empty batch. A failed
/// batch (error or panic) is delivered again, possibly regrouped, so
/// consumption must tolerate duplicates.
pub trait ConsumeFn: Send + Sync {
    fn consume(&self, records: &[EmbeddingRecord]) -> Result<(), ConsumeError>;
}

impl<F> ConsumeFn for F
where
    F: Fn(&[EmbeddingRecord]) -> Result<(), ConsumeError> + Send + Sync,
{
    fn consume(&self, records: &[EmbeddingRecord]) -> Result<(), ConsumeError> {
        self(records)
    }
}

/// Read side of an ingest log.
pub trait Consumer: Send + Sync {
    /// Register `consume_fn` for records of `topic` with `start < seq_id <= end`.
    ///
    /// - `start = None`: only records appended after registration.
    /// - `end = None`: consume until unsubscribed; otherwise the subscription
    ///   retires on its own once `end` is delivered.
    /// - `id = None`: a fresh id is generated. An id that is already active
    ///   replaces the old subscription.
    fn subscribe(
        &self,
        topic: &str,
        consume_fn: Arc<dyn ConsumeFn>,
        start: Option<SeqId>,
        end: Option<SeqId>,
        id: Option<SubscriptionId>,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionId, IngestError>> + Send + '_>>;

    /// Stop a subscription. No batch is dispatched after this returns.
    /// Unknown (or already retired) ids fail with `UnknownSubscription`.
    fn unsubscribe(&self, id: SubscriptionId)
        -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>>;

    /// Smallest SeqId the backend can represent.
    fn min_seqid(&self) -> SeqId;

    /// Largest SeqId the backend can represent.
    fn max_seqid(&self) -> SeqId;
}
