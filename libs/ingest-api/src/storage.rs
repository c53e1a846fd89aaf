use crate::error::IngestError;
use crate::record::{EmbeddingRecord, SeqId, SubmitEmbeddingRecord};

/// Factory for per-topic log storage, configured by a JSON document.
///
/// Also declares the SeqId range its logs assign from.
pub trait StorageFactory: Send + Sync {
    fn create(&self, topic: &str, config_json: &str) -> Result<Box<dyn LogStorage>, IngestError>;

    fn min_seqid(&self) -> SeqId;

    fn max_seqid(&self) -> SeqId;
}

/// Append-only log backing one topic.
///
/// The engine serializes appends per topic; implementations only need to be
/// safe for concurrent reads alongside a single writer.
pub trait LogStorage: Send + Sync {
    /// Append a record, assigning the next SeqId.
    fn append(&self, record: SubmitEmbeddingRecord) -> Result<EmbeddingRecord, IngestError>;

    /// Records with `after < seq_id <= until`, ascending, at most `limit`.
    fn read(
        &self,
        after: SeqId,
        until: Option<SeqId>,
        limit: usize,
    ) -> Result<Vec<EmbeddingRecord>, IngestError>;

    /// SeqId of the newest record, or the backend minimum when empty.
    fn last_seq_id(&self) -> SeqId;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
