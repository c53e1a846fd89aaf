pub mod codec;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod record;
pub mod storage;

pub use codec::{decode_vector, decode_vector_tagged, encode_vector, encode_vector_tagged};
pub use consumer::{ConsumeFn, Consumer};
pub use error::{ConsumeError, IngestError};
pub use producer::Producer;
pub use record::{
    EmbeddingRecord, Metadata, MetadataValue, Operation, ScalarEncoding, SeqId,
    SubmitEmbeddingRecord, SubscriptionId, Vector,
};
pub use storage::{LogStorage, StorageFactory};
