use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Position of a record in its topic's log.
///
/// Strictly increasing per topic; no ordering holds across topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeqId(pub i64);

impl SeqId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    /// Next id in sequence, `None` on overflow.
    pub fn checked_next(self) -> Option<SeqId> {
        self.0.checked_add(1).map(SeqId)
    }
}

impl From<i64> for SeqId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SeqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription identifier. Caller-supplied or generated (v4).
pub type SubscriptionId = uuid::Uuid;

/// On-wire numeric representation of vector components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScalarEncoding {
    Float32,
    Int32,
}

impl ScalarEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarEncoding::Float32 => "FLOAT32",
            ScalarEncoding::Int32 => "INT32",
        }
    }
}

impl fmt::Display for ScalarEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScalarEncoding {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FLOAT32" => Ok(ScalarEncoding::Float32),
            "INT32" => Ok(ScalarEncoding::Int32),
            other => Err(IngestError::UnsupportedEncoding(other.to_string())),
        }
    }
}

/// Embedding components, typed by their natural encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Vector {
    Float32(Vec<f32>),
    Int32(Vec<i32>),
}

impl Vector {
    pub fn encoding(&self) -> ScalarEncoding {
        match self {
            Vector::Float32(_) => ScalarEncoding::Float32,
            Vector::Int32(_) => ScalarEncoding::Int32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Vector::Float32(v) => v.len(),
            Vector::Int32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<f32>> for Vector {
    fn from(v: Vec<f32>) -> Self {
        Vector::Float32(v)
    }
}

impl From<Vec<i32>> for Vector {
    fn from(v: Vec<i32>) -> Self {
        Vector::Int32(v)
    }
}

/// Write intent of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    #[default]
    Add,
    Update,
    Upsert,
    Delete,
}

/// Metadata value. Variant order matters for untagged deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// Caller-supplied payload for an append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitEmbeddingRecord {
    pub id: String,
    #[serde(default)]
    pub embedding: Option<Vector>,
    #[serde(default)]
    pub encoding: Option<ScalarEncoding>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub operation: Operation,
}

impl SubmitEmbeddingRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            embedding: None,
            encoding: None,
            metadata: None,
            operation: Operation::Add,
        }
    }

    /// Attach an embedding; the encoding tag follows the vector's variant.
    pub fn with_embedding(mut self, embedding: impl Into<Vector>) -> Self {
        let embedding = embedding.into();
        self.encoding = Some(embedding.encoding());
        self.embedding = Some(embedding);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    /// Check that the encoding tag agrees with the embedding it describes.
    pub fn validate(&self) -> Result<(), IngestError> {
        match (&self.embedding, self.encoding) {
            (Some(v), Some(enc)) if v.encoding() != enc => Err(IngestError::InvalidRecord(format!(
                "record '{}': embedding is {} but encoding tag is {enc}",
                self.id,
                v.encoding()
            ))),
            (None, Some(enc)) => Err(IngestError::InvalidRecord(format!(
                "record '{}': encoding tag {enc} without embedding",
                self.id
            ))),
            _ => Ok(()),
        }
    }
}

/// Sequenced record as delivered to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub seq_id: SeqId,
    pub embedding: Option<Vector>,
    pub encoding: Option<ScalarEncoding>,
    pub metadata: Option<Metadata>,
    pub operation: Operation,
}

impl EmbeddingRecord {
    pub fn sequenced(seq_id: SeqId, record: SubmitEmbeddingRecord) -> Self {
        Self {
            id: record.id,
            seq_id,
            embedding: record.embedding,
            encoding: record.encoding,
            metadata: record.metadata,
            operation: record.operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_encoding_parse() {
        assert_eq!("FLOAT32".parse::<ScalarEncoding>().unwrap(), ScalarEncoding::Float32);
        assert_eq!("INT32".parse::<ScalarEncoding>().unwrap(), ScalarEncoding::Int32);
        match "BOGUS".parse::<ScalarEncoding>() {
            Err(IngestError::UnsupportedEncoding(tag)) => assert_eq!(tag, "BOGUS"),
            other => panic!("expected UnsupportedEncoding, got {other:?}"),
        }
    }

    #[test]
    fn test_with_embedding_sets_encoding() {
        let rec = SubmitEmbeddingRecord::new("a").with_embedding(vec![1i32, 2, 3]);
        assert_eq!(rec.encoding, Some(ScalarEncoding::Int32));
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_mismatched_tag() {
        let mut rec = SubmitEmbeddingRecord::new("a").with_embedding(vec![1.0f32]);
        rec.encoding = Some(ScalarEncoding::Int32);
        assert!(matches!(rec.validate(), Err(IngestError::InvalidRecord(_))));

        let mut bare = SubmitEmbeddingRecord::new("b");
        bare.encoding = Some(ScalarEncoding::Float32);
        assert!(matches!(bare.validate(), Err(IngestError::InvalidRecord(_))));
    }

    #[test]
    fn test_submit_record_json() {
        let json = r#"{
            "id": "doc-1",
            "embedding": {"Float32": [0.5, 1.5]},
            "encoding": "FLOAT32",
            "metadata": {"source": "web", "page": 3, "score": 0.75, "draft": false},
            "operation": "UPSERT"
        }"#;
        let rec: SubmitEmbeddingRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.operation, Operation::Upsert);
        assert_eq!(rec.embedding, Some(Vector::Float32(vec![0.5, 1.5])));
        let meta = rec.metadata.unwrap();
        assert_eq!(meta["source"], MetadataValue::Str("web".into()));
        assert_eq!(meta["page"], MetadataValue::Int(3));
        assert_eq!(meta["score"], MetadataValue::Float(0.75));
        assert_eq!(meta["draft"], MetadataValue::Bool(false));
    }

    #[test]
    fn test_seq_id_ordering() {
        assert!(SeqId(1) < SeqId(2));
        assert_eq!(SeqId(1).checked_next(), Some(SeqId(2)));
        assert_eq!(SeqId(i64::MAX).checked_next(), None);
    }
}
