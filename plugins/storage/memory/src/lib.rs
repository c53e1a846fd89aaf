use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use ingest_api::{EmbeddingRecord, IngestError, LogStorage, SeqId, StorageFactory, SubmitEmbeddingRecord};

// ═══════════════════════════════════════════════════════════════
//  MemoryStorageConfig
// ═══════════════════════════════════════════════════════════════

fn default_initial_capacity() -> usize {
    1024
}

#[derive(Debug, serde::Deserialize)]
pub struct MemoryStorageConfig {
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryLog
// ═══════════════════════════════════════════════════════════════

pub const MIN_SEQ_ID: SeqId = SeqId(0);
pub const MAX_SEQ_ID: SeqId = SeqId(i64::MAX);

/// In-process append-only log. Nothing survives a restart.
///
/// SeqIds come from a counter starting at `MIN_SEQ_ID + 1`, so records are
/// stored densely and their position in the vector follows from the id.
pub struct MemoryLog {
    topic: String,
    records: RwLock<Vec<EmbeddingRecord>>,
}

impl MemoryLog {
    pub fn new(topic: impl Into<String>, initial_capacity: usize) -> Self {
        Self {
            topic: topic.into(),
            records: RwLock::new(Vec::with_capacity(initial_capacity.min(65536))),
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, Vec<EmbeddingRecord>> {
        match self.records.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(topic = %self.topic, "memory log read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Vec<EmbeddingRecord>> {
        match self.records.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(topic = %self.topic, "memory log write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Index of the first record with `seq_id > after`.
fn first_after(after: SeqId) -> usize {
    // Record at index i carries SeqId(i + 1).
    after.get().max(MIN_SEQ_ID.get()).try_into().unwrap_or(usize::MAX)
}

impl LogStorage for MemoryLog {
    fn append(&self, record: SubmitEmbeddingRecord) -> Result<EmbeddingRecord, IngestError> {
        let mut buf = self.write_guard();
        let last = buf.last().map_or(MIN_SEQ_ID, |r| r.seq_id);
        let seq_id = match last.checked_next() {
            Some(next) if next <= MAX_SEQ_ID => next,
            _ => {
                return Err(IngestError::storage(format!(
                    "topic '{}': sequence space exhausted",
                    self.topic
                )));
            }
        };
        let sequenced = EmbeddingRecord::sequenced(seq_id, record);
        buf.push(sequenced.clone());
        Ok(sequenced)
    }

    fn read(
        &self,
        after: SeqId,
        until: Option<SeqId>,
        limit: usize,
    ) -> Result<Vec<EmbeddingRecord>, IngestError> {
        let buf = self.read_guard();
        let from = first_after(after);
        if from >= buf.len() {
            return Ok(Vec::new());
        }
        let records = buf[from..]
            .iter()
            .take_while(|r| until.is_none_or(|end| r.seq_id <= end))
            .take(limit)
            .cloned()
            .collect();
        Ok(records)
    }

    fn last_seq_id(&self) -> SeqId {
        self.read_guard().last().map_or(MIN_SEQ_ID, |r| r.seq_id)
    }

    fn len(&self) -> usize {
        self.read_guard().len()
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStorageFactory
// ═══════════════════════════════════════════════════════════════

pub struct MemoryStorageFactory;

impl StorageFactory for MemoryStorageFactory {
    fn create(&self, topic: &str, config_json: &str) -> Result<Box<dyn LogStorage>, IngestError> {
        let config: MemoryStorageConfig = if config_json.trim().is_empty() || config_json == "{}" {
            MemoryStorageConfig::default()
        } else {
            serde_json::from_str(config_json)?
        };
        Ok(Box::new(MemoryLog::new(topic, config.initial_capacity)))
    }

    fn min_seqid(&self) -> SeqId {
        MIN_SEQ_ID
    }

    fn max_seqid(&self) -> SeqId {
        MAX_SEQ_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(n: usize) -> MemoryLog {
        let log = MemoryLog::new("t", 16);
        for i in 0..n {
            log.append(SubmitEmbeddingRecord::new(format!("r{i}"))).unwrap();
        }
        log
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let log = MemoryLog::new("t", 4);
        assert_eq!(log.last_seq_id(), MIN_SEQ_ID);
        let a = log.append(SubmitEmbeddingRecord::new("a")).unwrap();
        let b = log.append(SubmitEmbeddingRecord::new("b")).unwrap();
        assert_eq!(a.seq_id, SeqId(1));
        assert_eq!(b.seq_id, SeqId(2));
        assert_eq!(log.last_seq_id(), SeqId(2));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_read_range_is_exclusive_inclusive() {
        let log = log_with(5);
        let got: Vec<_> = log
            .read(SeqId(1), Some(SeqId(3)), 100)
            .unwrap()
            .into_iter()
            .map(|r| r.seq_id.get())
            .collect();
        assert_eq!(got, vec![2, 3]);
    }

    #[test]
    fn test_read_limit_and_tail() {
        let log = log_with(5);
        assert_eq!(log.read(SeqId(0), None, 2).unwrap().len(), 2);
        assert!(log.read(SeqId(5), None, 10).unwrap().is_empty());
        assert!(log.read(SeqId(42), None, 10).unwrap().is_empty());
        assert_eq!(log.read(SeqId(-7), None, 10).unwrap().len(), 5);
    }

    #[test]
    fn test_factory_config() {
        let factory = MemoryStorageFactory;
        assert!(factory.create("t", "{}").is_ok());
        assert!(factory.create("t", r#"{"initial_capacity": 8}"#).is_ok());
        assert!(matches!(
            factory.create("t", r#"{"initial_capacity": "lots"}"#),
            Err(IngestError::Storage(_))
        ));
        assert_eq!(factory.min_seqid(), SeqId(0));
        assert_eq!(factory.max_seqid(), SeqId(i64::MAX));
    }
}
