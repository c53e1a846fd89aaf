use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use ingest_api::{EmbeddingRecord, IngestError, LogStorage, SeqId, SubmitEmbeddingRecord};

/// A named topic backed by a storage plugin.
pub struct Topic {
    name: String,
    storage: Box<dyn LogStorage>,
    /// Serializes appends against cursor snapshots taken by `subscribe`.
    append_lock: Mutex<()>,
    /// Notification channel: broadcast unit signal on every append.
    notify_tx: broadcast::Sender<()>,
    /// Cancelled when the topic is deleted; parent of every subscription token.
    token: CancellationToken,
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic").field("name", &self.name).finish()
    }
}

impl Topic {
    pub fn new(
        name: String,
        storage: Box<dyn LogStorage>,
        notify_buffer: usize,
        token: CancellationToken,
    ) -> Self {
        let (notify_tx, _) = broadcast::channel(notify_buffer);
        Self {
            name,
            storage,
            append_lock: Mutex::new(()),
            notify_tx,
            token,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn append(&self, record: SubmitEmbeddingRecord) -> Result<EmbeddingRecord, IngestError> {
        let sequenced = {
            let _guard = lock_recover(&self.append_lock, &self.name);
            // Checked under the lock so no append lands after `close` returns.
            if self.token.is_cancelled() {
                return Err(IngestError::UnknownTopic(self.name.clone()));
            }
            self.storage.append(record)?
        };
        // Notify delivery workers (ignore if no receivers).
        let _ = self.notify_tx.send(());
        Ok(sequenced)
    }

    /// SeqId of the newest record, consistent with concurrent appends.
    pub fn cursor_now(&self) -> SeqId {
        let _guard = lock_recover(&self.append_lock, &self.name);
        self.storage.last_seq_id()
    }

    pub fn read(
        &self,
        after: SeqId,
        until: Option<SeqId>,
        limit: usize,
    ) -> Result<Vec<EmbeddingRecord>, IngestError> {
        self.storage.read(after, until, limit)
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn subscribe_notify(&self) -> broadcast::Receiver<()> {
        self.notify_tx.subscribe()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Mark the topic deleted; every subscription on it stops.
    pub fn close(&self) {
        let _guard = lock_recover(&self.append_lock, &self.name);
        self.token.cancel();
    }
}

fn lock_recover<'a>(lock: &'a Mutex<()>, topic: &str) -> std::sync::MutexGuard<'a, ()> {
    match lock.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!(topic = %topic, "topic append lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Registry of all topics in the engine.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Topic>>> {
        match self.topics.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("topic registry read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Topic>>> {
        match self.topics.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("topic registry write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Register a topic unless one with the same name exists.
    pub fn register(&self, topic: Topic) -> Result<Arc<Topic>, IngestError> {
        let mut guard = self.write_guard();
        if guard.contains_key(&topic.name) {
            return Err(IngestError::TopicExists(topic.name));
        }
        let topic = Arc::new(topic);
        guard.insert(topic.name.clone(), topic.clone());
        Ok(topic)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Topic>> {
        self.read_guard().get(name).cloned()
    }

    /// Look up a topic, failing with `UnknownTopic`.
    pub fn require(&self, name: &str) -> Result<Arc<Topic>, IngestError> {
        self.get(name)
            .ok_or_else(|| IngestError::UnknownTopic(name.to_string()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Topic>> {
        self.write_guard().remove(name)
    }

    /// Remove every topic, returning them for teardown.
    pub fn drain(&self) -> Vec<Arc<Topic>> {
        self.write_guard().drain().map(|(_, t)| t).collect()
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_guard().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read_guard().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_memory::MemoryLog;

    fn topic(name: &str) -> Topic {
        Topic::new(
            name.to_string(),
            Box::new(MemoryLog::new(name, 8)),
            16,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = TopicRegistry::new();
        registry.register(topic("a")).unwrap();
        assert!(matches!(
            registry.register(topic("a")),
            Err(IngestError::TopicExists(name)) if name == "a"
        ));
        assert_eq!(registry.topic_names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_append_notifies() {
        let t = topic("a");
        let mut rx = t.subscribe_notify();
        let rec = t.append(SubmitEmbeddingRecord::new("x")).unwrap();
        assert_eq!(rec.seq_id, SeqId(1));
        assert!(rx.try_recv().is_ok());
        assert_eq!(t.cursor_now(), SeqId(1));
    }

    #[test]
    fn test_closed_topic_rejects_appends() {
        let t = topic("a");
        t.close();
        assert!(matches!(
            t.append(SubmitEmbeddingRecord::new("x")),
            Err(IngestError::UnknownTopic(_))
        ));
    }

    #[test]
    fn test_append_waiting_on_lock_sees_close() {
        let t = std::sync::Arc::new(topic("a"));
        let guard = t.append_lock.lock().unwrap();
        let appender = {
            let t = t.clone();
            std::thread::spawn(move || t.append(SubmitEmbeddingRecord::new("x")))
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        t.token.cancel();
        drop(guard);

        assert!(matches!(appender.join().unwrap(), Err(IngestError::UnknownTopic(_))));
        assert!(t.is_empty());
    }

    #[test]
    fn test_require_unknown() {
        let registry = TopicRegistry::new();
        assert!(matches!(registry.require("nope"), Err(IngestError::UnknownTopic(_))));
    }
}
