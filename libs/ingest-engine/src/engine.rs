use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use ingest_api::{
    ConsumeFn, Consumer, IngestError, Producer, SeqId, StorageFactory, SubmitEmbeddingRecord,
    SubscriptionId,
};

use crate::config::IngestConfig;
use crate::error::EngineError;
use crate::subscription::{
    Delivery, DeliverySettings, SubscriptionRegistry, SubscriptionSlot, spawn_delivery,
};
use crate::topic::{Topic, TopicRegistry};

/// Reference ingest backend: topics on a pluggable log storage, one
/// delivery task per subscription.
///
/// Implements both [`Producer`] and [`Consumer`] against the same logs.
/// Must be used from within a tokio runtime.
pub struct IngestEngine {
    topics: TopicRegistry,
    subscriptions: Arc<SubscriptionRegistry>,
    storage: Arc<dyn StorageFactory>,
    storage_config: String,
    settings: DeliverySettings,
    notify_buffer: usize,
    allow_reset: bool,
    next_generation: AtomicU64,
    /// Parent of every topic token.
    root: CancellationToken,
}

impl std::fmt::Debug for IngestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestEngine")
            .field("topics", &self.topics)
            .field("settings", &self.settings)
            .field("allow_reset", &self.allow_reset)
            .finish()
    }
}

impl IngestEngine {
    /// Build an engine with no topics.
    pub fn new(config: &IngestConfig, storage: Arc<dyn StorageFactory>) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            topics: TopicRegistry::new(),
            subscriptions: Arc::new(SubscriptionRegistry::default()),
            storage,
            storage_config: config.storage_config_json()?,
            settings: DeliverySettings::from(&config.delivery),
            notify_buffer: config.delivery.notify_buffer,
            allow_reset: config.allow_reset,
            next_generation: AtomicU64::new(1),
            root: CancellationToken::new(),
        })
    }

    /// Build an engine and create the topics listed in the configuration.
    pub fn bootstrap(config: &IngestConfig, storage: Arc<dyn StorageFactory>) -> Result<Self, EngineError> {
        let engine = Self::new(config, storage)?;
        for topic_cfg in &config.topics {
            engine
                .create(&topic_cfg.name)
                .map_err(|e| EngineError::from(e).with_context(format!("topic '{}'", topic_cfg.name)))?;
        }
        Ok(engine)
    }

    /// Names of all topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.topics.topic_names()
    }

    /// Ids of subscriptions that have not retired yet.
    pub fn subscriptions(&self) -> Vec<SubscriptionId> {
        self.subscriptions.ids()
    }

    pub fn is_subscribed(&self, id: &SubscriptionId) -> bool {
        self.subscriptions.contains(id)
    }

    /// Number of records in a topic's log.
    pub fn topic_len(&self, topic: &str) -> Result<usize, IngestError> {
        Ok(self.topics.require(topic)?.len())
    }

    /// Cancel every subscription and wait for the delivery tasks to finish.
    pub async fn shutdown(self) {
        self.root.cancel();
        let slots = self.subscriptions.drain();
        let count = slots.len();
        for (_, slot) in slots {
            let _ = slot.handle.await;
        }
        tracing::info!(subscriptions = count, "ingest engine shut down");
    }

    fn create(&self, name: &str) -> Result<(), IngestError> {
        if self.topics.contains(name) {
            return Err(IngestError::TopicExists(name.to_string()));
        }
        let storage = self.storage.create(name, &self.storage_config)?;
        self.topics.register(Topic::new(
            name.to_string(),
            storage,
            self.notify_buffer,
            self.root.child_token(),
        ))?;
        tracing::info!(topic = %name, "created topic");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), IngestError> {
        let topic = self
            .topics
            .remove(name)
            .ok_or_else(|| IngestError::UnknownTopic(name.to_string()))?;
        topic.close();
        let removed = self.subscriptions.remove_topic(name);
        tracing::info!(
            topic = %name,
            records = topic.len(),
            subscriptions = removed.len(),
            "deleted topic"
        );
        Ok(())
    }

    fn submit(&self, name: &str, record: SubmitEmbeddingRecord) -> Result<SeqId, IngestError> {
        record.validate()?;
        let topic = self.topics.require(name)?;
        let sequenced = topic
            .append(record)
            .map_err(|e| e.with_context(format!("topic '{name}'")))?;
        tracing::trace!(topic = %name, seq_id = %sequenced.seq_id, id = %sequenced.id, "appended record");
        Ok(sequenced.seq_id)
    }

    fn clear(&self) -> Result<(), IngestError> {
        if !self.allow_reset {
            return Err(IngestError::UnsupportedOperation(
                "reset is disabled (set allow_reset = true)".into(),
            ));
        }
        let topics = self.topics.drain();
        for topic in &topics {
            topic.close();
        }
        let subscriptions = self.subscriptions.drain();
        tracing::warn!(
            topics = topics.len(),
            subscriptions = subscriptions.len(),
            "reset: all topics and subscriptions removed"
        );
        Ok(())
    }

    fn register(
        &self,
        name: &str,
        consume_fn: Arc<dyn ConsumeFn>,
        start: Option<SeqId>,
        end: Option<SeqId>,
        id: Option<SubscriptionId>,
    ) -> Result<SubscriptionId, IngestError> {
        let topic = self.topics.require(name)?;
        let id = id.unwrap_or_else(SubscriptionId::new_v4);
        let cursor = match start {
            Some(start) => start.max(self.storage.min_seqid()),
            None => topic.cursor_now(),
        };

        let token = topic.token().child_token();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let delivery = Delivery {
            id,
            topic: topic.clone(),
            consume_fn,
            cursor,
            end,
            token: token.clone(),
            settings: self.settings,
        };
        let (registered_tx, registered_rx) = oneshot::channel();
        let handle = spawn_delivery(delivery, self.subscriptions.clone(), generation, registered_rx);

        let replaced = self.subscriptions.insert(
            id,
            SubscriptionSlot {
                topic: name.to_string(),
                generation,
                token,
                handle,
            },
        );
        let _ = registered_tx.send(());
        if let Some(old) = replaced {
            old.token.cancel();
            tracing::info!(subscription = %id, topic = %old.topic, "replaced existing subscription");
        }

        tracing::info!(
            subscription = %id,
            topic = %name,
            cursor = %cursor,
            end = ?end.map(|e| e.get()),
            "subscribed"
        );
        Ok(id)
    }

    fn deregister(&self, id: SubscriptionId) -> Result<(), IngestError> {
        let slot = self
            .subscriptions
            .remove(&id)
            .ok_or(IngestError::UnknownSubscription(id))?;
        slot.token.cancel();
        tracing::info!(subscription = %id, topic = %slot.topic, "unsubscribed");
        Ok(())
    }
}

impl Drop for IngestEngine {
    fn drop(&mut self) {
        // Stop delivery tasks even without an explicit shutdown.
        self.root.cancel();
    }
}

impl Producer for IngestEngine {
    fn create_topic(&self, topic: &str)
        -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>>
    {
        let result = self.create(topic);
        Box::pin(async move { result })
    }

    fn delete_topic(&self, topic: &str)
        -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>>
    {
        let result = self.delete(topic);
        Box::pin(async move { result })
    }

    fn submit_embedding(
        &self,
        topic: &str,
        record: SubmitEmbeddingRecord,
    ) -> Pin<Box<dyn Future<Output = Result<SeqId, IngestError>> + Send + '_>> {
        let result = self.submit(topic, record);
        Box::pin(async move { result })
    }

    fn reset(&self) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>> {
        let result = self.clear();
        Box::pin(async move { result })
    }
}

impl Consumer for IngestEngine {
    fn subscribe(
        &self,
        topic: &str,
        consume_fn: Arc<dyn ConsumeFn>,
        start: Option<SeqId>,
        end: Option<SeqId>,
        id: Option<SubscriptionId>,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionId, IngestError>> + Send + '_>> {
        let result = self.register(topic, consume_fn, start, end, id);
        Box::pin(async move { result })
    }

    fn unsubscribe(&self, id: SubscriptionId)
        -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + '_>>
    {
        let result = self.deregister(id);
        Box::pin(async move { result })
    }

    fn min_seqid(&self) -> SeqId {
        self.storage.min_seqid()
    }

    fn max_seqid(&self) -> SeqId {
        self.storage.max_seqid()
    }
}
