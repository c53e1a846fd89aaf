use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ingest_api::{ConsumeFn, EmbeddingRecord, SeqId, SubscriptionId};

use crate::config::DeliveryConfig;
use crate::topic::Topic;

// ═══════════════════════════════════════════════════════════════
//  SubscriptionRegistry
// ═══════════════════════════════════════════════════════════════

/// Per-subscription cancellation + join handle.
pub(crate) struct SubscriptionSlot {
    pub topic: String,
    /// Distinguishes a slot from a later one that reused its id.
    pub generation: u64,
    pub token: CancellationToken,
    pub handle: JoinHandle<()>,
}

/// Active subscriptions, keyed by id.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    slots: RwLock<HashMap<SubscriptionId, SubscriptionSlot>>,
}

impl SubscriptionRegistry {
    fn read_guard(&self) -> RwLockReadGuard<'_, HashMap<SubscriptionId, SubscriptionSlot>> {
        match self.slots.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("subscription registry read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, HashMap<SubscriptionId, SubscriptionSlot>> {
        match self.slots.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("subscription registry write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Insert a slot, returning the one it replaced.
    pub fn insert(&self, id: SubscriptionId, slot: SubscriptionSlot) -> Option<SubscriptionSlot> {
        self.write_guard().insert(id, slot)
    }

    pub fn remove(&self, id: &SubscriptionId) -> Option<SubscriptionSlot> {
        self.write_guard().remove(id)
    }

    /// Remove the slot for `id` only if it is still `generation`.
    pub fn retire(&self, id: &SubscriptionId, generation: u64) -> bool {
        let mut guard = self.write_guard();
        match guard.get(id) {
            Some(slot) if slot.generation == generation => {
                guard.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Remove every slot subscribed to `topic`.
    pub fn remove_topic(&self, topic: &str) -> Vec<(SubscriptionId, SubscriptionSlot)> {
        let mut guard = self.write_guard();
        let ids: Vec<SubscriptionId> = guard
            .iter()
            .filter(|(_, slot)| slot.topic == topic)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| guard.remove(&id).map(|slot| (id, slot)))
            .collect()
    }

    pub fn drain(&self) -> Vec<(SubscriptionId, SubscriptionSlot)> {
        self.write_guard().drain().collect()
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.read_guard().keys().copied().collect()
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.read_guard().contains_key(id)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Delivery worker
// ═══════════════════════════════════════════════════════════════

/// Why a delivery worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryExit {
    /// The record at `end` was delivered.
    EndReached,
    /// Unsubscribed, replaced, topic deleted, or engine shut down.
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DeliverySettings {
    pub max_batch_size: usize,
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
}

impl From<&DeliveryConfig> for DeliverySettings {
    fn from(cfg: &DeliveryConfig) -> Self {
        Self {
            max_batch_size: cfg.max_batch_size,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            max_retry_backoff: Duration::from_millis(cfg.max_retry_backoff_ms),
        }
    }
}

/// Delivers `(cursor, end]` of one topic to one callback.
///
/// Batches are delivered one at a time: the cursor only moves past a batch
/// once the callback accepted it, so SeqIds never go backwards and two
/// invocations never overlap.
pub(crate) struct Delivery {
    pub id: SubscriptionId,
    pub topic: Arc<Topic>,
    pub consume_fn: Arc<dyn ConsumeFn>,
    pub cursor: SeqId,
    pub end: Option<SeqId>,
    pub token: CancellationToken,
    pub settings: DeliverySettings,
}

impl Delivery {
    fn end_reached(&self) -> bool {
        self.end.is_some_and(|end| self.cursor >= end)
    }

    pub async fn run(mut self) -> DeliveryExit {
        // Subscribe before the first read so no append slips between them.
        let mut notify_rx = self.topic.subscribe_notify();
        let mut read_backoff = self.settings.retry_backoff;

        loop {
            if self.token.is_cancelled() {
                return DeliveryExit::Cancelled;
            }
            if self.end_reached() {
                return DeliveryExit::EndReached;
            }

            let batch = match self.topic.read(self.cursor, self.end, self.settings.max_batch_size) {
                Ok(batch) => {
                    read_backoff = self.settings.retry_backoff;
                    batch
                }
                Err(e) => {
                    // A read failure keeps the subscription active; retry from the same cursor.
                    tracing::error!(
                        subscription = %self.id,
                        topic = %self.topic.name(),
                        cursor = %self.cursor,
                        retry_in_ms = read_backoff.as_millis() as u64,
                        error = %e,
                        "failed to read topic log, retrying"
                    );
                    if !self.pause(read_backoff).await {
                        return DeliveryExit::Cancelled;
                    }
                    read_backoff = (read_backoff * 2).min(self.settings.max_retry_backoff);
                    continue;
                }
            };

            let Some(last) = batch.last().map(|r| r.seq_id) else {
                // No data yet, wait for an append. Lag is fine, we re-read.
                tokio::select! {
                    _ = self.token.cancelled() => return DeliveryExit::Cancelled,
                    signal = notify_rx.recv() => {
                        if let Err(broadcast::error::RecvError::Closed) = signal {
                            return DeliveryExit::Cancelled;
                        }
                    }
                }
                continue;
            };

            if !self.deliver(batch).await {
                return DeliveryExit::Cancelled;
            }
            self.cursor = last;
        }
    }

    /// Sleep for `delay`. Returns `false` if cancelled first.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Hand `batch` to the callback until it succeeds. Returns `false` if
    /// cancelled first.
    async fn deliver(&self, batch: Vec<EmbeddingRecord>) -> bool {
        let batch = Arc::new(batch);
        let first = batch.first().map(|r| r.seq_id).unwrap_or_default();
        let last = batch.last().map(|r| r.seq_id).unwrap_or_default();
        let mut backoff = self.settings.retry_backoff;
        let mut attempt: u32 = 1;

        loop {
            if self.token.is_cancelled() {
                return false;
            }

            let consume_fn = self.consume_fn.clone();
            let records = batch.clone();
            let token = self.token.clone();
            // The blocking pool may start the closure late; re-check there so
            // nothing is invoked after unsubscribe returns.
            let result = tokio::task::spawn_blocking(move || {
                if token.is_cancelled() {
                    None
                } else {
                    Some(consume_fn.consume(&records))
                }
            })
            .await;

            let failure = match result {
                Ok(None) => return false,
                Ok(Some(Ok(()))) => {
                    tracing::debug!(
                        subscription = %self.id,
                        topic = %self.topic.name(),
                        first = %first,
                        last = %last,
                        records = batch.len(),
                        attempt,
                        "delivered batch"
                    );
                    return true;
                }
                Ok(Some(Err(e))) => e.to_string(),
                Err(join) if join.is_panic() => "callback panicked".to_string(),
                Err(join) => join.to_string(),
            };

            tracing::warn!(
                subscription = %self.id,
                topic = %self.topic.name(),
                first = %first,
                last = %last,
                attempt,
                retry_in_ms = backoff.as_millis() as u64,
                error = %failure,
                "consume callback failed, redelivering"
            );

            if !self.pause(backoff).await {
                return false;
            }
            backoff = (backoff * 2).min(self.settings.max_retry_backoff);
            attempt = attempt.saturating_add(1);
        }
    }
}

/// Spawn the worker for a subscription.
///
/// The worker starts once `registered` fires (or its sender is dropped), so
/// its slot is in the registry before it can retire. On exit it removes its
/// own slot, unless the id has since been taken over.
pub(crate) fn spawn_delivery(
    delivery: Delivery,
    registry: Arc<SubscriptionRegistry>,
    generation: u64,
    registered: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _ = registered.await;
        let id = delivery.id;
        let topic = delivery.topic.name().to_string();
        let exit = delivery.run().await;
        match exit {
            DeliveryExit::EndReached => {
                tracing::info!(subscription = %id, topic = %topic, "subscription reached end, retired")
            }
            DeliveryExit::Cancelled => {
                tracing::debug!(subscription = %id, topic = %topic, "subscription cancelled")
            }
        }
        registry.retire(&id, generation);
    })
}
