use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use watchrelay_core::types::EventBatch;

struct SubscriberHandle {
    sender: mpsc::Sender<EventBatch>,
    resource_name: Option<String>,
}

/// Fans one follower stream out to many subscribers.
///
/// The producer never blocks on a consumer: a subscriber whose channel is
/// full when a batch arrives is evicted, which closes its receiver. All
/// unsubscription paths (cancellation, explicit close, eviction) converge
/// on [`Publisher::unsubscribe`], which is idempotent.
pub struct Publisher {
    subscribers: Mutex<HashMap<u64, SubscriberHandle>>,
    next_id: AtomicU64,
    running: AtomicBool,
}

impl Publisher {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Add a subscriber. `resource_name == None` receives every event.
    /// Gap events pass all filters.
    pub fn subscribe(
        &self,
        resource_name: Option<String>,
        capacity: usize,
    ) -> (u64, mpsc::Receiver<EventBatch>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().insert(
            id,
            SubscriberHandle {
                sender,
                resource_name,
            },
        );
        (id, receiver)
    }

    /// Drop a subscriber, closing its channel. Safe to call repeatedly and
    /// from any of the teardown paths.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Spawn the broadcast loop over the follower's stream. Idempotent;
    /// only the first call takes effect.
    pub fn start(self: &Arc<Self>, source: mpsc::Receiver<EventBatch>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let publisher = Arc::clone(self);
        tokio::spawn(async move {
            publisher.broadcast(source).await;
        });
    }

    async fn broadcast(&self, mut source: mpsc::Receiver<EventBatch>) {
        while let Some(batch) = source.recv().await {
            // Snapshot so subscribe/unsubscribe during a broadcast take
            // effect on the next batch.
            let snapshot: Vec<(u64, mpsc::Sender<EventBatch>, Option<String>)> = {
                let subscribers = self.subscribers.lock();
                subscribers
                    .iter()
                    .map(|(id, s)| (*id, s.sender.clone(), s.resource_name.clone()))
                    .collect()
            };

            for (id, sender, filter) in snapshot {
                let filtered: EventBatch = match &filter {
                    None => batch.clone(),
                    Some(name) => batch
                        .iter()
                        .filter(|e| e.is_gap() || e.resource_name() == name.as_str())
                        .cloned()
                        .collect(),
                };
                if filtered.is_empty() {
                    continue;
                }
                match sender.try_send(filtered) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(subscriber = id, "dropping slow subscriber");
                        self.unsubscribe(id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        self.unsubscribe(id);
                    }
                }
            }
        }

        // Follower gone: close every subscriber.
        self.subscribers.lock().clear();
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}
