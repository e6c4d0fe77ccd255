use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use watchrelay_core::types::{Event, EventBatch};
use watchrelay_core::VersionedResource;

use crate::publisher::Publisher;

/// Pure per-event filter applied after revision-based deduplication.
pub type EventPredicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// A live typed watch: historical catch-up followed by tailing.
///
/// `revision` is the exclusive lower bound the stream starts from. The
/// stream ends when the watch is cancelled, the relay closes, or this
/// subscriber falls too far behind; resume with a new watch from the last
/// revision observed.
#[derive(Debug)]
pub struct WatchResult<T> {
    pub revision: u64,
    pub events: mpsc::Receiver<Vec<Event<T>>>,
}

/// An untyped watch over every registered resource, in one revision order.
#[derive(Debug)]
pub struct RawWatchResult {
    pub revision: u64,
    pub events: mpsc::Receiver<EventBatch>,
}

/// Convert an erased batch for a typed subscriber: drop already-delivered
/// revisions, rebuild gaps as payload-free typed events, apply the
/// predicate to the rest.
pub(crate) fn typed_events<T: VersionedResource>(
    batch: &EventBatch,
    after_rev: u64,
    cond: Option<&EventPredicate<T>>,
) -> Vec<Event<T>> {
    let mut out = Vec::with_capacity(batch.len());
    for event in batch {
        if event.revision() <= after_rev {
            continue;
        }
        if event.is_gap() {
            out.push(Event::gap(event.revision(), event.created_at()));
            continue;
        }
        let Some(typed) = event.as_any().downcast_ref::<Event<T>>() else {
            tracing::warn!(
                revision = event.revision(),
                resource_name = %event.resource_name(),
                "unexpected event type in typed stream"
            );
            continue;
        };
        if let (Some(cond), Some(value)) = (cond, typed.value.as_ref()) {
            if !cond(value) {
                continue;
            }
        }
        out.push(typed.clone());
    }
    out
}

/// Drive one typed subscriber: history first, then the live stream with
/// revision dedup. Unsubscribes on every exit path.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn pump_typed<T: VersionedResource>(
    token: CancellationToken,
    publisher: Arc<Publisher>,
    subscriber_id: u64,
    mut live: mpsc::Receiver<EventBatch>,
    out: mpsc::Sender<Vec<Event<T>>>,
    history: Vec<Event<T>>,
    mut last_rev: u64,
    cond: Option<EventPredicate<T>>,
) {
    if !history.is_empty() && out.send(history).await.is_err() {
        publisher.unsubscribe(subscriber_id);
        return;
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            maybe = live.recv() => match maybe {
                None => break,
                Some(batch) => {
                    let scanned = batch.last().map(|e| e.revision());
                    let typed = typed_events(&batch, last_rev, cond.as_ref());
                    if let Some(max) = scanned {
                        last_rev = last_rev.max(max);
                    }
                    if typed.is_empty() {
                        continue;
                    }
                    if out.send(typed).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
    publisher.unsubscribe(subscriber_id);
}

/// Untyped counterpart of [`pump_typed`].
pub(crate) async fn pump_erased(
    token: CancellationToken,
    publisher: Arc<Publisher>,
    subscriber_id: u64,
    mut live: mpsc::Receiver<EventBatch>,
    out: mpsc::Sender<EventBatch>,
    history: EventBatch,
    mut last_rev: u64,
) {
    if !history.is_empty() && out.send(history).await.is_err() {
        publisher.unsubscribe(subscriber_id);
        return;
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            maybe = live.recv() => match maybe {
                None => break,
                Some(batch) => {
                    let scanned = batch.last().map(|e| e.revision());
                    let fresh: EventBatch = batch
                        .into_iter()
                        .filter(|e| e.revision() > last_rev)
                        .collect();
                    if let Some(max) = scanned {
                        last_rev = last_rev.max(max);
                    }
                    if fresh.is_empty() {
                        continue;
                    }
                    if out.send(fresh).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
    publisher.unsubscribe(subscriber_id);
}
