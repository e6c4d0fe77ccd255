use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use watchrelay_core::dialect::Dialect;
use watchrelay_core::error::{Result, WatchRelayError};
use watchrelay_core::types::{ErasedEvent, EventBatch, GapEvent, LogRow};
use watchrelay_core::RelayConfig;

use crate::registry::ResourceRegistry;

/// The revision-ordered log: query path plus the polling follower that
/// turns committed rows into a totally ordered stream of event batches.
pub struct SqlLog {
    dialect: Arc<dyn Dialect>,
    registry: Arc<ResourceRegistry>,
    config: RelayConfig,
    notify_tx: mpsc::Sender<u64>,
    notify_rx: Mutex<Option<mpsc::Receiver<u64>>>,
    /// The follower's cursor: every revision `<= follower_rev` has been
    /// linearized into the output stream (or burned and filled). Watchers
    /// read it at subscribe time as their catch-up/live boundary.
    follower_rev: AtomicU64,
}

/// A row reduced to its revision and, when deliverable, its decoded event.
///
/// Gap-filler rows and rows with no registered decoder still advance the
/// follower's cursor, so they stay in the scan with `event == None`.
struct DecodedRow {
    revision: u64,
    event: Option<Arc<dyn ErasedEvent>>,
}

struct PendingGap {
    revision: u64,
    deadline: Instant,
}

impl SqlLog {
    pub fn new(
        dialect: Arc<dyn Dialect>,
        registry: Arc<ResourceRegistry>,
        config: RelayConfig,
    ) -> Self {
        let (notify_tx, notify_rx) = mpsc::channel(config.notify_buffer);
        Self {
            dialect,
            registry,
            config,
            notify_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
            follower_rev: AtomicU64::new(0),
        }
    }

    /// The revision up to which the follower has linearized the log.
    pub fn follower_revision(&self) -> u64 {
        self.follower_rev.load(Ordering::SeqCst)
    }

    /// Wake the follower after a commit. Never blocks; an overflowing
    /// notify is dropped and the poll ticker catches up.
    pub fn notify(&self, revision: u64) {
        let _ = self.notify_tx.try_send(revision);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.is_registered(name)
    }

    pub async fn clear_expired(&self, older_than: Duration) -> Result<usize> {
        self.dialect.clear_expired(older_than).await
    }

    /// Historical page: events with `revision > revision`, plus the log's
    /// high-watermark at query time.
    pub async fn after(
        &self,
        resource_name: Option<&str>,
        revision: u64,
        limit: u64,
    ) -> Result<(u64, EventBatch)> {
        let rows = self.dialect.after(resource_name, revision, limit).await?;
        let mut watermark = self.dialect.current_revision().await?;
        if let Some(last) = rows.last() {
            watermark = watermark.max(last.revision);
        }
        let events = self
            .decode_rows(&rows)?
            .into_iter()
            .filter_map(|d| d.event)
            .collect();
        Ok((watermark, events))
    }

    /// Start the follower at the log's current maximum revision. Returns
    /// the ordered batch stream; closes it when `token` is cancelled. May
    /// be called once per log.
    pub async fn start(
        self: &Arc<Self>,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<EventBatch>> {
        let notify_rx = self.notify_rx.lock().take().ok_or_else(|| {
            WatchRelayError::InvalidState("log follower already started".to_string())
        })?;
        let seed = match self.dialect.current_revision().await {
            Ok(rev) => rev,
            Err(e) => {
                *self.notify_rx.lock() = Some(notify_rx);
                return Err(e);
            }
        };
        self.follower_rev.store(seed, Ordering::SeqCst);

        let (out_tx, out_rx) = mpsc::channel(1);
        let log = Arc::clone(self);
        tokio::spawn(async move {
            log.poll_loop(token, notify_rx, out_tx, seed).await;
        });
        Ok(out_rx)
    }

    fn decode_rows(&self, rows: &[LogRow]) -> Result<Vec<DecodedRow>> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if row.is_gap_filler() {
                out.push(DecodedRow {
                    revision: row.revision,
                    event: None,
                });
                continue;
            }
            let Some(decode) = self.registry.get(&row.resource_name) else {
                tracing::warn!(
                    resource_name = %row.resource_name,
                    revision = row.revision,
                    "no decoder for resource, skipping row"
                );
                out.push(DecodedRow {
                    revision: row.revision,
                    event: None,
                });
                continue;
            };
            let event = decode(
                row.revision,
                row.create_revision,
                row.action(),
                row.created_at,
                &row.value,
            )?;
            out.push(DecodedRow {
                revision: row.revision,
                event: Some(event),
            });
        }
        Ok(out)
    }

    async fn poll_loop(
        &self,
        token: CancellationToken,
        mut notify_rx: mpsc::Receiver<u64>,
        out: mpsc::Sender<EventBatch>,
        seed: u64,
    ) {
        let cfg = &self.config;
        let mut current_rev = seed;

        let mut ticker = time::interval(cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut wait_for_more = true;
        let mut pending_gap: Option<PendingGap> = None;

        loop {
            if wait_for_more {
                tokio::select! {
                    _ = token.cancelled() => return,
                    maybe = notify_rx.recv() => match maybe {
                        Some(rev) if rev <= current_rev => continue,
                        Some(_) => {}
                        None => return,
                    },
                    _ = ticker.tick() => {}
                    _ = gap_wakeup(pending_gap.as_ref()) => {}
                }
            }
            wait_for_more = true;

            let rows = match self
                .dialect
                .after(None, current_rev, cfg.poll_batch_size)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::error!(current_rev, error = %e, "log poll failed");
                    continue;
                }
            };
            if rows.is_empty() {
                continue;
            }

            let decoded = match self.decode_rows(&rows) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::error!(error = %e, "failed to decode log rows");
                    continue;
                }
            };

            let full_page = rows.len() >= cfg.fast_path_threshold;
            let mut batch: EventBatch = Vec::new();
            let mut stalled = false;

            'scan: for row in decoded {
                // Close the distance to this row; every missing revision is
                // either still in flight (keep waiting) or burned (fill it).
                loop {
                    let expected = current_rev + 1;
                    if expected >= row.revision {
                        break;
                    }
                    match pending_gap {
                        Some(ref gap) if gap.revision == expected => {
                            if Instant::now() < gap.deadline {
                                stalled = true;
                                break 'scan;
                            }
                            if let Err(e) = self
                                .dialect
                                .fill_gap(expected, expected, Utc::now())
                                .await
                            {
                                tracing::error!(revision = expected, error = %e, "gap fill failed");
                                stalled = true;
                                break 'scan;
                            }
                            tracing::warn!(revision = expected, "filled burned revision");
                            batch.push(
                                Arc::new(GapEvent::new(expected, Utc::now()))
                                    as Arc<dyn ErasedEvent>,
                            );
                            pending_gap = None;
                            current_rev = expected;
                        }
                        _ => {
                            pending_gap = Some(PendingGap {
                                revision: expected,
                                deadline: Instant::now() + cfg.gap_fill_delay,
                            });
                            stalled = true;
                            break 'scan;
                        }
                    }
                }
                pending_gap = None;
                current_rev = row.revision;
                if let Some(event) = row.event {
                    batch.push(event);
                }
            }

            // Publish the cursor before the batch so a watcher subscribing
            // mid-broadcast reads a boundary its catch-up query covers.
            self.follower_rev.store(current_rev, Ordering::SeqCst);
            if !batch.is_empty() && out.send(batch).await.is_err() {
                return;
            }
            if full_page && !stalled {
                wait_for_more = false;
            }
        }
    }
}

async fn gap_wakeup(gap: Option<&PendingGap>) {
    match gap {
        Some(gap) => time::sleep_until(gap.deadline).await,
        None => std::future::pending().await,
    }
}
