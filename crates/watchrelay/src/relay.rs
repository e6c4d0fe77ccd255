use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, Transaction};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use watchrelay_core::error::{Result, WatchRelayError};
use watchrelay_core::resource::{resource_name_of, VersionedResource};
use watchrelay_core::types::{Event, EventBatch, LogRow};
use watchrelay_core::{RelayConfig, Sequence};
use watchrelay_sqlite::SqliteDialect;

use crate::log::SqlLog;
use crate::publisher::Publisher;
use crate::registry::{typed_decoder, ResourceRegistry};
use crate::watch::{
    pump_erased, pump_typed, typed_events, EventPredicate, RawWatchResult, WatchResult,
};

/// Runs inside the writer transaction, before or after the rows of a batch
/// operation are written. Any error aborts the whole transaction.
pub type BatchHook<'h, T> = &'h dyn Fn(&Transaction<'_>, &mut [T]) -> Result<()>;

/// Single-resource counterpart of [`BatchHook`].
pub type Hook<'h, T> = &'h dyn Fn(&Transaction<'_>, &mut T) -> Result<()>;

/// The embeddable relay: a revision-ordered log over an ordinary SQLite
/// database, with transactional writers and live watchers.
///
/// Owns the revision sequence, the log follower, and the publisher;
/// [`WatchRelay::close`] (or dropping the relay) tears all of them down.
pub struct WatchRelay {
    conn: Arc<Mutex<Connection>>,
    seq: Sequence,
    registry: Arc<ResourceRegistry>,
    log: Arc<SqlLog>,
    publisher: Arc<Publisher>,
    config: RelayConfig,
    root: CancellationToken,
    start_lock: tokio::sync::Mutex<bool>,
}

impl WatchRelay {
    /// Open a relay over `conn`, creating the log table if absent and
    /// seeding the revision sequence from its current maximum.
    pub fn new(conn: Connection) -> Result<Self> {
        Self::with_config(conn, RelayConfig::default())
    }

    pub fn with_config(conn: Connection, config: RelayConfig) -> Result<Self> {
        let conn = Arc::new(Mutex::new(conn));
        let (dialect, start_rev) = SqliteDialect::open(Arc::clone(&conn))?;
        let registry = Arc::new(ResourceRegistry::new());
        let log = Arc::new(SqlLog::new(
            Arc::new(dialect),
            Arc::clone(&registry),
            config.clone(),
        ));
        Ok(Self {
            conn,
            seq: Sequence::new(start_rev),
            registry,
            log,
            publisher: Arc::new(Publisher::new()),
            config,
            root: CancellationToken::new(),
            start_lock: tokio::sync::Mutex::new(false),
        })
    }

    /// Register a resource type: installs its decoder and creates its
    /// table if absent. Registering the same type twice is an error.
    pub fn register_resource<T: VersionedResource>(&self) -> Result<()> {
        let name = resource_name_of::<T>();
        self.registry
            .register(name.clone(), typed_decoder::<T>(name.clone()))?;
        let conn = self.conn.lock();
        conn.execute_batch(&resource_table_ddl(&name))
            .map_err(db_err)?;
        Ok(())
    }

    /// Start the follower and publisher. Idempotent; `watch` calls it
    /// lazily on first use.
    pub async fn start(&self) -> Result<()> {
        let mut started = self.start_lock.lock().await;
        if *started {
            return Ok(());
        }
        let source = self.log.start(self.root.child_token()).await?;
        self.publisher.start(source);
        *started = true;
        Ok(())
    }

    /// Tear down the follower, the publisher, and every subscriber.
    pub fn close(&self) {
        self.root.cancel();
    }

    /// The most recently allocated revision.
    pub fn current_revision(&self) -> u64 {
        self.seq.current()
    }

    /// Drop log rows older than the horizon; returns how many went.
    pub async fn clear_expired(&self, older_than: Duration) -> Result<usize> {
        self.log.clear_expired(older_than).await
    }

    /// Insert `resources` and their log rows in one transaction.
    pub fn create<T: VersionedResource>(
        &self,
        before: Option<BatchHook<'_, T>>,
        after: Option<BatchHook<'_, T>>,
        resources: &mut [T],
    ) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }
        let name = self.registered_name::<T>()?;

        let last_rev;
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction().map_err(db_err)?;
            if let Some(hook) = before {
                hook(&tx, resources)?;
            }

            let now = Utc::now();
            let mut revision = 0;
            for resource in resources.iter_mut() {
                revision = self.seq.next();
                resource.set_resource_version(revision);
                let value = serde_json::to_vec(resource)?;
                tx.execute(
                    &format!(
                        r#"INSERT INTO "{name}" (key, resource_version, create_revision, value)
                           VALUES (?1, ?2, ?3, ?4)"#
                    ),
                    params![resource.resource_key(), revision as i64, revision as i64, &value],
                )
                .map_err(db_err)?;
                insert_log_row(
                    &tx,
                    &LogRow {
                        revision,
                        create_revision: revision,
                        prev_revision: 0,
                        resource_name: name.clone(),
                        created: true,
                        deleted: false,
                        value,
                        created_at: now,
                    },
                )?;
            }

            if let Some(hook) = after {
                hook(&tx, resources)?;
            }
            tx.commit().map_err(db_err)?;
            last_rev = revision;
        }
        self.log.notify(last_rev);
        Ok(())
    }

    /// Replace `resource` and append its log row in one transaction.
    pub fn update<T: VersionedResource>(
        &self,
        before: Option<Hook<'_, T>>,
        after: Option<Hook<'_, T>>,
        resource: &mut T,
    ) -> Result<()> {
        let name = self.registered_name::<T>()?;

        let revision;
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction().map_err(db_err)?;
            if let Some(hook) = before {
                hook(&tx, resource)?;
            }

            let key = resource.resource_key();
            let (prev_revision, create_revision) = resource_row(&tx, &name, &key)?;
            revision = self.seq.next();
            resource.set_resource_version(revision);
            let value = serde_json::to_vec(resource)?;
            tx.execute(
                &format!(r#"UPDATE "{name}" SET resource_version = ?1, value = ?2 WHERE key = ?3"#),
                params![revision as i64, &value, key],
            )
            .map_err(db_err)?;
            insert_log_row(
                &tx,
                &LogRow {
                    revision,
                    create_revision,
                    prev_revision,
                    resource_name: name.clone(),
                    created: false,
                    deleted: false,
                    value,
                    created_at: Utc::now(),
                },
            )?;

            if let Some(hook) = after {
                hook(&tx, resource)?;
            }
            tx.commit().map_err(db_err)?;
        }
        self.log.notify(revision);
        Ok(())
    }

    /// Apply a partial modification the caller has already merged into
    /// `resource`. Same transaction shape as [`WatchRelay::update`].
    pub fn patch<T: VersionedResource>(
        &self,
        before: Option<Hook<'_, T>>,
        after: Option<Hook<'_, T>>,
        resource: &mut T,
    ) -> Result<()> {
        self.update(before, after, resource)
    }

    /// Delete `resources` and append their log rows in one transaction.
    pub fn delete<T: VersionedResource>(
        &self,
        before: Option<BatchHook<'_, T>>,
        after: Option<BatchHook<'_, T>>,
        resources: &mut [T],
    ) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }
        let name = self.registered_name::<T>()?;

        let last_rev;
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction().map_err(db_err)?;
            if let Some(hook) = before {
                hook(&tx, resources)?;
            }

            let now = Utc::now();
            let mut revision = 0;
            for resource in resources.iter_mut() {
                let key = resource.resource_key();
                let (prev_revision, create_revision) = resource_row(&tx, &name, &key)?;
                revision = self.seq.next();
                resource.set_resource_version(revision);
                let value = serde_json::to_vec(resource)?;
                tx.execute(
                    &format!(r#"DELETE FROM "{name}" WHERE key = ?1"#),
                    params![key],
                )
                .map_err(db_err)?;
                insert_log_row(
                    &tx,
                    &LogRow {
                        revision,
                        create_revision,
                        prev_revision,
                        resource_name: name.clone(),
                        created: false,
                        deleted: true,
                        value,
                        created_at: now,
                    },
                )?;
            }

            if let Some(hook) = after {
                hook(&tx, resources)?;
            }
            tx.commit().map_err(db_err)?;
            last_rev = revision;
        }
        self.log.notify(last_rev);
        Ok(())
    }

    /// Historical page of `T` events with `revision > revision`, up to
    /// `limit` (`0` means unlimited), plus the log's high-watermark.
    pub async fn after<T: VersionedResource>(
        &self,
        cond: Option<EventPredicate<T>>,
        revision: u64,
        limit: u64,
    ) -> Result<(u64, Vec<Event<T>>)> {
        let name = self.registered_name::<T>()?;
        let (current_rev, erased) = self.log.after(Some(&name), revision, limit).await?;
        let events = typed_events::<T>(&erased, 0, cond.as_ref());
        Ok((current_rev, events))
    }

    /// Watch `T` events live, starting from `from_rev` (inclusive when
    /// `from_rev > 0`). Historical events are delivered first, then the
    /// live tail, with no gaps, duplicates, or reordering.
    pub async fn watch<T: VersionedResource>(
        &self,
        token: CancellationToken,
        cond: Option<EventPredicate<T>>,
        from_rev: u64,
    ) -> Result<WatchResult<T>> {
        let name = self.registered_name::<T>()?;
        if self.root.is_cancelled() {
            return Err(WatchRelayError::Cancelled);
        }
        self.start().await?;

        // Resume includes the event at from_rev itself.
        let rev = from_rev.saturating_sub(1);

        let (subscriber_id, live) = self
            .publisher
            .subscribe(Some(name.clone()), self.config.subscriber_buffer);
        // Everything at or below the boundary comes from the catch-up
        // query; everything above it comes from the live stream.
        let boundary = self.log.follower_revision();

        let history = match self.log.after(Some(&name), rev, 0).await {
            Ok((_, events)) => events,
            Err(e) => {
                self.publisher.unsubscribe(subscriber_id);
                return Err(e);
            }
        };
        let capped: EventBatch = history
            .into_iter()
            .filter(|e| e.revision() <= boundary)
            .collect();
        let typed_history = typed_events::<T>(&capped, rev, cond.as_ref());
        let last_rev = boundary.max(rev);

        let (out_tx, out_rx) = mpsc::channel(self.config.subscriber_buffer);
        tokio::spawn(pump_typed(
            token,
            Arc::clone(&self.publisher),
            subscriber_id,
            live,
            out_tx,
            typed_history,
            last_rev,
            cond,
        ));
        Ok(WatchResult {
            revision: rev,
            events: out_rx,
        })
    }

    /// Watch every registered resource in one revision-ordered stream.
    pub async fn watch_all(
        &self,
        token: CancellationToken,
        from_rev: u64,
    ) -> Result<RawWatchResult> {
        if self.root.is_cancelled() {
            return Err(WatchRelayError::Cancelled);
        }
        self.start().await?;

        let rev = from_rev.saturating_sub(1);

        let (subscriber_id, live) = self
            .publisher
            .subscribe(None, self.config.subscriber_buffer);
        let boundary = self.log.follower_revision();

        let history = match self.log.after(None, rev, 0).await {
            Ok((_, events)) => events,
            Err(e) => {
                self.publisher.unsubscribe(subscriber_id);
                return Err(e);
            }
        };
        let capped: EventBatch = history
            .into_iter()
            .filter(|e| e.revision() <= boundary)
            .collect();
        let last_rev = boundary.max(rev);

        let (out_tx, out_rx) = mpsc::channel(self.config.subscriber_buffer);
        tokio::spawn(pump_erased(
            token,
            Arc::clone(&self.publisher),
            subscriber_id,
            live,
            out_tx,
            capped,
            last_rev,
        ));
        Ok(RawWatchResult {
            revision: rev,
            events: out_rx,
        })
    }

    fn registered_name<T: VersionedResource>(&self) -> Result<String> {
        let name = resource_name_of::<T>();
        if !self.log.is_registered(&name) {
            return Err(WatchRelayError::NotRegistered(name));
        }
        Ok(name)
    }
}

impl Drop for WatchRelay {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

fn db_err(e: rusqlite::Error) -> WatchRelayError {
    WatchRelayError::Database(e.to_string())
}

fn resource_table_ddl(name: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS "{name}" (
            key TEXT PRIMARY KEY,
            resource_version INTEGER NOT NULL,
            create_revision INTEGER NOT NULL,
            value BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS "{name}_resource_version_index"
            ON "{name}" (resource_version);"#
    )
}

fn resource_row(tx: &Transaction<'_>, name: &str, key: &str) -> Result<(u64, u64)> {
    tx.query_row(
        &format!(r#"SELECT resource_version, create_revision FROM "{name}" WHERE key = ?1"#),
        params![key],
        |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
    )
    .map_err(db_err)
}

fn insert_log_row(tx: &Transaction<'_>, row: &LogRow) -> Result<()> {
    tx.execute(
        "INSERT INTO watchrelay
            (revision, create_revision, prev_revision, resource_name,
             created, deleted, value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            row.revision as i64,
            row.create_revision as i64,
            row.prev_revision as i64,
            row.resource_name,
            row.created,
            row.deleted,
            row.value,
            row.created_at,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}
