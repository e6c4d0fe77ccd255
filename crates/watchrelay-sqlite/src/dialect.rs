use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode};

use watchrelay_core::dialect::Dialect;
use watchrelay_core::error::{Result, WatchRelayError};
use watchrelay_core::types::LogRow;

use crate::schema;

const LOG_COLUMNS: &str =
    "revision, create_revision, prev_revision, resource_name, created, deleted, value, created_at";

/// SQLite-backed log dialect.
///
/// Shares a single connection with the rest of the relay; every call runs
/// on the blocking pool so the dialect is safe to use from async tasks.
pub struct SqliteDialect {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDialect {
    /// Initialize the schema on `conn` and return the dialect together with
    /// the current maximum revision (the sequence seed).
    pub fn open(conn: Arc<Mutex<Connection>>) -> Result<(Self, u64)> {
        let start_rev = {
            let guard = conn.lock();
            schema::configure(&guard)?;
            schema::init(&guard)?;
            current_revision_on(&guard)?
        };
        Ok((Self { conn }, start_rev))
    }

    async fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| WatchRelayError::Database(format!("blocking query failed: {e}")))?
    }
}

fn db_err(e: rusqlite::Error) -> WatchRelayError {
    WatchRelayError::Database(e.to_string())
}

fn current_revision_on(conn: &Connection) -> Result<u64> {
    let max: Option<i64> = conn
        .query_row("SELECT MAX(revision) FROM watchrelay", [], |row| row.get(0))
        .map_err(db_err)?;
    Ok(max.unwrap_or(0) as u64)
}

fn row_to_log_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogRow> {
    Ok(LogRow {
        revision: row.get::<_, i64>(0)? as u64,
        create_revision: row.get::<_, i64>(1)? as u64,
        prev_revision: row.get::<_, i64>(2)? as u64,
        resource_name: row.get(3)?,
        created: row.get(4)?,
        deleted: row.get(5)?,
        value: row.get::<_, Option<Vec<u8>>>(6)?.unwrap_or_default(),
        created_at: row.get(7)?,
    })
}

#[async_trait]
impl Dialect for SqliteDialect {
    async fn after(
        &self,
        resource_name: Option<&str>,
        revision: u64,
        limit: u64,
    ) -> Result<Vec<LogRow>> {
        let name = resource_name.map(str::to_owned);
        self.with_conn(move |conn| {
            let mut sql = match &name {
                Some(_) => format!(
                    "SELECT {LOG_COLUMNS} FROM watchrelay
                     WHERE resource_name = ?1 AND revision > ?2
                     ORDER BY revision ASC"
                ),
                None => format!(
                    "SELECT {LOG_COLUMNS} FROM watchrelay
                     WHERE revision > ?1
                     ORDER BY revision ASC"
                ),
            };
            if limit > 0 {
                sql.push_str(&format!(" LIMIT {limit}"));
            }

            let mut stmt = conn.prepare_cached(&sql).map_err(db_err)?;
            let rows = match &name {
                Some(n) => stmt
                    .query_map(params![n, revision as i64], row_to_log_row)
                    .map_err(db_err)?
                    .collect::<rusqlite::Result<Vec<_>>>(),
                None => stmt
                    .query_map(params![revision as i64], row_to_log_row)
                    .map_err(db_err)?
                    .collect::<rusqlite::Result<Vec<_>>>(),
            };
            rows.map_err(db_err)
        })
        .await
    }

    async fn current_revision(&self) -> Result<u64> {
        self.with_conn(current_revision_on).await
    }

    async fn fill_gap(
        &self,
        revision: u64,
        create_revision: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(move |conn| {
            let res = conn.execute(
                "INSERT INTO watchrelay
                    (revision, create_revision, prev_revision, resource_name,
                     created, deleted, value, created_at)
                 VALUES (?1, ?2, 0, '', 1, 1, X'', ?3)",
                params![revision as i64, create_revision as i64, now],
            );
            match res {
                Ok(_) => Ok(()),
                // Someone else already closed this gap.
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(())
                }
                Err(e) => Err(db_err(e)),
            }
        })
        .await
    }

    async fn clear_expired(&self, older_than: Duration) -> Result<usize> {
        let horizon = chrono::Duration::from_std(older_than)
            .map_err(|e| WatchRelayError::InvalidState(format!("retention horizon: {e}")))?;
        let cutoff = Utc::now() - horizon;
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM watchrelay WHERE created_at < ?1", params![cutoff])
                .map_err(db_err)
        })
        .await
    }
}
