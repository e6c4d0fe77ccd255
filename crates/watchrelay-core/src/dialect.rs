use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::LogRow;

/// Backend-specific operations over the append-only log table.
///
/// Implementations own table and index creation and must make
/// [`Dialect::fill_gap`] idempotent: a duplicate-primary-key failure means
/// another writer already closed the gap and is reported as success.
#[async_trait]
pub trait Dialect: Send + Sync {
    /// Log rows with `revision > revision`, ascending, up to `limit`
    /// (`0` means unlimited). `None` selects all resource names; this is
    /// the form the follower polls with.
    async fn after(
        &self,
        resource_name: Option<&str>,
        revision: u64,
        limit: u64,
    ) -> Result<Vec<LogRow>>;

    /// `MAX(revision)` of the log table, `0` when empty.
    async fn current_revision(&self) -> Result<u64>;

    /// Insert the synthetic `(created, deleted)` sentinel row closing a
    /// burned revision.
    async fn fill_gap(
        &self,
        revision: u64,
        create_revision: u64,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete log rows older than the horizon; returns how many went.
    async fn clear_expired(&self, older_than: Duration) -> Result<usize>;
}
