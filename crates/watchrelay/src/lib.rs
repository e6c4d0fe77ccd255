//! WatchRelay: a watchable, revision-ordered event log over SQLite
//!
//! WatchRelay turns an ordinary relational table of domain resources into a
//! linearizable, monotonically versioned event stream:
//! - **Writers**: every create/update/delete commits the resource row and a
//!   log row in one transaction, sharing a process-wide revision
//! - **Follower**: a polling task linearizes committed rows into ordered
//!   event batches, synthesizing gap events for burned revisions
//! - **Publisher**: fans the stream out to typed subscribers with bounded
//!   buffers; slow consumers are dropped, never the producer
//! - **Watch**: resumable catch-up + live tailing from any revision
//!
//! # Quick Start
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use tokio_util::sync::CancellationToken;
//! use watchrelay::{Meta, VersionedResource, WatchRelay};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Task {
//!     #[serde(flatten)]
//!     meta: Meta,
//!     uuid: String,
//! }
//!
//! impl VersionedResource for Task {
//!     fn resource_version(&self) -> u64 {
//!         self.meta.resource_version
//!     }
//!     fn set_resource_version(&mut self, version: u64) {
//!         self.meta.resource_version = version;
//!     }
//!     fn resource_key(&self) -> String {
//!         self.uuid.clone()
//!     }
//! }
//!
//! # async fn run() -> watchrelay::Result<()> {
//! let conn = rusqlite::Connection::open("tasks.db")
//!     .map_err(|e| watchrelay::WatchRelayError::Database(e.to_string()))?;
//! let relay = WatchRelay::new(conn)?;
//! relay.register_resource::<Task>()?;
//! relay.start().await?;
//!
//! // Write: resource row + log row commit together.
//! let mut tasks = vec![Task {
//!     meta: Meta::default(),
//!     uuid: "t-1".to_string(),
//! }];
//! relay.create(None, None, &mut tasks)?;
//!
//! // Watch: history from revision 0, then the live tail.
//! let mut watch = relay.watch::<Task>(CancellationToken::new(), None, 0).await?;
//! while let Some(batch) = watch.events.recv().await {
//!     for event in batch {
//!         println!("rev {} {:?}", event.revision, event.action);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod log;
pub mod publisher;
pub mod registry;
pub mod relay;
pub mod watch;

// Re-export core types
pub use watchrelay_core::{
    resource_name_of, Dialect, ErasedEvent, Event, EventAction, EventBatch, GapEvent, LogRow,
    Meta, RelayConfig, Result, Sequence, VersionedResource, WatchRelayError,
};

// Re-export the SQLite backend
pub use watchrelay_sqlite::SqliteDialect;

// Re-export main types from this crate
pub use log::SqlLog;
pub use publisher::Publisher;
pub use registry::ResourceRegistry;
pub use relay::{BatchHook, Hook, WatchRelay};
pub use watch::{EventPredicate, RawWatchResult, WatchResult};
