//! SQLite backend for the watchrelay event log.
//!
//! [`SqliteDialect`] implements the [`watchrelay_core::Dialect`] trait over
//! a shared `rusqlite` connection. Opening the dialect creates the log
//! table and its indexes if absent and reports the current maximum
//! revision for seeding the writer sequence.

pub mod dialect;
pub mod schema;

pub use dialect::SqliteDialect;
pub use schema::LOG_TABLE;
