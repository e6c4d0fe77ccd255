//! watchrelay-core: traits and types for the watchrelay event log
//!
//! This crate defines the abstractions shared by the watchrelay crates:
//! - The revision [`Sequence`] every writer transaction draws from
//! - The [`Dialect`] trait a SQL backend implements for the log table
//! - The persisted [`LogRow`] and the typed / type-erased event forms
//! - The [`VersionedResource`] trait callers implement on their records

pub mod config;
pub mod dialect;
pub mod error;
pub mod resource;
pub mod sequence;
pub mod types;

pub use config::RelayConfig;
pub use dialect::Dialect;
pub use error::{Result, WatchRelayError};
pub use resource::{resource_name_of, Meta, VersionedResource};
pub use sequence::Sequence;
pub use types::{ErasedEvent, Event, EventAction, EventBatch, GapEvent, LogRow};
