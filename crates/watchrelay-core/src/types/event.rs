use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// What a log row records about its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Create,
    Update,
    Delete,
    /// Placeholder for a revision whose history cannot be reconstructed.
    Gap,
}

impl EventAction {
    /// Map the `(created, deleted)` flags of a persisted row to an action.
    ///
    /// `(true, true)` is the synthetic gap-filler sentinel.
    pub fn from_flags(created: bool, deleted: bool) -> Self {
        match (created, deleted) {
            (true, true) => EventAction::Gap,
            (true, false) => EventAction::Create,
            (false, true) => EventAction::Delete,
            (false, false) => EventAction::Update,
        }
    }
}

/// A persisted entry of the append-only log table.
///
/// Rows are immutable once inserted; `revision` is globally unique and
/// strictly increasing in commit order.
#[derive(Debug, Clone)]
pub struct LogRow {
    pub revision: u64,
    pub create_revision: u64,
    pub prev_revision: u64,
    pub resource_name: String,
    pub created: bool,
    pub deleted: bool,
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl LogRow {
    pub fn action(&self) -> EventAction {
        EventAction::from_flags(self.created, self.deleted)
    }

    /// True for the synthetic `(created, deleted)` sentinel row inserted to
    /// close a burned revision.
    pub fn is_gap_filler(&self) -> bool {
        self.created && self.deleted
    }
}

/// A decoded, typed log entry as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Event<T> {
    pub create_revision: u64,
    pub revision: u64,
    pub resource_name: String,
    pub action: EventAction,
    /// `None` only when `action` is [`EventAction::Gap`].
    pub value: Option<T>,
    pub created_at: DateTime<Utc>,
}

impl<T> Event<T> {
    pub fn is_gap(&self) -> bool {
        self.action == EventAction::Gap
    }

    /// A typed view of a gap: no payload, no resource name.
    pub fn gap(revision: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            create_revision: revision,
            revision,
            resource_name: String::new(),
            action: EventAction::Gap,
            value: None,
            created_at,
        }
    }
}

/// Type-erased event, carried between the follower and the publisher.
///
/// The concrete type behind the trait object is the `Event<T>` produced by
/// the decoder registered for the row's resource name; subscribers recover
/// it through [`ErasedEvent::as_any`].
pub trait ErasedEvent: Send + Sync {
    fn revision(&self) -> u64;
    fn create_revision(&self) -> u64;
    fn resource_name(&self) -> &str;
    fn action(&self) -> EventAction;
    fn created_at(&self) -> DateTime<Utc>;
    fn as_any(&self) -> &dyn Any;

    fn is_gap(&self) -> bool {
        self.action() == EventAction::Gap
    }
}

impl std::fmt::Debug for dyn ErasedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasedEvent")
            .field("revision", &self.revision())
            .field("create_revision", &self.create_revision())
            .field("resource_name", &self.resource_name())
            .field("action", &self.action())
            .field("created_at", &self.created_at())
            .finish()
    }
}

impl<T: Send + Sync + 'static> ErasedEvent for Event<T> {
    fn revision(&self) -> u64 {
        self.revision
    }

    fn create_revision(&self) -> u64 {
        self.create_revision
    }

    fn resource_name(&self) -> &str {
        &self.resource_name
    }

    fn action(&self) -> EventAction {
        self.action
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The follower's stand-in for a revision with no reconstructible payload.
#[derive(Debug, Clone)]
pub struct GapEvent {
    pub revision: u64,
    pub created_at: DateTime<Utc>,
}

impl GapEvent {
    pub fn new(revision: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            revision,
            created_at,
        }
    }
}

impl ErasedEvent for GapEvent {
    fn revision(&self) -> u64 {
        self.revision
    }

    fn create_revision(&self) -> u64 {
        self.revision
    }

    fn resource_name(&self) -> &str {
        ""
    }

    fn action(&self) -> EventAction {
        EventAction::Gap
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One poll's worth of ordered events.
pub type EventBatch = Vec<Arc<dyn ErasedEvent>>;
