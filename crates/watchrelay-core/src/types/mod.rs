pub mod event;

pub use event::{ErasedEvent, Event, EventAction, EventBatch, GapEvent, LogRow};
