use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use watchrelay_core::error::{Result, WatchRelayError};
use watchrelay_core::types::{ErasedEvent, Event, EventAction};
use watchrelay_core::VersionedResource;

/// Turns a log row's header and payload bytes into a typed event.
pub type DecodeFn = Arc<
    dyn Fn(u64, u64, EventAction, DateTime<Utc>, &[u8]) -> Result<Arc<dyn ErasedEvent>>
        + Send
        + Sync,
>;

/// Maps resource names to the decoder registered for them.
///
/// Populated at startup via `WatchRelay::register_resource`; reads vastly
/// outnumber writes, hence the read-biased lock.
pub struct ResourceRegistry {
    decoders: RwLock<HashMap<String, DecodeFn>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            decoders: RwLock::new(HashMap::new()),
        }
    }

    /// Register `decode` under `name`. Registering the same name twice is
    /// an error.
    pub fn register(&self, name: String, decode: DecodeFn) -> Result<()> {
        let mut decoders = self.decoders.write();
        if decoders.contains_key(&name) {
            return Err(WatchRelayError::AlreadyRegistered(name));
        }
        decoders.insert(name, decode);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.decoders.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<DecodeFn> {
        self.decoders.read().get(name).cloned()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the JSON decoder for a resource type.
pub fn typed_decoder<T: VersionedResource>(name: String) -> DecodeFn {
    Arc::new(
        move |revision, create_revision, action, created_at, bytes| {
            let value: T = serde_json::from_slice(bytes)?;
            Ok(Arc::new(Event {
                create_revision,
                revision,
                resource_name: name.clone(),
                action,
                value: Some(value),
                created_at,
            }))
        },
    )
}
