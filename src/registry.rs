//! # Registry
//!
//! The fabric's object table, the direct analogue of `KVObjectsManager`'s
//! static `_objects` dict in the original — except instantiated per
//! `Fabric` rather than held as process-wide static state.
//!
//! Holds one lock over the `object_id -> Arc<Object>` map. This lock is
//! never held while a per-object lock is acquired, and vice versa: every
//! method here takes the registry lock just long enough to look up or
//! mutate the map, then drops it before touching an individual `Object`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{FabricError, Result};
use crate::object::Object;
use crate::publisher::PublisherHandle;
use crate::query::Query;

#[derive(Default)]
pub struct Registry {
    objects: RwLock<HashMap<String, Arc<Object>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, object_id: &str) -> bool {
        self.objects.read().unwrap().contains_key(object_id)
    }

    pub fn get(&self, object_id: &str) -> Option<Arc<Object>> {
        self.objects.read().unwrap().get(object_id).cloned()
    }

    /// Same as `get`, but fails with `FabricError::NotFound` on a miss
    /// instead of returning `None` — used wherever a missing object_id is
    /// itself the error, rather than just one outcome among several.
    pub fn try_get(&self, object_id: &str) -> Result<Arc<Object>> {
        self.get(object_id).ok_or_else(|| FabricError::NotFound(object_id.to_string()))
    }

    /// Insert or overwrite an object under its own id, marking it
    /// registered. Called by `Object::put` and by the subscriber when a
    /// brand-new replica arrives.
    pub fn insert(&self, object: Arc<Object>) {
        object.mark_registered();
        self.objects
            .write()
            .unwrap()
            .insert(object.object_id().to_string(), object);
    }

    pub fn delete(&self, object_id: &str) -> Option<Arc<Object>> {
        self.objects.write().unwrap().remove(object_id)
    }

    /// All objects satisfying `query`.
    pub fn query(&self, query: &Query) -> Vec<Arc<Object>> {
        self.objects
            .read()
            .unwrap()
            .values()
            .filter(|obj| obj.matches(query))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of every object currently registered, used by the
    /// TTL reaper and the re-announcer so neither has to hold the registry
    /// lock while walking individual objects.
    pub fn snapshot(&self) -> Vec<Arc<Object>> {
        self.objects.read().unwrap().values().cloned().collect()
    }

    /// Re-announce every originated object. Invoked periodically by the
    /// re-announcer, and once at startup for the `origin` self-object.
    pub fn publish_objects(&self, publisher: &PublisherHandle) {
        for obj in self.snapshot() {
            if obj.is_originator() {
                obj.put(self, publisher);
            }
        }
    }

    /// Unpublish every originated object, used by `Fabric::stop` during
    /// shutdown.
    pub fn unpublish_objects(&self, publisher: &PublisherHandle) {
        for obj in self.snapshot() {
            if obj.is_originator() {
                let _ = obj.delete(self, publisher);
            }
        }
    }

    /// Apply a decoded `publish` frame: reconstruct via
    /// `from_dict` and either merge into an existing replica (resetting its
    /// TTL) or insert as a brand-new replica.
    pub fn update(
        &self,
        incoming: crate::object::ObjectDict,
        local_origin: &crate::origin::Origin,
        signals: &Arc<crate::signals::SignalBus>,
        initial_ttl: i64,
    ) {
        if let Some(existing) = self.get(&incoming.object_id) {
            let timestamp = incoming.updated_at;
            let _ = existing.batch_update(incoming.attrs, Some(timestamp));
            existing.reset_ttl(initial_ttl);
        } else {
            let replica = Object::from_dict(
                incoming,
                local_origin.clone(),
                Arc::clone(signals),
                initial_ttl,
            );
            self.insert(replica);
        }
    }
}
