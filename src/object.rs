//! # Object
//!
//! An identified, versioned attribute map. This is the direct analogue of
//! `kvobject.py`'s `KVObject`: a per-object lock guards
//! `attrs`/`updated_at`/`pending_events`, ownership (`origin_id` vs. the
//! local origin) gates whether new attribute keys may be introduced, and a
//! separate inbound queue buffers events applied by the pipeline on the
//! replica side.
//!
//! `object_id` and `origin_id` never change after construction, so they are
//! stored outside the lock — this is what lets `put()`/`is_originator()`
//! run without ever touching the per-object mutex, closing off a
//! registry/object lock-order deadlock the original code risked (see
//! `registered`, below).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{self, is_structural_field};
use crate::error::{FabricError, Result};
use crate::event::Event;
use crate::origin::Origin;
use crate::publisher::PublisherHandle;
use crate::query::Query;
use crate::registry::Registry;
use crate::signals::SignalBus;

mod timestamp_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::codec::format_timestamp(*ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::codec::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// The wire/canonical mapping form of an object: structural fields plus
/// flattened attributes, matching `to_dict`/`from_dict` in the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDict {
    pub object_id: String,
    pub origin_id: String,
    #[serde(with = "timestamp_format")]
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub collection: Option<String>,
    #[serde(flatten)]
    pub attrs: HashMap<String, Value>,
}

impl ObjectDict {
    /// Flatten into the single `HashMap<String, Value>` that `Query`
    /// matches against (structural fields are included alongside attrs).
    pub fn to_flat_map(&self) -> HashMap<String, Value> {
        let mut map = self.attrs.clone();
        map.insert("object_id".into(), Value::String(self.object_id.clone()));
        map.insert("origin_id".into(), Value::String(self.origin_id.clone()));
        map.insert(
            "updated_at".into(),
            Value::String(codec::format_timestamp(self.updated_at)),
        );
        if let Some(c) = &self.collection {
            map.insert("collection".into(), Value::String(c.clone()));
        }
        map
    }
}

struct Inner {
    updated_at: DateTime<Utc>,
    collection: Option<String>,
    attrs: HashMap<String, Value>,
    pending_events: HashMap<String, Event>,
}

/// An object in the fabric: either originated locally or a replica of a
/// peer's object.
pub struct Object {
    object_id: String,
    origin_id: String,
    local_origin: Origin,
    signals: Arc<SignalBus>,
    inner: Mutex<Inner>,
    inbound: Mutex<VecDeque<Event>>,
    ttl: AtomicI64,
    /// Set once this object has been inserted into a registry. Read
    /// lock-free by `set()`/`notify()` so that `put()` never needs to hold
    /// the per-object lock while reasoning about registry membership.
    registered: AtomicBool,
}

impl Object {
    /// Construct a new originated object, not yet registered.
    pub fn new_originated(
        local_origin: Origin,
        object_id: Option<String>,
        collection: Option<String>,
        signals: Arc<SignalBus>,
    ) -> Arc<Self> {
        let object_id = object_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let origin_id = local_origin.as_str().to_string();
        Arc::new(Self {
            object_id,
            origin_id,
            local_origin,
            signals,
            inner: Mutex::new(Inner {
                updated_at: Utc::now(),
                collection,
                attrs: HashMap::new(),
                pending_events: HashMap::new(),
            }),
            inbound: Mutex::new(VecDeque::new()),
            ttl: AtomicI64::new(0),
            registered: AtomicBool::new(false),
        })
    }

    /// Construct a replica from a decoded `publish` frame.
    pub fn from_dict(
        dict: ObjectDict,
        local_origin: Origin,
        signals: Arc<SignalBus>,
        initial_ttl: i64,
    ) -> Arc<Self> {
        Arc::new(Self {
            object_id: dict.object_id,
            origin_id: dict.origin_id,
            local_origin,
            signals,
            inner: Mutex::new(Inner {
                updated_at: dict.updated_at,
                collection: dict.collection,
                attrs: dict.attrs,
                pending_events: HashMap::new(),
            }),
            inbound: Mutex::new(VecDeque::new()),
            ttl: AtomicI64::new(initial_ttl),
            registered: AtomicBool::new(false),
        })
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    pub fn collection(&self) -> Option<String> {
        self.inner.lock().unwrap().collection.clone()
    }

    pub fn signals(&self) -> &Arc<SignalBus> {
        &self.signals
    }

    pub fn is_originator(&self) -> bool {
        self.origin_id == self.local_origin.as_str()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_registered(&self) {
        self.registered.store(true, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().attrs.get(key).cloned()
    }

    /// Canonical mapping form.
    pub fn to_dict(&self) -> ObjectDict {
        let inner = self.inner.lock().unwrap();
        ObjectDict {
            object_id: self.object_id.clone(),
            origin_id: self.origin_id.clone(),
            updated_at: inner.updated_at,
            collection: inner.collection.clone(),
            attrs: inner.attrs.clone(),
        }
    }

    pub fn matches(&self, query: &Query) -> bool {
        query.matches(&self.to_dict().to_flat_map())
    }

    /// Originator-side attribute write.
    pub fn set(&self, key: &str, value: Value, timestamp: Option<DateTime<Utc>>) -> Result<()> {
        if is_structural_field(key) {
            return Err(FabricError::KeyError(key.to_string()));
        }

        let mut inner = self.inner.lock().unwrap();
        let key_exists = inner.attrs.contains_key(key);
        if !key_exists && !self.is_originator() {
            return Err(FabricError::KeyError(key.to_string()));
        }

        inner.attrs.insert(key.to_string(), value.clone());
        inner.updated_at = timestamp.unwrap_or_else(Utc::now);

        if self.is_registered() {
            let ev = Event::new(self.object_id.clone(), key.to_string(), value, inner.updated_at);
            inner.pending_events.insert(key.to_string(), ev);
        }

        Ok(())
    }

    pub fn batch_set(&self, updates: HashMap<String, Value>, timestamp: Option<DateTime<Utc>>) -> Result<()> {
        for (k, v) in updates {
            self.set(&k, v, timestamp)?;
        }
        Ok(())
    }

    /// Replica-side attribute write. Never generates a pending event.
    pub fn update(&self, key: &str, value: Value, timestamp: Option<DateTime<Utc>>) -> Result<()> {
        if is_structural_field(key) {
            return Err(FabricError::KeyError(key.to_string()));
        }

        let mut inner = self.inner.lock().unwrap();
        let changed = inner.attrs.get(key) != Some(&value);
        if changed {
            inner.attrs.insert(key.to_string(), value);
            inner.updated_at = timestamp.unwrap_or_else(Utc::now);
        }
        Ok(())
    }

    pub fn batch_update(&self, updates: HashMap<String, Value>, timestamp: Option<DateTime<Utc>>) -> Result<()> {
        for (k, v) in updates {
            self.update(&k, v, timestamp)?;
        }
        Ok(())
    }

    /// Queue an inbound event for later application by a pipeline worker.
    pub(crate) fn push_inbound(&self, event: Event) {
        self.inbound.lock().unwrap().push_back(event);
    }

    /// Drain the inbound queue into a last-write-wins update map, returning
    /// both the map (for `batch_update`) and the original events in arrival
    /// order (for firing "event received" once per event after the lock is
    /// released).
    pub(crate) fn drain_inbound(&self) -> (HashMap<String, Value>, Vec<Event>) {
        let mut queue = self.inbound.lock().unwrap();
        let mut map = HashMap::new();
        let mut events = Vec::with_capacity(queue.len());
        while let Some(ev) = queue.pop_front() {
            map.insert(ev.key.clone(), ev.value.clone());
            events.push(ev);
        }
        (map, events)
    }

    /// Replica TTL, reset on every refresh.
    pub fn ttl(&self) -> i64 {
        self.ttl.load(Ordering::SeqCst)
    }

    pub(crate) fn reset_ttl(&self, value: i64) {
        self.ttl.store(value, Ordering::SeqCst);
    }

    pub(crate) fn decrement_ttl(&self, by: i64) -> i64 {
        self.ttl.fetch_sub(by, Ordering::SeqCst) - by
    }

    /// Register this object and announce it on the broker, iff it is
    /// originated. Always re-announces on every call when originated —
    /// this is what lets the re-announcer refresh peers' TTLs by calling
    /// `put()` on every object each cycle. Deliberately takes no per-object
    /// lock, so it never nests under the registry lock.
    pub fn put(self: &Arc<Self>, registry: &Registry, publisher: &PublisherHandle) {
        if !self.is_originator() {
            return;
        }
        publisher.publish_object(&self.origin_id, self.to_dict());
        registry.insert(Arc::clone(self));
    }

    /// Flush pending mutations to the broker.
    pub fn notify(self: &Arc<Self>, registry: &Registry, publisher: &PublisherHandle) {
        if !self.is_registered() {
            self.put(registry, publisher);
        }

        let events: Vec<Event> = {
            let mut inner = self.inner.lock().unwrap();
            inner.updated_at = Utc::now();
            inner.pending_events.drain().map(|(_, v)| v).collect()
        };

        if !events.is_empty() {
            publisher.publish_events(&self.origin_id, &events);
            for ev in &events {
                ev.send(&self.signals);
            }
        }
    }

    /// Unpublish. Only valid for originated objects.
    pub fn delete(self: &Arc<Self>, registry: &Registry, publisher: &PublisherHandle) -> Result<()> {
        if !self.is_originator() {
            return Err(FabricError::NotOriginator(self.object_id.clone()));
        }
        publisher.publish_delete(&self.origin_id, &self.object_id);
        registry.delete(&self.object_id);
        Ok(())
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collection = self.inner.lock().unwrap().collection.clone();
        match collection {
            Some(c) => write!(f, "Object:{}.{}", c, self.object_id),
            None => write!(f, "Object:{}", self.object_id),
        }
    }
}
