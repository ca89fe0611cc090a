//! # Change Events
//!
//! An `Event` records one attribute mutation on one object. It is the unit
//! carried in an `events` broker frame, and the unit drained
//! from an object's pending buffer by `notify()` and from its inbound queue
//! by a pipeline worker.
//!
//! This mirrors `kvevent.py`'s `KVEvent` in the original: a flat
//! `(object_id, key, value, timestamp)` record plus `send()`/`receive()`
//! hooks that fire the fabric's signal bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::signals::{Signal, SignalBus};

/// A single attribute mutation, ready to be broadcast or applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub object_id: String,
    pub key: String,
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(object_id: impl Into<String>, key: impl Into<String>, value: serde_json::Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            object_id: object_id.into(),
            key: key.into(),
            value,
            timestamp,
        }
    }

    /// Fire the "event sent" signal for this event. Called by `notify()`
    /// for each event handed to the Publisher, outside any object lock.
    pub fn send(&self, bus: &Arc<SignalBus>) {
        bus.fire(Signal::EventSent, self);
    }

    /// Fire the "event received" signal for this event. Called by a
    /// pipeline worker after `batch_update` has released the object lock.
    pub fn receive(&self, bus: &Arc<SignalBus>) {
        bus.fire(Signal::EventReceived, self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_preserves_fields() {
        let ev = Event::new("obj-1", "a", serde_json::json!(42), Utc::now());
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }

    #[test]
    fn send_and_receive_fire_distinct_signals() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let bus = SignalBus::new();
        let sent = Arc::new(AtomicBool::new(false));
        let received = Arc::new(AtomicBool::new(false));

        let s = Arc::clone(&sent);
        bus.connect(Signal::EventSent, Box::new(move |_| s.store(true, Ordering::SeqCst)));
        let r = Arc::clone(&received);
        bus.connect(Signal::EventReceived, Box::new(move |_| r.store(true, Ordering::SeqCst)));

        let ev = Event::new("obj-1", "a", serde_json::json!(1), Utc::now());
        ev.send(&bus);
        assert!(sent.load(Ordering::SeqCst));
        assert!(!received.load(Ordering::SeqCst));

        ev.receive(&bus);
        assert!(received.load(Ordering::SeqCst));
    }
}
