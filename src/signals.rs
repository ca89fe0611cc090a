//! # In-Process Signal Bus
//!
//! A tiny fan-out publish/subscribe table, modeled on `pydispatch.dispatcher`
//! in the original (`kvobject.py` fires `SIGNAL_SENT_KVEVENT` /
//! `SIGNAL_RECEIVED_KVEVENT`; `kvprocess.py` connects a receiver to the
//! latter). Delivery is synchronous and must happen outside any object lock.
//!
//! Kept as an explicit value owned by `Fabric` and shared via `Arc`, not a
//! module-level global.

use std::sync::{Arc, RwLock};

use crate::event::Event;

/// Which of the two fabric-level notifications fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A pending event was handed to the Publisher by `notify()`.
    EventSent,
    /// An inbound event was applied to a replica by a pipeline worker.
    EventReceived,
}

type Listener = Box<dyn Fn(&Event) + Send + Sync>;

/// Subscribe/publish table keyed by signal kind.
#[derive(Default)]
pub struct SignalBus {
    sent: RwLock<Vec<Listener>>,
    received: RwLock<Vec<Listener>>,
}

impl SignalBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a listener for `signal`. Listeners are never unregistered
    /// in this design — the bus lives as long as the `Fabric` that owns it.
    pub fn connect(&self, signal: Signal, listener: Listener) {
        let table = match signal {
            Signal::EventSent => &self.sent,
            Signal::EventReceived => &self.received,
        };
        table.write().unwrap().push(listener);
    }

    /// Fire `signal` with `event` to every connected listener, in
    /// registration order. Must be called outside any object lock.
    pub fn fire(&self, signal: Signal, event: &Event) {
        let table = match signal {
            Signal::EventSent => &self.sent,
            Signal::EventReceived => &self.received,
        };
        for listener in table.read().unwrap().iter() {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fires_only_connected_signal() {
        let bus = SignalBus::new();
        let sent_count = Arc::new(AtomicUsize::new(0));
        let received_count = Arc::new(AtomicUsize::new(0));

        let sc = Arc::clone(&sent_count);
        bus.connect(Signal::EventSent, Box::new(move |_| {
            sc.fetch_add(1, Ordering::SeqCst);
        }));
        let rc = Arc::clone(&received_count);
        bus.connect(Signal::EventReceived, Box::new(move |_| {
            rc.fetch_add(1, Ordering::SeqCst);
        }));

        let ev = Event {
            object_id: "x".into(),
            key: "a".into(),
            value: serde_json::json!(1),
            timestamp: Utc::now(),
        };
        bus.fire(Signal::EventSent, &ev);

        assert_eq!(sent_count.load(Ordering::SeqCst), 1);
        assert_eq!(received_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn delivers_to_multiple_listeners_in_order() {
        let bus = SignalBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        bus.connect(Signal::EventReceived, Box::new(move |_| {
            o1.lock().unwrap().push(1);
        }));
        let o2 = Arc::clone(&order);
        bus.connect(Signal::EventReceived, Box::new(move |_| {
            o2.lock().unwrap().push(2);
        }));

        let ev = Event {
            object_id: "x".into(),
            key: "a".into(),
            value: serde_json::json!(1),
            timestamp: Utc::now(),
        };
        bus.fire(Signal::EventReceived, &ev);

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }
}
