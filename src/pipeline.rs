//! # Event Pipeline
//!
//! Fan-in dispatcher plus a fixed-size worker pool, the counterpart of
//! `EventProcessor`/`ObjectUpdateProcessor` in the original:
//! ten workers share one dispatch queue of `Arc<Object>` handles. A worker
//! drains the named object's inbound event queue into a last-write-wins
//! update map, applies it with a single `batch_update`, and only then
//! — outside the per-object lock — fires "event received" for each
//! drained event, in arrival order.

use std::sync::Arc;

use log::warn;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::object::Object;
use crate::signals::SignalBus;

/// Matches the original's fixed pool of ten `ObjectUpdateProcessor`
/// workers.
pub const WORKER_COUNT: usize = 10;

/// Handle used by the Subscriber to hand a touched object to the pipeline.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Arc<Object>>,
}

impl DispatcherHandle {
    pub fn dispatch(&self, object: Arc<Object>) {
        if self.tx.send(object).is_err() {
            warn!("event pipeline queue closed, dropping dispatch for {object}");
        }
    }
}

/// Owns the shared receive end of the dispatch queue. Cloned across worker
/// tasks behind a `Mutex` so exactly one worker drains any given object at
/// a time, the same way multiple original worker threads contend on one
/// `Queue.get()`.
pub struct Pipeline {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Arc<Object>>>>,
}

impl Pipeline {
    pub fn new() -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx: Arc::new(Mutex::new(rx)) }, DispatcherHandle { tx })
    }

    /// Spawn the worker pool. Each worker runs until the dispatch queue is
    /// closed and drained.
    pub fn spawn_workers(&self, signals: Arc<SignalBus>) -> Vec<JoinHandle<()>> {
        (0..WORKER_COUNT)
            .map(|_| {
                let rx = Arc::clone(&self.rx);
                let signals = Arc::clone(&signals);
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        match next {
                            Some(object) => apply_events(&object, &signals),
                            None => break,
                        }
                    }
                })
            })
            .collect()
    }
}

/// Apply every event currently queued on `object`, swallowing individual
/// `update` failures the same way the original's `_apply_events` swallows
/// all exceptions per-event rather than aborting the batch.
fn apply_events(object: &Arc<Object>, signals: &Arc<SignalBus>) {
    let (updates, events) = object.drain_inbound();
    if !updates.is_empty() {
        if let Err(err) = object.batch_update(updates, None) {
            warn!("failed to apply inbound events to {object}: {err}");
        }
    }
    for event in &events {
        event.receive(signals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::object::ObjectDict;
    use crate::origin::Origin;
    use chrono::Utc;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn replica() -> Arc<Object> {
        let dict = ObjectDict {
            object_id: "x".into(),
            origin_id: "p1".into(),
            updated_at: Utc::now(),
            collection: None,
            attrs: HashMap::new(),
        };
        Object::from_dict(dict, Origin::new("p2"), SignalBus::new(), 60)
    }

    #[tokio::test]
    async fn dispatched_object_has_inbound_events_applied() {
        let object = replica();
        object.push_inbound(Event::new(object.object_id(), "a", Value::from(1), Utc::now()));

        let (pipeline, dispatcher) = Pipeline::new();
        let signals = SignalBus::new();
        let received = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&received);
        signals.connect(crate::signals::Signal::EventReceived, Box::new(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        let workers = pipeline.spawn_workers(Arc::clone(&signals));

        dispatcher.dispatch(Arc::clone(&object));

        for _ in 0..50 {
            if object.get("a") == Some(Value::from(1)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(object.get("a"), Some(Value::from(1)));
        assert_eq!(received.load(Ordering::SeqCst), 1);

        drop(dispatcher);
        for w in workers {
            let _ = tokio::time::timeout(Duration::from_millis(200), w).await;
        }
    }
}
