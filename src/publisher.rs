//! # Publisher
//!
//! Outbound frame queue and background sender, the counterpart of
//! `pubsub.py`'s `Publisher` thread: frames are handed off
//! through an unbounded queue and sent to the broker by a single background
//! task, retrying with a fixed backoff on transport failure.

use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::broker::BrokerHandle;
use crate::event::Event;
use crate::object::ObjectDict;

const PUBLISH_RETRY_BACKOFF: Duration = Duration::from_secs(4);

/// The canonical wire frame: `{method, origin_id, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub method: String,
    pub origin_id: String,
    pub data: Value,
}

/// A cheaply cloneable sender into the outbound queue. Held by `Object`,
/// `Registry`, and `Fabric` — never the queue itself.
#[derive(Clone)]
pub struct PublisherHandle {
    tx: mpsc::UnboundedSender<Frame>,
}

impl PublisherHandle {
    pub fn publish_object(&self, origin_id: &str, dict: ObjectDict) {
        let data = serde_json::to_value(dict).unwrap_or(Value::Null);
        self.send(Frame { method: "publish".into(), origin_id: origin_id.to_string(), data });
    }

    pub fn publish_events(&self, origin_id: &str, events: &[Event]) {
        let data = serde_json::to_value(events).unwrap_or(Value::Null);
        self.send(Frame { method: "events".into(), origin_id: origin_id.to_string(), data });
    }

    pub fn publish_delete(&self, origin_id: &str, object_id: &str) {
        self.send(Frame {
            method: "delete".into(),
            origin_id: origin_id.to_string(),
            data: json!({ "object_id": object_id }),
        });
    }

    pub fn request_objects(&self, origin_id: &str) {
        self.send(Frame {
            method: "request_objects".into(),
            origin_id: origin_id.to_string(),
            data: json!({}),
        });
    }

    fn send(&self, frame: Frame) {
        if self.tx.send(frame).is_err() {
            warn!("publisher queue closed, dropping frame");
        }
    }
}

/// Owns the receiving half of the outbound queue and drives frames to the
/// broker. `run()` is spawned as a single background task by `Fabric`.
pub struct Publisher {
    broker: BrokerHandle,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl Publisher {
    pub fn new(broker: BrokerHandle) -> (Self, PublisherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { broker, rx }, PublisherHandle { tx })
    }

    /// Drain the queue to the broker. Returns once the queue is closed and
    /// empty (mirrors the original's `while self._running or not
    /// self._publish_queue.empty()`).
    pub async fn run(mut self) {
        while let Some(frame) = self.rx.recv().await {
            let payload = match serde_json::to_string(&frame) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("failed to encode outbound frame: {err}");
                    continue;
                }
            };

            loop {
                match self.broker.publish(payload.clone()).await {
                    Ok(()) => break,
                    Err(err) => {
                        warn!("broker publish failed: {err}; retrying in {PUBLISH_RETRY_BACKOFF:?}");
                        tokio::time::sleep(PUBLISH_RETRY_BACKOFF).await;
                    }
                }
            }
        }
        debug!("publisher stopped: outbound queue closed and drained");
    }
}

/// Test-only synchronous collector used by unit tests elsewhere in the
/// crate that need a `PublisherHandle` without spawning a `Publisher` task.
pub mod test_support {
    use super::*;

    pub struct TestReceiver(mpsc::UnboundedReceiver<Frame>);

    impl TestReceiver {
        pub fn drain(mut self) -> Vec<Frame> {
            let mut out = Vec::new();
            while let Ok(frame) = self.0.try_recv() {
                out.push(frame);
            }
            out
        }
    }

    pub fn collecting_publisher() -> (PublisherHandle, TestReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PublisherHandle { tx }, TestReceiver(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::collecting_publisher;
    use super::*;
    use crate::broker::InMemoryBroker;
    use chrono::Utc;
    use std::collections::HashMap;

    #[test]
    fn publish_object_encodes_method_and_origin() {
        let (handle, rx) = collecting_publisher();
        let dict = ObjectDict {
            object_id: "x".into(),
            origin_id: "p1".into(),
            updated_at: Utc::now(),
            collection: None,
            attrs: HashMap::new(),
        };
        handle.publish_object("p1", dict);
        let frames = rx.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].method, "publish");
        assert_eq!(frames[0].origin_id, "p1");
    }

    #[test]
    fn publish_delete_carries_object_id_in_data() {
        let (handle, rx) = collecting_publisher();
        handle.publish_delete("p1", "x");
        let frames = rx.drain();
        assert_eq!(frames[0].method, "delete");
        assert_eq!(frames[0].data, json!({ "object_id": "x" }));
    }

    #[tokio::test]
    async fn run_delivers_queued_frames_to_broker() {
        let broker = InMemoryBroker::new();
        let broker_handle = BrokerHandle::in_memory(std::sync::Arc::clone(&broker));
        let mut stream = crate::broker::BrokerStream::for_handle(&broker_handle, None);

        let (publisher, handle) = Publisher::new(broker_handle);
        let task = tokio::spawn(publisher.run());

        handle.request_objects("p1");
        let payload = stream.next_payload().await.unwrap();
        let frame: Frame = serde_json::from_str(&payload).unwrap();
        assert_eq!(frame.method, "request_objects");

        drop(handle);
        task.await.unwrap();
    }
}
