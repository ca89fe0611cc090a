//! # Subscriber
//!
//! Inbound frame loop, the counterpart of `pubsub.py`'s `Subscriber`
//! thread: subscribes to the broker, immediately asks peers to
//! re-announce themselves, then dispatches every inbound frame by method,
//! discarding anything that loops back from this origin.

use std::sync::Arc;

use log::{debug, warn};

use crate::broker::{BrokerHandle, BrokerStream};
use crate::object::ObjectDict;
use crate::origin::Origin;
use crate::pipeline::DispatcherHandle;
use crate::publisher::{Frame, PublisherHandle};
use crate::registry::Registry;
use crate::signals::SignalBus;

pub struct Subscriber {
    broker: BrokerHandle,
    registry: Arc<Registry>,
    publisher: PublisherHandle,
    dispatcher: DispatcherHandle,
    local_origin: Origin,
    signals: Arc<SignalBus>,
    initial_ttl: i64,
}

impl Subscriber {
    pub fn new(
        broker: BrokerHandle,
        registry: Arc<Registry>,
        publisher: PublisherHandle,
        dispatcher: DispatcherHandle,
        local_origin: Origin,
        signals: Arc<SignalBus>,
        initial_ttl: i64,
    ) -> Self {
        Self { broker, registry, publisher, dispatcher, local_origin, signals, initial_ttl }
    }

    /// Drive the inbound loop to completion. `stream` must already be
    /// bound to the same transport as `self.broker`.
    pub async fn run(self, mut stream: BrokerStream) {
        if let Err(err) = self.broker.subscribe().await {
            warn!("initial broker subscribe failed: {err}");
        }
        self.publisher.request_objects(self.local_origin.as_str());

        while let Some(payload) = stream.next_payload().await {
            self.handle_payload(&payload);
        }
        debug!("subscriber stopped: broker stream closed");
    }

    fn handle_payload(&self, payload: &str) {
        let frame: Frame = match serde_json::from_str(payload) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("discarding malformed frame: {err}");
                return;
            }
        };

        if frame.origin_id == self.local_origin.as_str() {
            return;
        }

        match frame.method.as_str() {
            "publish" => self.handle_publish(frame.data),
            "events" => self.handle_events(frame.data),
            "delete" => self.handle_delete(frame.data),
            "request_objects" => self.registry.publish_objects(&self.publisher),
            other => warn!("discarding frame with unknown method {other:?}"),
        }
    }

    fn handle_publish(&self, data: serde_json::Value) {
        match serde_json::from_value::<ObjectDict>(data) {
            Ok(dict) => self.registry.update(dict, &self.local_origin, &self.signals, self.initial_ttl),
            Err(err) => warn!("discarding malformed publish frame: {err}"),
        }
    }

    fn handle_events(&self, data: serde_json::Value) {
        let events: Vec<crate::event::Event> = match serde_json::from_value(data) {
            Ok(events) => events,
            Err(err) => {
                warn!("discarding malformed events frame: {err}");
                return;
            }
        };

        let mut touched = std::collections::HashSet::new();
        for event in events {
            if let Some(object) = self.registry.get(&event.object_id) {
                touched.insert(event.object_id.clone());
                object.push_inbound(event);
            }
        }
        for object_id in touched {
            if let Some(object) = self.registry.get(&object_id) {
                self.dispatcher.dispatch(object);
            }
        }
    }

    fn handle_delete(&self, data: serde_json::Value) {
        #[derive(serde::Deserialize)]
        struct DeletePayload {
            object_id: String,
        }
        match serde_json::from_value::<DeletePayload>(data) {
            Ok(payload) => {
                self.registry.delete(&payload.object_id);
            }
            Err(err) => warn!("discarding malformed delete frame: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::object::Object;
    use crate::pipeline::Pipeline;
    use crate::publisher::Publisher;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_subscriber(
        broker: Arc<InMemoryBroker>,
        registry: Arc<Registry>,
        local_origin: Origin,
    ) -> (Subscriber, PublisherHandle, BrokerStream) {
        let handle = BrokerHandle::in_memory(Arc::clone(&broker));
        let stream = BrokerStream::for_handle(&handle, None);
        let (_publisher_task, publisher) = Publisher::new(handle.clone());
        let (_pipeline, dispatcher) = Pipeline::new();
        let signals = SignalBus::new();
        let subscriber = Subscriber::new(handle, registry, publisher.clone(), dispatcher, local_origin, signals, 60);
        (subscriber, publisher, stream)
    }

    #[tokio::test]
    async fn publish_frame_from_peer_creates_replica() {
        let broker = InMemoryBroker::new();
        let registry = Arc::new(Registry::new());
        let (subscriber, _publisher, mut own_stream) = test_subscriber(Arc::clone(&broker), Arc::clone(&registry), Origin::new("p2"));

        let sender_handle = BrokerHandle::in_memory(Arc::clone(&broker));
        let frame = Frame {
            method: "publish".into(),
            origin_id: "p1".into(),
            data: serde_json::to_value(crate::object::ObjectDict {
                object_id: "x".into(),
                origin_id: "p1".into(),
                updated_at: Utc::now(),
                collection: None,
                attrs: HashMap::new(),
            })
            .unwrap(),
        };

        tokio::spawn(async move {
            sender_handle.publish(serde_json::to_string(&frame).unwrap()).await.unwrap();
        });

        let sub_task = tokio::spawn(subscriber.run(own_stream));
        for _ in 0..50 {
            if registry.contains("x") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.contains("x"));
        sub_task.abort();
    }

    #[tokio::test]
    async fn loopback_frame_from_own_origin_is_ignored() {
        let broker = InMemoryBroker::new();
        let registry = Arc::new(Registry::new());
        let (subscriber, _publisher, own_stream) = test_subscriber(Arc::clone(&broker), Arc::clone(&registry), Origin::new("p1"));

        let sender_handle = BrokerHandle::in_memory(Arc::clone(&broker));
        let frame = Frame {
            method: "publish".into(),
            origin_id: "p1".into(),
            data: json!({}),
        };
        sender_handle.publish(serde_json::to_string(&frame).unwrap()).await.unwrap();

        let sub_task = tokio::spawn(subscriber.run(own_stream));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.len(), 0);
        sub_task.abort();
    }

    #[tokio::test]
    async fn request_objects_frame_triggers_republish_of_originated_objects() {
        let broker = InMemoryBroker::new();
        let registry = Arc::new(Registry::new());
        let origin = Origin::new("p1");
        let obj = Object::new_originated(origin.clone(), Some("a".into()), None, SignalBus::new());
        registry.insert(obj);

        let (subscriber, _publisher, own_stream) = test_subscriber(Arc::clone(&broker), Arc::clone(&registry), origin);
        let mut verify_stream = BrokerStream::for_handle(&BrokerHandle::in_memory(Arc::clone(&broker)), None);

        let sub_task = tokio::spawn(subscriber.run(own_stream));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sender_handle = BrokerHandle::in_memory(Arc::clone(&broker));
        let frame = Frame { method: "request_objects".into(), origin_id: "peer".into(), data: json!({}) };
        sender_handle.publish(serde_json::to_string(&frame).unwrap()).await.unwrap();

        let mut saw_publish = false;
        for _ in 0..20 {
            if let Ok(Some(payload)) = tokio::time::timeout(Duration::from_millis(100), verify_stream.next_payload()).await {
                let f: Frame = serde_json::from_str(&payload).unwrap();
                if f.method == "publish" {
                    saw_publish = true;
                    break;
                }
            } else {
                break;
            }
        }
        assert!(saw_publish);
        sub_task.abort();
    }
}
