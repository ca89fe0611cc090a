//! # Broker
//!
//! Fan-out pub/sub transport. The original design uses Redis pub/sub on a
//! single channel; this fabric keeps an MQTT client (`rumqttc`) for the same
//! role instead — a single topic plays the part of the Redis channel, since
//! any equivalent fan-out bus will do.
//!
//! `BrokerHandle` is an enum rather than a trait object: nothing here needs
//! `async_trait`, and an enum over the two concrete transports avoids
//! introducing a dependency the rest of the crate has no other use for.
//! `InMemoryBroker` is the loopback test double used by in-process scenario
//! tests, where two `Fabric` instances need to exchange frames without a
//! real MQTT broker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use log::{debug, warn};
use rumqttc::{AsyncClient, Event as MqttEvent, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::broadcast;

pub const TOPIC: &str = "sapphire_objects";

/// A single fan-out channel, reused by every in-memory broker client that
/// shares the same handle.
#[derive(Default)]
pub struct InMemoryBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl InMemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn channel(&self, topic: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }

    fn publish(&self, topic: &str, payload: String) {
        let _ = self.channel(topic).send(payload);
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<String> {
        self.channel(topic).subscribe()
    }
}

/// A transport connection used by the Publisher and Subscriber background
/// tasks. Cheap to clone; the MQTT variant clones the underlying
/// `AsyncClient` handle (itself cheaply cloneable), the in-memory variant
/// clones an `Arc`.
#[derive(Clone)]
pub enum BrokerHandle {
    Mqtt(AsyncClient),
    InMemory(Arc<InMemoryBroker>),
}

impl BrokerHandle {
    /// Connect to an MQTT broker at `host:port` with the given client id.
    pub fn connect_mqtt(host: &str, port: u16, client_id: &str) -> (Self, EventLoop) {
        let mut opts = MqttOptions::new(client_id, host, port);
        opts.set_keep_alive(Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(opts, 64);
        (Self::Mqtt(client), eventloop)
    }

    pub fn in_memory(broker: Arc<InMemoryBroker>) -> Self {
        Self::InMemory(broker)
    }

    pub async fn publish(&self, payload: String) -> Result<()> {
        match self {
            Self::Mqtt(client) => {
                client.publish(TOPIC, QoS::AtLeastOnce, false, payload).await?;
            }
            Self::InMemory(broker) => {
                broker.publish(TOPIC, payload);
            }
        }
        Ok(())
    }

    pub async fn subscribe(&self) -> Result<()> {
        if let Self::Mqtt(client) = self {
            client.subscribe(TOPIC, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }
}

/// A stream of inbound frame payloads. MQTT delivery is driven by polling
/// the `EventLoop`; in-memory delivery is a plain broadcast receiver.
pub enum BrokerStream {
    Mqtt(EventLoop),
    InMemory(broadcast::Receiver<String>),
}

impl BrokerStream {
    pub fn for_handle(handle: &BrokerHandle, eventloop: Option<EventLoop>) -> Self {
        match handle {
            BrokerHandle::Mqtt(_) => {
                Self::Mqtt(eventloop.expect("mqtt broker handle requires an eventloop"))
            }
            BrokerHandle::InMemory(broker) => Self::InMemory(broker.subscribe(TOPIC)),
        }
    }

    /// Wait for the next inbound payload. Returns `None` when the
    /// underlying transport is permanently gone (in-memory sender dropped);
    /// MQTT connection errors are logged and retried by the caller.
    pub async fn next_payload(&mut self) -> Option<String> {
        match self {
            Self::Mqtt(eventloop) => loop {
                match eventloop.poll().await {
                    Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                        return Some(String::from_utf8_lossy(&publish.payload).into_owned());
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        warn!("broker connection error: {err}; retrying");
                        tokio::time::sleep(Duration::from_secs(4)).await;
                    }
                }
            },
            Self::InMemory(rx) => loop {
                match rx.recv().await {
                    Ok(payload) => return Some(payload),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("in-memory broker subscriber lagged by {n} messages");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_broker_delivers_published_payload() {
        let broker = InMemoryBroker::new();
        let handle = BrokerHandle::in_memory(Arc::clone(&broker));
        let mut stream = BrokerStream::for_handle(&handle, None);

        handle.publish("hello".to_string()).await.unwrap();
        let received = stream.next_payload().await;
        assert_eq!(received, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn in_memory_broker_fans_out_to_multiple_subscribers() {
        let broker = InMemoryBroker::new();
        let handle = BrokerHandle::in_memory(Arc::clone(&broker));
        let mut sub1 = BrokerStream::for_handle(&handle, None);
        let mut sub2 = BrokerStream::for_handle(&handle, None);

        handle.publish("hi".to_string()).await.unwrap();
        assert_eq!(sub1.next_payload().await, Some("hi".to_string()));
        assert_eq!(sub2.next_payload().await, Some("hi".to_string()));
    }
}
