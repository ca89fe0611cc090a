//! # Re-announcer
//!
//! Periodic heartbeat, the counterpart of `pubsub.py`'s `ObjectSender`
//! thread: every `OBJECT_PUBLISH_RATE` seconds, re-publish
//! every locally-originated object so peers can reset its replica TTL.
//! Kept as a component distinct from the Publisher, matching the original's
//! three separate threads (Publisher, Subscriber, ObjectSender).

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::publisher::PublisherHandle;
use crate::registry::Registry;

pub struct Reannouncer {
    registry: Arc<Registry>,
    publisher: PublisherHandle,
    interval: Duration,
}

impl Reannouncer {
    pub fn new(registry: Arc<Registry>, publisher: PublisherHandle, interval: Duration) -> Self {
        Self { registry, publisher, interval }
    }

    /// Runs until the calling task is cancelled (`Fabric::stop` aborts the
    /// handle rather than asking this loop to exit cooperatively, matching
    /// the original's `_stop_event.wait(...)`-gated loop).
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick fires immediately; skip it, wait a full period
        loop {
            ticker.tick().await;
            debug!("re-announcing {} originated objects", self.registry.len());
            self.registry.publish_objects(&self.publisher);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::origin::Origin;
    use crate::publisher::test_support::collecting_publisher;
    use crate::signals::SignalBus;

    #[tokio::test]
    async fn republishes_originated_objects_on_each_tick() {
        let registry = Arc::new(Registry::new());
        let obj = Object::new_originated(Origin::new("p1"), Some("x".into()), None, SignalBus::new());
        registry.insert(obj);

        let (publisher, rx) = collecting_publisher();
        let reannouncer = Reannouncer::new(Arc::clone(&registry), publisher, Duration::from_millis(20));

        let task = tokio::spawn(reannouncer.run());
        tokio::time::sleep(Duration::from_millis(70)).await;
        task.abort();

        let frames = rx.drain();
        assert!(frames.len() >= 2, "expected multiple re-announce ticks, got {}", frames.len());
        assert!(frames.iter().all(|f| f.method == "publish"));
    }
}
