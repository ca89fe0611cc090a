//! # Fabric
//!
//! The lifecycle controller, assembling every other component and owning
//! their handles — the counterpart of `app.py`'s
//! `init()`/`run()`/`stop()`/`join()` plus `KVObjectsManager.start()`'s
//! wiring, but as an explicit, non-global value instead of a static class.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::broker::{BrokerHandle, BrokerStream};
use crate::config::Settings;
use crate::error::{FabricError, Result};
use crate::object::Object;
use crate::origin::Origin;
use crate::pipeline::Pipeline;
use crate::process::ProcessRegistry;
use crate::publisher::{Publisher, PublisherHandle};
use crate::query::Query;
use crate::reannouncer::Reannouncer;
use crate::registry::Registry;
use crate::signals::SignalBus;
use crate::subscriber::Subscriber;
use crate::ttl_reaper::TtlReaper;

pub struct Fabric {
    origin: Origin,
    settings: Settings,
    registry: Arc<Registry>,
    signals: Arc<SignalBus>,
    processes: Arc<ProcessRegistry>,
    started: AtomicBool,
    publisher_handle: Mutex<Option<PublisherHandle>>,
    publisher_task: Mutex<Option<JoinHandle<()>>>,
    subscriber_task: Mutex<Option<JoinHandle<()>>>,
    reannouncer_task: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Fabric {
    pub fn new(origin: Origin, settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            origin,
            settings,
            registry: Arc::new(Registry::new()),
            signals: SignalBus::new(),
            processes: Arc::new(ProcessRegistry::new()),
            started: AtomicBool::new(false),
            publisher_handle: Mutex::new(None),
            publisher_task: Mutex::new(None),
            subscriber_task: Mutex::new(None),
            reannouncer_task: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn signals(&self) -> &Arc<SignalBus> {
        &self.signals
    }

    pub fn processes(&self) -> &Arc<ProcessRegistry> {
        &self.processes
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn query(&self, query: &Query) -> Vec<Arc<Object>> {
        self.registry.query(query)
    }

    /// The outbound publisher handle, available once `start()` has run.
    /// Used by the admin HTTP surface to originate/notify/delete objects
    /// on behalf of API callers.
    pub fn publisher_handle(&self) -> Option<PublisherHandle> {
        self.publisher_handle.lock().unwrap().clone()
    }

    /// Connect to the broker, spawn every background component, and
    /// announce the `origin` self-object. Fails with
    /// `FabricError::AlreadyStarted` on a second call.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FabricError::AlreadyStarted);
        }

        let (broker_handle, eventloop) = BrokerHandle::connect_mqtt(
            &self.settings.broker.host,
            self.settings.broker.port,
            &self.settings.broker.client_id,
        );
        self.spawn_components(broker_handle, Some(eventloop));
        self.announce_self();

        info!(
            "fabric started: pid={}, origin_id={}",
            std::process::id(),
            self.origin.as_str()
        );
        Ok(())
    }

    /// Same as `start`, but wires components to an in-memory broker —
    /// used by scenario tests to run two fabrics in one process without a
    /// real MQTT broker.
    #[doc(hidden)]
    pub async fn start_with_broker(self: &Arc<Self>, broker_handle: BrokerHandle) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FabricError::AlreadyStarted);
        }
        self.spawn_components(broker_handle, None);
        self.announce_self();
        Ok(())
    }

    fn spawn_components(self: &Arc<Self>, broker_handle: BrokerHandle, eventloop: Option<rumqttc::EventLoop>) {
        let (publisher, publisher_handle) = Publisher::new(broker_handle.clone());
        let (pipeline, dispatcher) = Pipeline::new();
        let stream = BrokerStream::for_handle(&broker_handle, eventloop);

        let subscriber = Subscriber::new(
            broker_handle,
            Arc::clone(&self.registry),
            publisher_handle.clone(),
            dispatcher,
            self.origin.clone(),
            Arc::clone(&self.signals),
            self.settings.object_time_to_live,
        );

        let reannouncer = Reannouncer::new(
            Arc::clone(&self.registry),
            publisher_handle.clone(),
            Duration::from_secs(self.settings.object_publish_rate),
        );
        let ttl_reaper = TtlReaper::new(Arc::clone(&self.registry));

        let publisher_task = tokio::spawn(publisher.run());
        let subscriber_task = tokio::spawn(subscriber.run(stream));
        let reannouncer_task = tokio::spawn(reannouncer.run());

        let mut tasks = vec![tokio::spawn(ttl_reaper.run())];
        tasks.extend(pipeline.spawn_workers(Arc::clone(&self.signals)));

        *self.publisher_handle.lock().unwrap() = Some(publisher_handle);
        *self.publisher_task.lock().unwrap() = Some(publisher_task);
        *self.subscriber_task.lock().unwrap() = Some(subscriber_task);
        *self.reannouncer_task.lock().unwrap() = Some(reannouncer_task);
        *self.tasks.lock().unwrap() = tasks;
    }

    fn announce_self(self: &Arc<Self>) {
        let publisher_handle = self
            .publisher_handle
            .lock()
            .unwrap()
            .clone()
            .expect("publisher handle set by spawn_components before announce_self runs");

        let origin_object = Object::new_originated(
            self.origin.clone(),
            Some(self.origin.as_str().to_string()),
            Some("origin".to_string()),
            Arc::clone(&self.signals),
        );
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let _ = origin_object.set("hostname", Value::String(hostname), None);
        let _ = origin_object.set("pid", Value::from(std::process::id()), None);
        origin_object.notify(&self.registry, &publisher_handle);
    }

    /// Kill and join registered processes, unpublish every originated
    /// object, then signal every background component to stop — mirrors
    /// `KVObjectsManager.stop()`.
    ///
    /// The Subscriber and Re-announcer are aborted here rather than in
    /// `join()` because each holds a `PublisherHandle` clone: aborting
    /// them drops those clones, and once this fabric's own stored clone
    /// is dropped too, the Publisher's outbound channel has no senders
    /// left. That lets `join()` await the Publisher to a clean exit
    /// instead of racing it with an abort, so it actually drains the
    /// `delete` frames `unpublish_objects` just enqueued.
    pub fn stop(&self) {
        self.processes.kill_and_join_all();

        if let Some(publisher_handle) = self.publisher_handle.lock().unwrap().as_ref() {
            self.registry.unpublish_objects(publisher_handle);
        }

        if let Some(task) = self.subscriber_task.lock().unwrap().as_ref() {
            task.abort();
        }
        if let Some(task) = self.reannouncer_task.lock().unwrap().as_ref() {
            task.abort();
        }
        self.publisher_handle.lock().unwrap().take();
    }

    /// Block until the Publisher, Subscriber, Re-announcer, and event
    /// pipeline have all terminated. Must be called after `stop()`: the
    /// Publisher only exits once its outbound queue closes and drains,
    /// which `stop()` arranges by releasing every `PublisherHandle`
    /// clone before this returns.
    pub async fn join(&self) {
        if let Some(task) = self.subscriber_task.lock().unwrap().take() {
            let _ = task.await;
        }
        if let Some(task) = self.reannouncer_task.lock().unwrap().take() {
            let _ = task.await;
        }
        if let Some(task) = self.publisher_task.lock().unwrap().take() {
            let _ = task.await;
        }

        for task in self.tasks.lock().unwrap().iter() {
            task.abort();
        }
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}
