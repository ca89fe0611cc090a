//! # Process Registry
//!
//! A thin interface for the `processes` collection: something
//! `Fabric::stop` walks before unpublishing. The original's `KVProcess` is a
//! full `setup()`/`loop()`/`shutdown()` state machine running its own
//! background thread; that state machine is out of scope here. What's kept
//! is the part `Fabric::stop` actually needs: a registry of kill-and-join
//! handles, so any `KVProcess`-like component an embedder adds can be shut
//! down in the same pass as the rest of the fabric.

use std::sync::{Arc, Mutex};

/// Something `Fabric::stop` can signal and then wait on, in that order.
pub trait Killable: Send + Sync {
    fn kill(&self);
    fn join(&self);
}

#[derive(Default)]
pub struct ProcessRegistry {
    processes: Mutex<Vec<Arc<dyn Killable>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, process: Arc<dyn Killable>) {
        self.processes.lock().unwrap().push(process);
    }

    /// Signal every registered process to stop, then wait for each to
    /// finish, in registration order — matching the original's
    /// kill-then-join pass over `self.processes` before it unpublishes.
    pub fn kill_and_join_all(&self) {
        let processes = self.processes.lock().unwrap().clone();
        for process in &processes {
            process.kill();
        }
        for process in &processes {
            process.join();
        }
    }
}
