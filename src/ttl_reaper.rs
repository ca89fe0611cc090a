//! # TTL Reaper
//!
//! Periodic replica expiry, the counterpart of the original's
//! `TTLProcessor`: every ten seconds, decrement the TTL of every
//! replica (never a locally-originated object) by ten, and evict it once
//! the TTL drops below zero. No broker frame is emitted on eviction — the
//! replica simply disappears locally until the next `publish` frame.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::registry::Registry;

/// Matches the original's `TTLProcessor`: ten-second tick, ten-unit decay.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
pub const DECAY_PER_SWEEP: i64 = 10;

pub struct TtlReaper {
    registry: Arc<Registry>,
}

impl TtlReaper {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            self.sweep();
        }
    }

    fn sweep(&self) {
        let mut evicted = 0;
        for object in self.registry.snapshot() {
            if object.is_originator() {
                continue;
            }
            if object.decrement_ttl(DECAY_PER_SWEEP) < 0 {
                self.registry.delete(object.object_id());
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!("ttl reaper evicted {evicted} expired replicas");
        }
    }
}
