//! # Domain Errors
//!
//! Structural and ownership violations are surfaced to callers as a typed
//! error enum, using `thiserror` for caller-facing APIs and `anyhow` for
//! background task bodies (see `publisher.rs`, `subscriber.rs`). Transport
//! and decode failures never reach this type — they are absorbed and
//! logged at the point of failure.

use thiserror::Error;

/// Errors surfaced by the object registry and the objects it holds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FabricError {
    /// `object_id` is not present in the registry.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Attempted to write a structural field name into `attrs`, or a
    /// replica attempted to introduce a key it doesn't already have.
    #[error("key error: {0}")]
    KeyError(String),

    /// `delete()` (or an internal unpublish) called on a non-originated
    /// object.
    #[error("not the originator of object {0}")]
    NotOriginator(String),

    /// `Fabric::start()` called more than once in a process.
    #[error("fabric already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, FabricError>;
