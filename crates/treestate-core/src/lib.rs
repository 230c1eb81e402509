#![forbid(unsafe_code)]

//! Core: path canonicalization, listener registry, and deferred notification
//! for treestate.
//!
//! These pieces know nothing about the store that owns them. The runtime
//! crate wires them to a value container and a debug mirror.

pub mod listener;
pub mod path;
pub mod registry;
pub mod scheduler;
pub mod tree;

pub use listener::Listener;
pub use path::{CanonicalPath, PathCache, PathKey, Segment};
pub use registry::{Origin, Registry, WorkingSet};
pub use scheduler::{BatchId, FlushReport, NotificationBatch, Notifier};
pub use tree::SkipReason;
