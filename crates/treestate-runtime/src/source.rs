#![forbid(unsafe_code)]

//! Subscription guards and subscribe/snapshot sources.
//!
//! A UI layer that re-renders on change needs two things from the store: a
//! way to register a callback and a way to read the current value. The
//! [`ExternalSource`] trait pairs them for one path, for the entry count, or
//! for the key list.
//!
//! # Invariants
//!
//! 1. Dropping a [`Subscription`] removes its registration before the next
//!    flush resolves listeners.
//! 2. A guard never keeps its store alive.
//! 3. Releasing twice is a no-op.

use serde_json::Value;
use tracing::trace;
use treestate_core::{Listener, PathKey};

use crate::store::{Store, WeakStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Path(PathKey),
    Size,
    Keys,
}

/// RAII guard that unsubscribes its listener on drop.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    store: WeakStore,
    target: Target,
    listener: Listener,
    released: bool,
}

impl Subscription {
    pub(crate) fn new(store: WeakStore, target: Target, listener: Listener) -> Self {
        Self {
            store,
            target,
            listener,
            released: false,
        }
    }

    #[must_use]
    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Whether the listener still holds a registration.
    ///
    /// Turns false after a notifying `replace_all`, which drops every path
    /// registration.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.released && self.listener.is_registered()
    }

    /// Unsubscribe now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            let removed = store.detach(&self.target, &self.listener);
            trace!(message = "subscription.release", listener = self.listener.id(), removed);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("target", &self.target)
            .field("listener", &self.listener.id())
            .field("active", &self.is_active())
            .finish()
    }
}

/// A subscribe function paired with a snapshot getter.
pub trait ExternalSource {
    type Snapshot;

    /// Register `listener` until the guard is dropped.
    fn subscribe(&self, listener: Listener) -> Subscription;

    /// Current value. Reads the store, never a cached copy.
    fn get_snapshot(&self) -> Self::Snapshot;
}

/// Source for one path.
#[derive(Debug, Clone)]
pub struct PathSource {
    store: Store,
    path: PathKey,
}

impl PathSource {
    pub(crate) fn new(store: Store, path: PathKey) -> Self {
        Self { store, path }
    }

    #[must_use]
    pub fn path(&self) -> &PathKey {
        &self.path
    }
}

impl ExternalSource for PathSource {
    type Snapshot = Option<Value>;

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.store.attach(Target::Path(self.path.clone()), listener)
    }

    fn get_snapshot(&self) -> Option<Value> {
        self.store.get(&self.path)
    }
}

/// Source for the number of top-level entries.
#[derive(Debug, Clone)]
pub struct SizeSource {
    store: Store,
}

impl SizeSource {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }
}

impl ExternalSource for SizeSource {
    type Snapshot = usize;

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.store.attach(Target::Size, listener)
    }

    fn get_snapshot(&self) -> usize {
        self.store.len()
    }
}

/// Source for the list of top-level keys.
#[derive(Debug, Clone)]
pub struct KeysSource {
    store: Store,
}

impl KeysSource {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }
}

impl ExternalSource for KeysSource {
    type Snapshot = Vec<String>;

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.store.attach(Target::Keys, listener)
    }

    fn get_snapshot(&self) -> Vec<String> {
        self.store.keys()
    }
}
