#![forbid(unsafe_code)]

//! The path-addressed value store.
//!
//! [`Store`] is a cheaply cloneable, single-threaded handle. Every clone sees
//! the same state, registry, and notification queue.
//!
//! # Write pipeline
//!
//! A write updates the backing map synchronously, reports an action to the
//! debug mirror (if connected), and, unless [`Notify::Suppressed`] is
//! passed, queues a notification batch. Nothing is delivered until the host
//! calls [`Store::flush`]; listeners then read the state as of delivery.
//!
//! # Invariants
//!
//! 1. Reads hand out owned clones, so a value obtained before a write never
//!    changes underneath the caller.
//! 2. A multi-segment write never creates its top-level key; a missing key
//!    makes the write a no-op that reports [`WriteOutcome::Skipped`].
//! 3. A skipped write leaves state untouched and queues nothing.
//! 4. `replace_all` with notification drops every path registration and
//!    queues exactly one batch addressed to the dropped listeners plus the
//!    size and key-set channels.
//!
//! # Failure Modes
//!
//! - **Path miss on write**: logged at `debug` as `store.path_miss`.
//! - **Updater panics**: state is not borrowed while the updater runs, so the
//!   store remains usable; the write does not happen.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use treestate_core::path::{CanonicalPath, PathCache, PathCacheStats, PathKey};
use treestate_core::tree::{SkipReason, assign, lookup, shallow_merge};
use treestate_core::{FlushReport, Listener, NotificationBatch, Notifier};

use crate::config::StoreConfig;
use crate::fallback::FallbackResolver;
use crate::mirror::{
    MirrorAction, MirrorCommand, MirrorError, MirrorMessage, MirrorOutcome, MirrorSink,
    parse_state,
};
use crate::source::{KeysSource, PathSource, SizeSource, Subscription, Target};

/// Whether a write queues a notification batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Notify {
    #[default]
    Scheduled,
    Suppressed,
}

/// Result of a write. Callers are free to ignore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    Skipped(SkipReason),
}

impl WriteOutcome {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// New content for [`Store::update`].
pub enum Patch {
    /// An object merges shallowly onto the current value; anything else
    /// replaces it.
    Value(Value),
    /// Computes the replacement from the current value (`null` if unset).
    Updater(Box<dyn FnOnce(&Value) -> Value>),
}

impl Patch {
    /// Wrap an updater function.
    pub fn with(f: impl FnOnce(&Value) -> Value + 'static) -> Self {
        Self::Updater(Box::new(f))
    }

    fn apply(self, current: Option<&Value>) -> Value {
        match self {
            Self::Updater(f) => f(current.unwrap_or(&Value::Null)),
            Self::Value(Value::Object(partial)) => shallow_merge(current, &partial),
            Self::Value(other) => other,
        }
    }
}

impl From<Value> for Patch {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Updater(_) => f.write_str("Updater(..)"),
        }
    }
}

struct MirrorLink {
    name: String,
    sink: Box<dyn MirrorSink>,
}

struct StoreInner {
    state: RefCell<Map<String, Value>>,
    initial: Map<String, Value>,
    paths: RefCell<PathCache>,
    fallback: FallbackResolver,
    notifier: Notifier,
    mirror: RefCell<Option<MirrorLink>>,
}

/// Handle to a path-addressed store.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

/// Non-owning handle held by subscriptions.
#[derive(Clone)]
pub(crate) struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    pub(crate) fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.inner.state.borrow())
            .field("mode", &self.inner.fallback.mode())
            .field("pending", &self.inner.notifier.pending())
            .field("mirror", &self.mirror_connected())
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl Store {
    /// Create a store without a debug mirror.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a store that mirrors to `sink` when the config enables it.
    #[must_use]
    pub fn with_sink(config: StoreConfig, sink: impl MirrorSink + 'static) -> Self {
        Self::build(config, Some(Box::new(sink)))
    }

    fn build(config: StoreConfig, sink: Option<Box<dyn MirrorSink>>) -> Self {
        let enabled = config.mirror_enabled();
        let StoreConfig {
            initial_state,
            fallback,
            mode,
            debug_name,
            ..
        } = config;

        let mirror = match (sink, enabled) {
            (Some(mut sink), true) => {
                let name = debug_name.unwrap_or_default();
                sink.init(&name, &initial_state);
                Some(MirrorLink { name, sink })
            }
            (Some(_), false) => {
                debug!(message = "mirror.disabled", "sink supplied but mirror is off");
                None
            }
            (None, true) => {
                debug!(message = "mirror.no_sink", "running without a debug mirror");
                None
            }
            (None, false) => None,
        };

        Self {
            inner: Rc::new(StoreInner {
                initial: initial_state.clone(),
                state: RefCell::new(initial_state),
                paths: RefCell::new(PathCache::new()),
                fallback: FallbackResolver::new(fallback, mode),
                notifier: Notifier::new(),
                mirror: RefCell::new(mirror),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn resolve(&self, key: &PathKey) -> CanonicalPath {
        self.inner.paths.borrow_mut().resolve(key)
    }

    // ─── Reads ───────────────────────────────────────────────────────────

    /// Live value at `path`, or the fallback for that path.
    #[must_use]
    pub fn get(&self, path: impl Into<PathKey>) -> Option<Value> {
        let path = self.resolve(&path.into());
        self.get_resolved(&path)
    }

    fn get_resolved(&self, path: &CanonicalPath) -> Option<Value> {
        let top = path.top_key()?;
        {
            let state = self.inner.state.borrow();
            if let Some(live) = state.get(top).and_then(|entry| lookup(entry, path.nested())) {
                return Some(live.clone());
            }
        }
        self.inner.fallback.resolve(path)
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.inner.state.borrow().contains_key(key)
    }

    /// Top-level keys in map order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.state.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.borrow().is_empty()
    }

    /// Copy of the full state.
    #[must_use]
    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner.state.borrow().clone()
    }

    /// Full state as JSON text, as the mirror expects it.
    #[must_use]
    pub fn serialize_state(&self) -> String {
        Value::Object(self.snapshot()).to_string()
    }

    /// The state captured at construction.
    #[must_use]
    pub fn initial_state(&self) -> &Map<String, Value> {
        &self.inner.initial
    }

    // ─── Writes ──────────────────────────────────────────────────────────

    /// Assign `value` at `path` and notify.
    pub fn set(&self, path: impl Into<PathKey>, value: Value) -> WriteOutcome {
        self.set_with(path, value, Notify::Scheduled)
    }

    /// Assign `value` at `path`.
    ///
    /// A length-1 path replaces (or creates) the top-level entry. Longer
    /// paths require the entry to exist and create intermediate objects as
    /// needed.
    pub fn set_with(&self, path: impl Into<PathKey>, value: Value, notify: Notify) -> WriteOutcome {
        let path = self.resolve(&path.into());
        let Some(top) = path.top_key() else {
            return skip("set", &path, SkipReason::EmptyPath);
        };

        let added = {
            let mut state = self.inner.state.borrow_mut();
            if path.len() == 1 {
                state.insert(top.to_owned(), value.clone()).is_none()
            } else {
                let Some(entry) = state.get_mut(top) else {
                    return skip("set", &path, SkipReason::MissingKey(top.to_owned()));
                };
                if let Err(reason) = assign(entry, path.nested(), value.clone()) {
                    return skip("set", &path, reason);
                }
                false
            }
        };

        debug!(message = "store.set", path = %path, added);
        self.record("set", || json!({"path": &**path.identity(), "value": value}));
        if notify == Notify::Scheduled {
            let mut batch = NotificationBatch::new().with_path(Rc::clone(path.identity()));
            if added {
                batch = batch.with_size().with_keys();
            }
            self.inner.notifier.submit(batch);
        }
        WriteOutcome::Applied
    }

    /// Merge or replace the value at `path` and notify.
    pub fn update(&self, path: impl Into<PathKey>, patch: impl Into<Patch>) -> WriteOutcome {
        self.update_with(path, patch, Notify::Scheduled)
    }

    /// Merge or replace the value at `path`.
    ///
    /// The current value (live, else fallback) is read first. An updater
    /// receives it and returns the replacement; an object patch is merged
    /// onto a copy of it unless it is an array; any other patch replaces it.
    /// No-op if the top-level key is absent.
    pub fn update_with(
        &self,
        path: impl Into<PathKey>,
        patch: impl Into<Patch>,
        notify: Notify,
    ) -> WriteOutcome {
        let path = self.resolve(&path.into());
        let next = match self.apply_update(&path, patch.into()) {
            Ok(next) => next,
            Err(reason) => return skip("update", &path, reason),
        };

        debug!(message = "store.update", path = %path);
        self.record("update", || json!({"path": &**path.identity(), "value": next}));
        if notify == Notify::Scheduled {
            self.inner.notifier.notify_path(Rc::clone(path.identity()));
        }
        WriteOutcome::Applied
    }

    fn apply_update(&self, path: &CanonicalPath, patch: Patch) -> Result<Value, SkipReason> {
        let top = path.top_key().ok_or(SkipReason::EmptyPath)?;
        if !self.has(top) {
            return Err(SkipReason::MissingKey(top.to_owned()));
        }
        let current = self.get_resolved(path);
        let next = patch.apply(current.as_ref());

        let mut state = self.inner.state.borrow_mut();
        // The updater may have removed the entry.
        let entry = state
            .get_mut(top)
            .ok_or_else(|| SkipReason::MissingKey(top.to_owned()))?;
        assign(entry, path.nested(), next.clone())?;
        Ok(next)
    }

    /// Apply [`update`](Self::update) to several top-level keys and notify
    /// once. Returns the keys that were present and updated.
    pub fn batch_update<K, P>(&self, entries: impl IntoIterator<Item = (K, P)>) -> Vec<String>
    where
        K: Into<String>,
        P: Into<Patch>,
    {
        self.batch_update_with(entries, Notify::Scheduled)
    }

    pub fn batch_update_with<K, P>(
        &self,
        entries: impl IntoIterator<Item = (K, P)>,
        notify: Notify,
    ) -> Vec<String>
    where
        K: Into<String>,
        P: Into<Patch>,
    {
        let mut changed = Vec::new();
        let mut identities = Vec::new();
        let mut payload = Map::new();
        for (key, patch) in entries {
            let key: String = key.into();
            let path = self.resolve(&PathKey::from(key.as_str()));
            match self.apply_update(&path, patch.into()) {
                Ok(next) => {
                    payload.insert(key.clone(), next);
                    if !changed.contains(&key) {
                        identities.push(Rc::clone(path.identity()));
                        changed.push(key);
                    }
                }
                Err(reason) => {
                    skip("batch_update", &path, reason);
                }
            }
        }

        if changed.is_empty() {
            return changed;
        }
        debug!(message = "store.batch_update", keys = changed.len());
        self.record("batchUpdate", || Value::Object(payload));
        if notify == Notify::Scheduled {
            self.inner.notifier.notify_keys(identities);
        }
        changed
    }

    /// Delete a top-level entry and notify its path, size, and key-set
    /// listeners.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.remove_with(key, Notify::Scheduled)
    }

    pub fn remove_with(&self, key: &str, notify: Notify) -> Option<Value> {
        let removed = self.inner.state.borrow_mut().remove(key)?;
        let path = self.resolve(&PathKey::from(key));

        debug!(message = "store.remove", key);
        self.record("remove", || json!({"key": key}));
        if notify == Notify::Scheduled {
            self.inner.notifier.submit(
                NotificationBatch::new()
                    .with_path(Rc::clone(path.identity()))
                    .with_size()
                    .with_keys(),
            );
        }
        Some(removed)
    }

    /// Swap the whole state and notify.
    ///
    /// Existing path registrations are dropped; their listeners receive the
    /// notification once and must subscribe again. Unsubscribing or dropping
    /// the guard before the flush cancels that final delivery.
    pub fn replace_all(&self, state: Map<String, Value>) {
        self.replace_with(state, Notify::Scheduled);
    }

    /// Swap the whole state. Registrations survive when `notify` is
    /// [`Notify::Suppressed`].
    pub fn replace_with(&self, state: Map<String, Value>, notify: Notify) {
        self.replace_state(state, notify);
    }

    fn replace_state(&self, state: Map<String, Value>, notify: Notify) {
        let keys = state.len();
        *self.inner.state.borrow_mut() = state;

        debug!(message = "store.replace_all", keys);
        self.record("replaceAll", || json!({"keys": keys}));
        if notify == Notify::Scheduled {
            let dropped = self.inner.notifier.clear_paths();
            self.inner.notifier.submit(
                NotificationBatch::new()
                    .with_parked(dropped)
                    .with_size()
                    .with_keys(),
            );
        }
    }

    /// Swap in state from the mirror. Registrations survive; every listener
    /// is woken once. Nothing is echoed back to the sink.
    fn restore_state(&self, state: Map<String, Value>) {
        let keys = state.len();
        *self.inner.state.borrow_mut() = state;
        debug!(message = "store.restore", keys);
        self.inner.notifier.notify_all();
    }

    // ─── Subscriptions ───────────────────────────────────────────────────

    /// Register `listener` at `path`. Returns `false` if already registered.
    pub fn subscribe(&self, path: impl Into<PathKey>, listener: &Listener) -> bool {
        let path = self.resolve(&path.into());
        self.inner.notifier.subscribe(path.identity(), listener)
    }

    pub fn unsubscribe(&self, path: impl Into<PathKey>, listener: &Listener) -> bool {
        let path = self.resolve(&path.into());
        self.inner.notifier.unsubscribe(path.identity(), listener)
    }

    pub fn add_size_listener(&self, listener: &Listener) -> bool {
        self.inner.notifier.add_size_listener(listener)
    }

    pub fn remove_size_listener(&self, listener: &Listener) -> bool {
        self.inner.notifier.remove_size_listener(listener)
    }

    pub fn add_keys_listener(&self, listener: &Listener) -> bool {
        self.inner.notifier.add_keys_listener(listener)
    }

    pub fn remove_keys_listener(&self, listener: &Listener) -> bool {
        self.inner.notifier.remove_keys_listener(listener)
    }

    /// Register `f` at `path` until the returned guard is dropped.
    pub fn watch(&self, path: impl Into<PathKey>, f: impl Fn() + 'static) -> Subscription {
        self.attach(Target::Path(path.into()), Listener::new(f))
    }

    pub fn watch_size(&self, f: impl Fn() + 'static) -> Subscription {
        self.attach(Target::Size, Listener::new(f))
    }

    pub fn watch_keys(&self, f: impl Fn() + 'static) -> Subscription {
        self.attach(Target::Keys, Listener::new(f))
    }

    pub(crate) fn attach(&self, target: Target, listener: Listener) -> Subscription {
        match &target {
            Target::Path(path) => self.subscribe(path, &listener),
            Target::Size => self.add_size_listener(&listener),
            Target::Keys => self.add_keys_listener(&listener),
        };
        Subscription::new(self.downgrade(), target, listener)
    }

    pub(crate) fn detach(&self, target: &Target, listener: &Listener) -> bool {
        match target {
            Target::Path(path) => self.unsubscribe(path, listener),
            Target::Size => self.remove_size_listener(listener),
            Target::Keys => self.remove_keys_listener(listener),
        }
    }

    /// Subscribe/snapshot pair for one path.
    #[must_use]
    pub fn path_source(&self, path: impl Into<PathKey>) -> PathSource {
        PathSource::new(self.clone(), path.into())
    }

    #[must_use]
    pub fn size_source(&self) -> SizeSource {
        SizeSource::new(self.clone())
    }

    #[must_use]
    pub fn keys_source(&self) -> KeysSource {
        KeysSource::new(self.clone())
    }

    /// Number of distinct subscribed path identities.
    #[must_use]
    pub fn subscribed_paths(&self) -> usize {
        self.inner.notifier.with_registry(|r| r.path_count())
    }

    // ─── Notification ────────────────────────────────────────────────────

    /// Queue a batch for `path` and everything above and below it.
    pub fn notify_path(&self, path: impl Into<PathKey>) {
        let path = self.resolve(&path.into());
        self.inner.notifier.notify_path(Rc::clone(path.identity()));
    }

    /// Queue one batch covering several paths.
    pub fn notify_keys<P: Into<PathKey>>(&self, paths: impl IntoIterator<Item = P>) {
        let identities: Vec<Rc<str>> = paths
            .into_iter()
            .map(|p| Rc::clone(self.resolve(&p.into()).identity()))
            .collect();
        self.inner.notifier.notify_keys(identities);
    }

    /// Queue a batch waking every listener.
    pub fn notify_all(&self) {
        self.inner.notifier.notify_all();
    }

    /// Deliver all queued batches.
    pub fn flush(&self) -> FlushReport {
        self.inner.notifier.flush()
    }

    /// Deliver queued batches until `should_yield` returns true.
    pub fn flush_until(&self, should_yield: impl FnMut() -> bool) -> FlushReport {
        self.inner.notifier.flush_until(should_yield)
    }

    #[must_use]
    pub fn pending_notifications(&self) -> usize {
        self.inner.notifier.pending()
    }

    #[must_use]
    pub fn path_cache_stats(&self) -> PathCacheStats {
        self.inner.paths.borrow().stats()
    }

    // ─── Debug mirror ────────────────────────────────────────────────────

    #[must_use]
    pub fn mirror_connected(&self) -> bool {
        self.inner.mirror.borrow().is_some()
    }

    fn record(&self, kind: &str, payload: impl FnOnce() -> Value) {
        let mut mirror = self.inner.mirror.borrow_mut();
        let Some(link) = mirror.as_mut() else {
            return;
        };
        let action = MirrorAction::new(kind, payload());
        link.sink.send(&action, &self.inner.state.borrow());
    }

    fn mirror_init(&self) {
        if let Some(link) = self.inner.mirror.borrow_mut().as_mut() {
            link.sink.init(&link.name, &self.inner.state.borrow());
        }
    }

    /// Parse and apply a raw inbound mirror message.
    pub fn receive_mirror_json(&self, raw: &str) -> Result<MirrorOutcome, MirrorError> {
        MirrorMessage::parse(raw)
            .inspect_err(|err| warn!(message = "mirror.parse_failed", error = %err))
            .and_then(|message| self.handle_mirror_message(&message))
    }

    /// Apply an inbound mirror message.
    ///
    /// State payloads are parsed in full before anything is replaced; on
    /// error the store is unchanged and the error is logged and returned.
    pub fn handle_mirror_message(
        &self,
        message: &MirrorMessage,
    ) -> Result<MirrorOutcome, MirrorError> {
        let MirrorMessage::Dispatch { payload, state } = message else {
            return Ok(MirrorOutcome::Ignored);
        };
        let command = *payload;
        let outcome = match command {
            MirrorCommand::Reset => {
                self.restore_state(self.inner.initial.clone());
                self.mirror_init();
                MirrorOutcome::Reset
            }
            MirrorCommand::Commit => {
                self.mirror_init();
                MirrorOutcome::Committed
            }
            MirrorCommand::Rollback | MirrorCommand::JumpToState | MirrorCommand::JumpToAction => {
                let next = state
                    .as_deref()
                    .ok_or(MirrorError::MissingState {
                        command: command.name(),
                    })
                    .and_then(parse_state)
                    .inspect_err(|err| {
                        warn!(message = "mirror.parse_failed", command = command.name(), error = %err);
                    })?;
                self.restore_state(next);
                if command == MirrorCommand::Rollback {
                    self.mirror_init();
                }
                MirrorOutcome::Replaced
            }
            MirrorCommand::Unsupported => MirrorOutcome::Ignored,
        };
        debug!(message = "mirror.command", command = command.name(), ?outcome);
        Ok(outcome)
    }
}

fn skip(op: &'static str, path: &CanonicalPath, reason: SkipReason) -> WriteOutcome {
    debug!(message = "store.path_miss", op, path = %path, reason = %reason);
    WriteOutcome::Skipped(reason)
}
