#![forbid(unsafe_code)]

//! Deferred, coalesced notification delivery.
//!
//! Writers describe what changed as a [`NotificationBatch`] and submit it to
//! a [`Notifier`]. Nothing is delivered at submit time; the host drains the
//! queue at its own yield point with [`Notifier::flush`] or
//! [`Notifier::flush_until`].
//!
//! # Delivery contract
//!
//! - A batch resolves its listeners against the registry when it executes,
//!   not when it was queued. Every distinct listener in the union fires
//!   exactly once per batch.
//! - Before each call, a listener is skipped unless the registry still holds
//!   one of the registrations it was gathered through. Unsubscribing from
//!   the matched path mid-flush suppresses pending delivery even if the
//!   listener stays registered elsewhere.
//! - Parked registrations (see [`NotificationBatch::with_parked`]) get one
//!   delivery and are settled when their batch completes. Unsubscribing
//!   before that cancels the delivery.
//! - Batches run in submit order. `flush_until` may stop between batches;
//!   a batch that has started always completes.
//! - A flush started from inside a callback returns immediately; the outer
//!   flush picks up anything queued meanwhile.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::debug;
use web_time::Instant;

use crate::listener::Listener;
use crate::registry::{Origin, Registry, WorkingSet};

/// Sequence number assigned to a batch at submit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchId(pub u64);

/// A description of what changed, resolved to listeners at delivery.
#[derive(Debug, Clone)]
pub struct NotificationBatch {
    paths: Vec<Rc<str>>,
    all_paths: bool,
    size: bool,
    keys: bool,
    parked: Vec<(Rc<str>, Listener)>,
    queued_at: Option<Instant>,
}

impl Default for NotificationBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            paths: Vec::new(),
            all_paths: false,
            size: false,
            keys: false,
            parked: Vec::new(),
            queued_at: None,
        }
    }

    /// Wake listeners at, above, and below `identity`.
    #[must_use]
    pub fn with_path(mut self, identity: Rc<str>) -> Self {
        self.paths.push(identity);
        self
    }

    #[must_use]
    pub fn with_paths(mut self, identities: impl IntoIterator<Item = Rc<str>>) -> Self {
        self.paths.extend(identities);
        self
    }

    /// Wake every path listener.
    #[must_use]
    pub fn with_all_paths(mut self) -> Self {
        self.all_paths = true;
        self
    }

    /// Wake the size channel.
    #[must_use]
    pub fn with_size(mut self) -> Self {
        self.size = true;
        self
    }

    /// Wake the key-set channel.
    #[must_use]
    pub fn with_keys(mut self) -> Self {
        self.keys = true;
        self
    }

    /// Deliver once to registrations parked by [`Registry::clear_paths`].
    #[must_use]
    pub fn with_parked(mut self, parked: impl IntoIterator<Item = (Rc<str>, Listener)>) -> Self {
        self.parked.extend(parked);
        self
    }

    #[must_use]
    pub fn paths(&self) -> &[Rc<str>] {
        &self.paths
    }

    #[must_use]
    pub fn touches_size(&self) -> bool {
        self.size
    }

    #[must_use]
    pub fn touches_keys(&self) -> bool {
        self.keys
    }

    /// True if the batch cannot wake anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
            && !self.all_paths
            && !self.size
            && !self.keys
            && self.parked.is_empty()
    }

    /// Compute the listener union for this batch against `registry`.
    #[must_use]
    pub fn resolve(&self, registry: &Registry) -> WorkingSet {
        let mut out = WorkingSet::new();
        for (identity, listener) in &self.parked {
            out.insert(listener, Origin::Parked(Rc::clone(identity)));
        }
        if self.all_paths {
            registry.collect_all_paths(&mut out);
        } else {
            for identity in &self.paths {
                registry.collect_path(identity, &mut out);
            }
        }
        if self.size {
            registry.collect_size(&mut out);
        }
        if self.keys {
            registry.collect_keys(&mut out);
        }
        out
    }
}

/// FIFO of batches waiting for delivery.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    pending: VecDeque<(BatchId, NotificationBatch)>,
    next_id: u64,
}

impl NotificationQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `batch`. Empty batches are dropped and get no id.
    pub fn push(&mut self, mut batch: NotificationBatch) -> Option<BatchId> {
        if batch.is_empty() {
            return None;
        }
        self.next_id += 1;
        let id = BatchId(self.next_id);
        batch.queued_at = Some(Instant::now());
        self.pending.push_back((id, batch));
        Some(id)
    }

    pub fn pop(&mut self) -> Option<(BatchId, NotificationBatch)> {
        self.pending.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Counters from one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Batches executed.
    pub batches: usize,
    /// Callbacks invoked.
    pub delivered: usize,
    /// Callbacks skipped because they were unsubscribed before their turn.
    pub skipped: usize,
    /// Batches still queued when the flush returned.
    pub remaining: usize,
}

/// Registry plus pending-batch queue, shared by a store and its handles.
#[derive(Debug, Default)]
pub struct Notifier {
    registry: RefCell<Registry>,
    queue: RefCell<NotificationQueue>,
    flushing: Cell<bool>,
}

impl Notifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the registry for inspection.
    pub fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        f(&self.registry.borrow())
    }

    pub fn subscribe(&self, identity: &Rc<str>, listener: &Listener) -> bool {
        self.registry.borrow_mut().subscribe(identity, listener)
    }

    pub fn unsubscribe(&self, identity: &str, listener: &Listener) -> bool {
        self.registry.borrow_mut().unsubscribe(identity, listener)
    }

    pub fn add_size_listener(&self, listener: &Listener) -> bool {
        self.registry.borrow_mut().add_size_listener(listener)
    }

    pub fn remove_size_listener(&self, listener: &Listener) -> bool {
        self.registry.borrow_mut().remove_size_listener(listener)
    }

    pub fn add_keys_listener(&self, listener: &Listener) -> bool {
        self.registry.borrow_mut().add_keys_listener(listener)
    }

    pub fn remove_keys_listener(&self, listener: &Listener) -> bool {
        self.registry.borrow_mut().remove_keys_listener(listener)
    }

    /// Drop all path registrations; see [`Registry::clear_paths`].
    pub fn clear_paths(&self) -> Vec<(Rc<str>, Listener)> {
        self.registry.borrow_mut().clear_paths()
    }

    pub fn submit(&self, batch: NotificationBatch) -> Option<BatchId> {
        let id = self.queue.borrow_mut().push(batch);
        if let Some(id) = id {
            debug!(message = "scheduler.submit", batch_id = id.0);
        }
        id
    }

    /// Queue a batch for one path.
    pub fn notify_path(&self, identity: Rc<str>) -> Option<BatchId> {
        self.submit(NotificationBatch::new().with_path(identity))
    }

    /// Queue one batch covering several paths.
    pub fn notify_keys(&self, identities: impl IntoIterator<Item = Rc<str>>) -> Option<BatchId> {
        self.submit(NotificationBatch::new().with_paths(identities))
    }

    /// Queue a batch waking every registered listener.
    pub fn notify_all(&self) -> Option<BatchId> {
        self.submit(
            NotificationBatch::new()
                .with_all_paths()
                .with_size()
                .with_keys(),
        )
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Deliver every queued batch, including ones queued by callbacks.
    pub fn flush(&self) -> FlushReport {
        self.flush_until(|| false)
    }

    /// Deliver queued batches, checking `should_yield` before each one.
    pub fn flush_until(&self, mut should_yield: impl FnMut() -> bool) -> FlushReport {
        let mut report = FlushReport::default();
        if self.flushing.replace(true) {
            report.remaining = self.pending();
            return report;
        }
        let _reset = FlushGuard(&self.flushing);

        while !should_yield() {
            let Some((id, batch)) = self.queue.borrow_mut().pop() else {
                break;
            };
            let working = batch.resolve(&self.registry.borrow());
            let span = tracing::debug_span!(
                "scheduler.deliver",
                batch_id = id.0,
                listeners = working.len()
            );
            let _enter = span.enter();
            if let Some(queued_at) = batch.queued_at {
                debug!(
                    message = "scheduler.batch_latency",
                    queued_us = queued_at.elapsed().as_micros() as u64
                );
            }
            for (listener, origins) in working.into_entries() {
                let live = {
                    let registry = self.registry.borrow();
                    origins.iter().any(|origin| registry.holds(origin, &listener))
                };
                if live {
                    listener.call();
                    report.delivered += 1;
                } else {
                    report.skipped += 1;
                }
            }
            if !batch.parked.is_empty() {
                let mut registry = self.registry.borrow_mut();
                for (identity, listener) in &batch.parked {
                    registry.unpark(identity, listener);
                }
            }
            report.batches += 1;
        }

        report.remaining = self.pending();
        if report.batches > 0 {
            debug!(
                message = "scheduler.flush",
                batches = report.batches,
                delivered = report.delivered,
                skipped = report.skipped,
                remaining = report.remaining
            );
        }
        report
    }
}

/// Clears the re-entrancy flag even if a callback panics.
struct FlushGuard<'a>(&'a Cell<bool>);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
