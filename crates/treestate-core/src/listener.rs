//! Zero-argument change callbacks with pointer identity.
//!
//! A [`Listener`] is a shared handle: clones compare equal and count as the
//! same subscriber, so registering a clone twice under one path is a no-op.
//! The handle tracks how many registry slots currently hold it, which the
//! subscription guards read through [`Listener::is_registered`].

use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

fn next_listener_id() -> u64 {
    NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)
}

struct ListenerInner {
    id: u64,
    callback: Box<dyn Fn()>,
    registrations: Cell<usize>,
}

/// A change callback.
#[derive(Clone)]
pub struct Listener {
    inner: Rc<ListenerInner>,
}

impl Listener {
    /// Wrap a callback.
    pub fn new(callback: impl Fn() + 'static) -> Self {
        Self {
            inner: Rc::new(ListenerInner {
                id: next_listener_id(),
                callback: Box::new(callback),
                registrations: Cell::new(0),
            }),
        }
    }

    /// Process-unique id, stable across clones.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Number of registry slots currently holding this listener.
    #[must_use]
    pub fn registrations(&self) -> usize {
        self.inner.registrations.get()
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registrations() > 0
    }

    /// Invoke the callback.
    pub fn call(&self) {
        (self.inner.callback)();
    }

    pub(crate) fn retain(&self) {
        self.inner.registrations.set(self.registrations() + 1);
    }

    pub(crate) fn release(&self) {
        self.inner
            .registrations
            .set(self.registrations().saturating_sub(1));
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Listener {}

impl Hash for Listener {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.inner.id)
            .field("registrations", &self.registrations())
            .finish()
    }
}
