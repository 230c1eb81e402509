#![forbid(unsafe_code)]

//! Subscriber registry keyed by canonical path identity.
//!
//! Path listeners live in an ordered map so that the descendants of an
//! identity `p` form one contiguous key range: every identity starting with
//! `p.` sorts at or after `"p."` and strictly before `"p/"` (`/` is the byte
//! following `.`). Ancestors are found by probing each separator-delimited
//! prefix of `p`.
//!
//! Two additional channels, "size" and "keys", hold listeners that are not
//! path-scoped.
//!
//! Gathered listeners remember the [`Origin`] they matched on, so delivery
//! can re-check that exact registration instead of any registration.
//!
//! # Invariants
//!
//! 1. A listener appears at most once per identity and at most once per
//!    channel.
//! 2. An identity with no listeners is removed from the map.
//! 3. Each registry slot holding a listener is reflected in
//!    [`Listener::registrations`]. Parked slots are not.
//! 4. A parked registration lives until its final delivery or until the
//!    listener is unsubscribed from that identity, whichever comes first.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::Rc;

use ahash::AHashMap;

use crate::listener::Listener;
use crate::path::SEPARATOR;

/// The registration a gathered listener matched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Path(Rc<str>),
    Size,
    Keys,
    /// A path registration dropped by [`Registry::clear_paths`] that is
    /// still owed one delivery.
    Parked(Rc<str>),
}

/// Ordered, de-duplicated set of listeners gathered for one delivery.
#[derive(Debug, Default)]
pub struct WorkingSet {
    index: AHashMap<u64, usize>,
    entries: Vec<(Listener, Vec<Origin>)>,
}

impl WorkingSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener` as matched via `origin`. Returns `false` if the
    /// listener was already gathered; the origin is still recorded.
    pub fn insert(&mut self, listener: &Listener, origin: Origin) -> bool {
        if let Some(&slot) = self.index.get(&listener.id()) {
            let origins = &mut self.entries[slot].1;
            if !origins.contains(&origin) {
                origins.push(origin);
            }
            return false;
        }
        self.index.insert(listener.id(), self.entries.len());
        self.entries.push((listener.clone(), vec![origin]));
        true
    }

    #[must_use]
    pub fn contains(&self, listener: &Listener) -> bool {
        self.index.contains_key(&listener.id())
    }

    /// Registrations `listener` was gathered through.
    #[must_use]
    pub fn origins(&self, listener: &Listener) -> &[Origin] {
        match self.index.get(&listener.id()) {
            Some(&slot) => self.entries[slot].1.as_slice(),
            None => &[],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.entries.iter().map(|(listener, _)| listener)
    }

    pub(crate) fn into_entries(self) -> Vec<(Listener, Vec<Origin>)> {
        self.entries
    }
}

/// Per-path and channel listener sets.
#[derive(Debug, Default)]
pub struct Registry {
    paths: BTreeMap<Rc<str>, Vec<Listener>>,
    parked: BTreeMap<Rc<str>, Vec<Listener>>,
    size: Vec<Listener>,
    keys: Vec<Listener>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` at `identity`. Returns `false` if already present.
    pub fn subscribe(&mut self, identity: &Rc<str>, listener: &Listener) -> bool {
        let set = self.paths.entry(Rc::clone(identity)).or_default();
        insert_unique(set, listener)
    }

    /// Remove `listener` from `identity`, cancelling a parked registration
    /// there too. Returns `false` if neither was present.
    pub fn unsubscribe(&mut self, identity: &str, listener: &Listener) -> bool {
        let mut removed = false;
        if let Some(set) = self.paths.get_mut(identity) {
            removed = remove_one(set, listener);
            if set.is_empty() {
                self.paths.remove(identity);
            }
        }
        self.unpark(identity, listener) || removed
    }

    pub fn add_size_listener(&mut self, listener: &Listener) -> bool {
        insert_unique(&mut self.size, listener)
    }

    pub fn remove_size_listener(&mut self, listener: &Listener) -> bool {
        remove_one(&mut self.size, listener)
    }

    pub fn add_keys_listener(&mut self, listener: &Listener) -> bool {
        insert_unique(&mut self.keys, listener)
    }

    pub fn remove_keys_listener(&mut self, listener: &Listener) -> bool {
        remove_one(&mut self.keys, listener)
    }

    /// Gather listeners at `identity`, its descendants, and its ancestors.
    pub fn collect_path(&self, identity: &str, out: &mut WorkingSet) {
        if let Some((key, set)) = self.paths.get_key_value(identity) {
            gather(key, set, out);
        }

        let lower = format!("{identity}{SEPARATOR}");
        let upper = format!("{identity}{}", char::from(SEPARATOR as u8 + 1));
        let range = (Bound::Included(lower.as_str()), Bound::Excluded(upper.as_str()));
        for (key, set) in self.paths.range::<str, _>(range) {
            gather(key, set, out);
        }

        for (idx, ch) in identity.char_indices() {
            if ch != SEPARATOR {
                continue;
            }
            if let Some((key, set)) = self.paths.get_key_value(&identity[..idx]) {
                gather(key, set, out);
            }
        }
    }

    /// Gather every path listener.
    pub fn collect_all_paths(&self, out: &mut WorkingSet) {
        for (key, set) in &self.paths {
            gather(key, set, out);
        }
    }

    pub fn collect_size(&self, out: &mut WorkingSet) {
        for listener in &self.size {
            out.insert(listener, Origin::Size);
        }
    }

    pub fn collect_keys(&self, out: &mut WorkingSet) {
        for listener in &self.keys {
            out.insert(listener, Origin::Keys);
        }
    }

    /// Drop every path registration. Each dropped `(identity, listener)`
    /// pair is parked and returned; size and keys channels are kept.
    pub fn clear_paths(&mut self) -> Vec<(Rc<str>, Listener)> {
        let mut dropped = Vec::new();
        for (identity, set) in std::mem::take(&mut self.paths) {
            let parked = self.parked.entry(Rc::clone(&identity)).or_default();
            for listener in set {
                listener.release();
                if !parked.contains(&listener) {
                    parked.push(listener.clone());
                }
                dropped.push((Rc::clone(&identity), listener));
            }
        }
        dropped
    }

    /// True if `listener` still awaits its final delivery at `identity`.
    #[must_use]
    pub fn is_parked(&self, identity: &str, listener: &Listener) -> bool {
        self.parked
            .get(identity)
            .is_some_and(|set| set.contains(listener))
    }

    /// Settle a parked registration. Returns `false` if it was not parked.
    pub fn unpark(&mut self, identity: &str, listener: &Listener) -> bool {
        let Some(set) = self.parked.get_mut(identity) else {
            return false;
        };
        let Some(pos) = set.iter().position(|l| l == listener) else {
            return false;
        };
        set.swap_remove(pos);
        if set.is_empty() {
            self.parked.remove(identity);
        }
        true
    }

    /// Number of parked registrations.
    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.parked.values().map(Vec::len).sum()
    }

    /// True if the registration behind `origin` still holds `listener`.
    #[must_use]
    pub fn holds(&self, origin: &Origin, listener: &Listener) -> bool {
        match origin {
            Origin::Path(identity) => self.contains(identity, listener),
            Origin::Size => self.size.contains(listener),
            Origin::Keys => self.keys.contains(listener),
            Origin::Parked(identity) => self.is_parked(identity, listener),
        }
    }

    /// True if `listener` is registered exactly at `identity`.
    #[must_use]
    pub fn contains(&self, identity: &str, listener: &Listener) -> bool {
        self.paths
            .get(identity)
            .is_some_and(|set| set.contains(listener))
    }

    /// Number of listeners registered exactly at `identity`.
    #[must_use]
    pub fn listener_count(&self, identity: &str) -> usize {
        self.paths.get(identity).map_or(0, Vec::len)
    }

    /// Number of distinct subscribed identities.
    #[must_use]
    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn size_listener_count(&self) -> usize {
        self.size.len()
    }

    #[must_use]
    pub fn keys_listener_count(&self) -> usize {
        self.keys.len()
    }

    /// Subscribed identities in sorted order.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(|k| &**k)
    }
}

fn gather(identity: &Rc<str>, set: &[Listener], out: &mut WorkingSet) {
    for listener in set {
        out.insert(listener, Origin::Path(Rc::clone(identity)));
    }
}

fn insert_unique(set: &mut Vec<Listener>, listener: &Listener) -> bool {
    if set.contains(listener) {
        return false;
    }
    listener.retain();
    set.push(listener.clone());
    true
}

fn remove_one(set: &mut Vec<Listener>, listener: &Listener) -> bool {
    let Some(pos) = set.iter().position(|l| l == listener) else {
        return false;
    };
    set.remove(pos).release();
    true
}
