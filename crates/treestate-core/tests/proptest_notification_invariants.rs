#![forbid(unsafe_code)]

//! Property-based invariant tests for canonicalization and fan-out.
//!
//! 1. A bare key and a one-element sequence share an identity.
//! 2. Identity equality matches segment-list equality for separator-free keys.
//! 3. A batch for path `p` wakes exactly the listeners registered at `p`,
//!    at a strict ancestor of `p`, or at a strict descendant of `p`.
//! 4. Each listener fires at most once per batch, however many of its
//!    registrations match.
//! 5. After unsubscribing everything, the registry holds no identities.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;

use proptest::prelude::*;
use treestate_core::path::{PathCache, PathKey, Segment, canonicalize, is_same_or_descendant};
use treestate_core::{Listener, Notifier, Registry};

// ── Strategies ──────────────────────────────────────────────────────────

fn segment() -> impl Strategy<Value = Segment> {
    prop_oneof![
        "[a-d]{1,2}".prop_map(Segment::Key),
        (0usize..3).prop_map(Segment::Index),
    ]
}

fn segments() -> impl Strategy<Value = Vec<Segment>> {
    proptest::collection::vec(segment(), 1..5)
}

fn registrations() -> impl Strategy<Value = Vec<Vec<Segment>>> {
    proptest::collection::vec(segments(), 1..12)
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn identity_of(segs: &[Segment]) -> Rc<str> {
    Rc::clone(canonicalize(&PathKey::Sequence(segs.to_vec())).identity())
}

fn related(a: &str, b: &str) -> bool {
    is_same_or_descendant(a, b) || is_same_or_descendant(b, a)
}

// ═════════════════════════════════════════════════════════════════════════
// 1-2. Canonicalization
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn bare_key_matches_one_element_sequence(key in "[a-z]{1,8}") {
        let mut cache = PathCache::new();
        let single = cache.identity(&PathKey::from(key.as_str()));
        let seq = cache.identity(&PathKey::Sequence(vec![Segment::from(key.as_str())]));
        prop_assert_eq!(single, seq);
    }

    #[test]
    fn identity_equality_tracks_segments(a in segments(), b in segments()) {
        let a_keys: Vec<String> = a.iter().map(Segment::to_key).collect();
        let b_keys: Vec<String> = b.iter().map(Segment::to_key).collect();
        prop_assert_eq!(identity_of(&a) == identity_of(&b), a_keys == b_keys);
    }

    #[test]
    fn cache_agrees_with_uncached(segs in segments()) {
        let key = PathKey::Sequence(segs);
        let mut cache = PathCache::new();
        let cached = cache.resolve(&key);
        let again = cache.resolve(&key);
        prop_assert_eq!(&cached, &canonicalize(&key));
        prop_assert!(Rc::ptr_eq(cached.identity(), again.identity()));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3-4. Fan-out
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn fan_out_matches_naive_prefix_relation(
        subscribed in registrations(),
        target in segments(),
    ) {
        let notifier = Notifier::new();
        let hits: Vec<Rc<Cell<u32>>> = subscribed.iter().map(|_| Rc::new(Cell::new(0))).collect();
        let mut identities = Vec::new();
        for (segs, counter) in subscribed.iter().zip(&hits) {
            let counter = Rc::clone(counter);
            let listener = Listener::new(move || counter.set(counter.get() + 1));
            let identity = identity_of(segs);
            notifier.subscribe(&identity, &listener);
            identities.push(identity);
        }

        let target_identity = identity_of(&target);
        notifier.notify_path(Rc::clone(&target_identity));
        notifier.flush();

        for (identity, counter) in identities.iter().zip(&hits) {
            let expected = u32::from(related(identity, &target_identity));
            prop_assert_eq!(counter.get(), expected, "identity {} vs {}", identity, target_identity);
        }
    }

    #[test]
    fn shared_listener_fires_once_per_batch(
        subscribed in registrations(),
        targets in proptest::collection::vec(segments(), 1..4),
    ) {
        let notifier = Notifier::new();
        let hits = Rc::new(Cell::new(0u32));
        let hits_clone = Rc::clone(&hits);
        let listener = Listener::new(move || hits_clone.set(hits_clone.get() + 1));
        let identities: Vec<Rc<str>> = subscribed.iter().map(|s| identity_of(s)).collect();
        for identity in &identities {
            notifier.subscribe(identity, &listener);
        }

        let target_ids: Vec<Rc<str>> = targets.iter().map(|t| identity_of(t)).collect();
        let any_match = identities
            .iter()
            .any(|i| target_ids.iter().any(|t| related(i, t)));
        notifier.notify_keys(target_ids);
        notifier.flush();

        prop_assert_eq!(hits.get(), u32::from(any_match));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. No leaked identities
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn unsubscribing_everything_empties_registry(subscribed in registrations()) {
        let mut registry = Registry::new();
        let mut entries = Vec::new();
        for segs in &subscribed {
            let listener = Listener::new(|| {});
            let identity = identity_of(segs);
            registry.subscribe(&identity, &listener);
            entries.push((identity, listener));
        }
        let distinct: BTreeSet<&str> = entries.iter().map(|(i, _)| &**i).collect();
        prop_assert_eq!(registry.path_count(), distinct.len());

        for (identity, listener) in &entries {
            prop_assert!(registry.unsubscribe(identity, listener));
            prop_assert!(!listener.is_registered());
        }
        prop_assert_eq!(registry.path_count(), 0);
    }
}
