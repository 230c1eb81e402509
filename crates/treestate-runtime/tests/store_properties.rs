#![forbid(unsafe_code)]

//! End-to-end behaviour of the store through its public surface.
//!
//! 1. `set` then `get` returns the written value.
//! 2. Ancestor subscribers hear descendant writes; siblings do not leak.
//! 3. Updaters do not alter previously read values.
//! 4. `batch_update` changes and reports only present keys.
//! 5. `replace_all` drops registrations and fires one batch; a guard dropped
//!    before the flush cancels its final delivery.
//! 6. Mirror state round-trips through `JUMP_TO_STATE`; bad payloads are
//!    rejected without touching state.
//! 7. Object-mode fallback fills in for removed entries.

use std::cell::Cell;
use std::rc::Rc;

use proptest::prelude::*;
use serde_json::{Map, Value, json};
use treestate_core::{Listener, PathKey, Segment, path};
use treestate_runtime::{
    FallbackMode, MirrorCommand, MirrorError, MirrorMessage, MirrorOutcome, MirrorRecord, Patch,
    RecordingSink, Store, StoreConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────────

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object literal, got {other}"),
    }
}

fn store_with(value: Value) -> Store {
    Store::new(StoreConfig::new().with_initial_state(object(value)))
}

fn counter() -> (Rc<Cell<u32>>, Listener) {
    let hits = Rc::new(Cell::new(0));
    let inner = Rc::clone(&hits);
    (hits, Listener::new(move || inner.set(inner.get() + 1)))
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,8}".prop_map(Value::from),
    ]
}

fn key_segments() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-e]{1,3}", 1..5)
}

// ═════════════════════════════════════════════════════════════════════════
// 1. set / get
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn set_then_get_returns_value(segs in key_segments(), value in scalar()) {
        let store = store_with(json!({}));
        let top = segs[0].clone();
        store.set(top.as_str(), json!({}));

        let key = PathKey::Sequence(segs.iter().cloned().map(Segment::Key).collect());
        prop_assert!(store.set(key.clone(), value.clone()).is_applied());
        prop_assert_eq!(store.get(key), Some(value));
    }

    #[test]
    fn top_level_set_creates_entry(key in "[a-z]{1,6}", value in scalar()) {
        let store = store_with(json!({}));
        store.set(key.as_str(), value.clone());
        prop_assert_eq!(store.get(key.as_str()), Some(value));
        prop_assert!(store.has(&key));
    }
}

#[test]
fn array_index_segments_address_elements() {
    let store = store_with(json!({"list": [10, 20]}));
    store.set(path!["list", 1usize], json!(21));
    store.set(path!["list", 3usize], json!(40));
    assert_eq!(store.get("list"), Some(json!([10, 21, null, 40])));
    assert_eq!(store.get(path!["list", 0usize]), Some(json!(10)));
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Fan-out
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn ancestor_hears_descendant_but_not_sibling_leak() {
    let store = store_with(json!({"a": {"b": 0, "c": 0}}));
    let (a_hits, a_listener) = counter();
    let (ab_hits, ab_listener) = counter();
    store.subscribe("a", &a_listener);
    store.subscribe(path!["a", "b"], &ab_listener);

    store.set(path!["a", "b"], json!("x"));
    store.flush();
    assert_eq!(a_hits.get(), 1);
    assert_eq!(ab_hits.get(), 1);

    store.set(path!["a", "c"], json!("y"));
    store.flush();
    assert_eq!(a_hits.get(), 2);
    assert_eq!(ab_hits.get(), 1);
}

#[test]
fn one_listener_on_several_matching_paths_fires_once() {
    let store = store_with(json!({"a": {"b": {"c": 0}}}));
    let (hits, listener) = counter();
    store.subscribe("a", &listener);
    store.subscribe(path!["a", "b"], &listener);
    store.subscribe(path!["a", "b", "c"], &listener);

    store.set(path!["a", "b"], json!({"c": 1}));
    store.flush();
    assert_eq!(hits.get(), 1);
}

#[test]
fn stores_do_not_share_registries() {
    let first = store_with(json!({"a": 0}));
    let second = store_with(json!({"a": 0}));
    let (hits, listener) = counter();
    first.subscribe("a", &listener);

    second.set("a", json!(1));
    second.flush();
    first.flush();
    assert_eq!(hits.get(), 0);
}

#[test]
fn nothing_is_delivered_before_flush() {
    let store = store_with(json!({"a": 0}));
    let (hits, listener) = counter();
    store.subscribe("a", &listener);
    store.set("a", json!(1));
    store.set("a", json!(2));
    assert_eq!(hits.get(), 0);
    assert_eq!(store.pending_notifications(), 2);

    let report = store.flush();
    assert_eq!(report.batches, 2);
    assert_eq!(report.delivered, 2);
    assert_eq!(store.pending_notifications(), 0);
}

#[test]
fn flush_until_leaves_remaining_batches_queued() {
    let store = store_with(json!({"a": 0}));
    let (hits, listener) = counter();
    store.subscribe("a", &listener);
    for n in 0..3 {
        store.set("a", json!(n));
    }

    let mut budget = 1;
    let report = store.flush_until(move || {
        if budget == 0 {
            return true;
        }
        budget -= 1;
        false
    });
    assert_eq!(report.batches, 1);
    assert_eq!(report.remaining, 2);
    assert_eq!(hits.get(), 1);

    store.flush();
    assert_eq!(hits.get(), 3);
}

#[test]
fn manual_notify_all_wakes_every_channel() {
    let store = store_with(json!({"a": 0, "b": 0}));
    let (path_hits, path_listener) = counter();
    let (size_hits, size_listener) = counter();
    let (keys_hits, keys_listener) = counter();
    store.subscribe("a", &path_listener);
    store.subscribe(path!["b", "x"], &path_listener);
    store.add_size_listener(&size_listener);
    store.add_keys_listener(&keys_listener);

    store.notify_all();
    store.flush();
    assert_eq!(
        (path_hits.get(), size_hits.get(), keys_hits.get()),
        (1, 1, 1)
    );
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Copy-on-write
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn updater_leaves_earlier_snapshot_untouched() {
    let store = store_with(json!({"user": {"age": 5}}));
    let before_user = store.get("user");
    let before_all = store.snapshot();

    store.update(
        path!["user", "age"],
        Patch::with(|n| json!(n.as_i64().unwrap_or(0) + 1)),
    );

    assert_eq!(store.snapshot(), object(json!({"user": {"age": 6}})));
    assert_eq!(before_user, Some(json!({"age": 5})));
    assert_eq!(before_all, object(json!({"user": {"age": 5}})));
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Batch update
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn batch_update_changes_only_present_keys() {
    let store = store_with(json!({"a": {}}));
    let (a_hits, a_listener) = counter();
    let (b_hits, b_listener) = counter();
    store.subscribe("a", &a_listener);
    store.subscribe("b", &b_listener);

    let changed = store.batch_update([("a", json!({"x": 1})), ("b", json!({"y": 2}))]);
    assert_eq!(changed, ["a"]);
    assert_eq!(store.snapshot(), object(json!({"a": {"x": 1}})));

    let report = store.flush();
    assert_eq!(report.batches, 1);
    assert_eq!((a_hits.get(), b_hits.get()), (1, 0));
}

// ═════════════════════════════════════════════════════════════════════════
// 5. replace_all
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn replace_all_requires_resubscription() {
    let store = store_with(json!({"a": 1, "b": {"c": 2}}));
    let (hits, listener) = counter();
    let (size_hits, size_listener) = counter();
    let (keys_hits, keys_listener) = counter();
    store.subscribe("a", &listener);
    store.subscribe(path!["b", "c"], &listener);
    store.add_size_listener(&size_listener);
    store.add_keys_listener(&keys_listener);

    store.replace_all(object(json!({"a": 5})));
    assert!(!listener.is_registered());
    assert_eq!(store.subscribed_paths(), 0);

    let report = store.flush();
    assert_eq!(report.batches, 1);
    assert_eq!((hits.get(), size_hits.get(), keys_hits.get()), (1, 1, 1));

    store.set("a", json!(6));
    store.flush();
    assert_eq!(hits.get(), 1);

    assert!(store.subscribe("a", &listener));
    store.set("a", json!(7));
    store.flush();
    assert_eq!(hits.get(), 2);
}

#[test]
fn guard_dropped_after_replace_all_gets_nothing() {
    let store = store_with(json!({"a": 1}));
    let hits = Rc::new(Cell::new(0u32));
    let sub = {
        let hits = Rc::clone(&hits);
        store.watch("a", move || hits.set(hits.get() + 1))
    };

    store.replace_all(object(json!({"a": 2})));
    drop(sub);
    store.flush();
    assert_eq!(hits.get(), 0);
}

#[test]
fn unsubscribe_from_written_path_mid_flush_skips_listener_kept_elsewhere() {
    let store = store_with(json!({"a": 1, "b": 2}));
    let (hits, victim) = counter();
    let remover = {
        let store = store.clone();
        let victim = victim.clone();
        Listener::new(move || {
            store.unsubscribe("a", &victim);
        })
    };
    store.subscribe("a", &remover);
    store.subscribe("a", &victim);
    store.subscribe("b", &victim);

    store.set("a", json!(5));
    let report = store.flush();
    assert_eq!(hits.get(), 0);
    assert_eq!(report.skipped, 1);
    assert!(victim.is_registered());

    store.set("b", json!(6));
    store.flush();
    assert_eq!(hits.get(), 1);
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Mirror round-trip
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn jump_to_state_round_trips_serialized_state() {
    let store = store_with(json!({"user": {"name": "John", "tags": ["a", "b"]}, "n": 3}));
    let original = store.snapshot();
    let serialized = store.serialize_state();

    store.set("n", json!(4));
    store.remove("user");

    let outcome = store
        .handle_mirror_message(&MirrorMessage::dispatch_with_state(
            MirrorCommand::JumpToState,
            serialized,
        ))
        .unwrap();
    assert_eq!(outcome, MirrorOutcome::Replaced);
    assert_eq!(store.snapshot(), original);
}

#[test]
fn mirror_replacement_keeps_subscriptions() {
    let store = store_with(json!({"n": 1}));
    let (hits, listener) = counter();
    store.subscribe(path!["n"], &listener);

    store
        .receive_mirror_json(r#"{"type":"DISPATCH","payload":{"type":"JUMP_TO_STATE"},"state":"{\"n\":5}"}"#)
        .unwrap();
    store.flush();
    assert_eq!(hits.get(), 1);
    assert!(listener.is_registered());
    assert_eq!(store.get("n"), Some(json!(5)));
}

#[test]
fn malformed_jump_payload_leaves_state_unchanged() {
    let store = store_with(json!({"n": 3}));
    let before = store.serialize_state();
    let (hits, listener) = counter();
    store.subscribe("n", &listener);

    let err = store
        .receive_mirror_json(
            r#"{"type":"DISPATCH","payload":{"type":"JUMP_TO_STATE"},"state":"{not json"}"#,
        )
        .unwrap_err();
    assert!(matches!(err, MirrorError::State(_)));

    let err = store
        .receive_mirror_json(r#"{"type":"DISPATCH","payload":{"type":"JUMP_TO_STATE"},"state":"[1]"}"#)
        .unwrap_err();
    assert!(matches!(err, MirrorError::NotAnObject { found: "array" }));

    assert!(store.receive_mirror_json("not even json").is_err());

    assert_eq!(store.serialize_state(), before);
    assert!(listener.is_registered());
    assert_eq!(store.pending_notifications(), 0);
    store.flush();
    assert_eq!(hits.get(), 0);
}

#[test]
fn reset_restores_initial_state() {
    let sink = RecordingSink::new();
    let store = Store::with_sink(
        StoreConfig::new()
            .with_initial_state(object(json!({"n": 0})))
            .with_debug_name("app"),
        sink.clone(),
    );
    let (path_hits, path_listener) = counter();
    let (size_hits, size_listener) = counter();
    let (keys_hits, keys_listener) = counter();
    store.subscribe("n", &path_listener);
    store.add_size_listener(&size_listener);
    store.add_keys_listener(&keys_listener);

    store.set("n", json!(9));
    store.set("m", json!(1));
    store.flush();
    let before = (path_hits.get(), size_hits.get(), keys_hits.get());
    sink.clear();

    let outcome = store
        .handle_mirror_message(&MirrorMessage::dispatch(MirrorCommand::Reset))
        .unwrap();
    assert_eq!(outcome, MirrorOutcome::Reset);
    assert_eq!(store.snapshot(), object(json!({"n": 0})));

    store.flush();
    assert_eq!(path_hits.get(), before.0 + 1);
    assert_eq!(size_hits.get(), before.1 + 1);
    assert_eq!(keys_hits.get(), before.2 + 1);
    assert!(path_listener.is_registered());

    assert_eq!(
        sink.records(),
        vec![MirrorRecord::Init {
            name: "app".to_owned(),
            state: object(json!({"n": 0})),
        }]
    );
}

// ═════════════════════════════════════════════════════════════════════════
// 7. Object-mode fallback scenario
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn removed_entry_falls_back_to_defaults() {
    let store = Store::new(
        StoreConfig::new()
            .with_initial_state(object(json!({"user": {"name": "John", "roles": []}})))
            .with_mode(FallbackMode::Object)
            .with_fallback(json!({"user": {"name": "Anon", "roles": ["guest"]}})),
    );

    assert_eq!(store.get(path!["user", "name"]), Some(json!("John")));
    assert_eq!(store.get(path!["user", "roles"]), Some(json!([])));

    store.remove("user");
    assert_eq!(store.get(path!["user", "name"]), Some(json!("Anon")));
    assert_eq!(store.get(path!["user", "roles"]), Some(json!(["guest"])));
}
