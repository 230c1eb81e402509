#![no_main]

use std::cell::Cell;
use std::rc::Rc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::{Value, json};
use treestate_core::{Listener, PathKey, Segment};
use treestate_runtime::{Notify, Patch, Store, StoreConfig};

#[derive(Arbitrary, Debug)]
enum FuzzSegment {
    Key(u8),
    Index(u8),
}

impl FuzzSegment {
    fn to_segment(&self) -> Segment {
        match self {
            FuzzSegment::Key(k) => Segment::Key(format!("k{}", k % 6)),
            FuzzSegment::Index(i) => Segment::Index(usize::from(i % 4)),
        }
    }
}

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Set { path: Vec<FuzzSegment>, value: i32 },
    Update { path: Vec<FuzzSegment>, merge: bool },
    Remove(u8),
    Replace,
    Subscribe(Vec<FuzzSegment>),
    Unsubscribe(Vec<FuzzSegment>),
    Flush,
}

fn key(path: &[FuzzSegment]) -> PathKey {
    PathKey::Sequence(path.iter().take(5).map(FuzzSegment::to_segment).collect())
}

fuzz_target!(|ops: Vec<FuzzOp>| {
    let store = Store::new(StoreConfig::new().with_fallback(json!({"k0": {"k1": [0, 1]}})));
    let hits = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&hits);
    let listener = Listener::new(move || counter.set(counter.get() + 1));

    for op in ops.iter().take(256) {
        match op {
            FuzzOp::Set { path, value } => {
                let path = key(path);
                if store.set(path.clone(), json!(value)).is_applied() {
                    assert_eq!(store.get(path), Some(json!(value)));
                }
            }
            FuzzOp::Update { path, merge } => {
                let patch = if *merge {
                    Patch::from(json!({"m": 1}))
                } else {
                    Patch::with(|v: &Value| json!([v.clone()]))
                };
                store.update(key(path), patch);
            }
            FuzzOp::Remove(k) => {
                store.remove(&format!("k{}", k % 6));
            }
            FuzzOp::Replace => store.replace_with(store.snapshot(), Notify::Scheduled),
            FuzzOp::Subscribe(path) => {
                store.subscribe(key(path), &listener);
            }
            FuzzOp::Unsubscribe(path) => {
                store.unsubscribe(key(path), &listener);
            }
            FuzzOp::Flush => {
                store.flush();
            }
        }
    }
    store.flush();
    assert_eq!(store.pending_notifications(), 0);
});
