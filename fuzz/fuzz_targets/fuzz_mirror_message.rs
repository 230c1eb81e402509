#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::json;
use treestate_runtime::{Store, StoreConfig};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let mut initial = serde_json::Map::new();
    initial.insert("count".into(), json!(1));
    let store = Store::new(StoreConfig::new().with_initial_state(initial));
    let before = store.snapshot();

    if store.receive_mirror_json(raw).is_err() {
        assert_eq!(store.snapshot(), before, "rejected message mutated state");
    }
    store.flush();
});
