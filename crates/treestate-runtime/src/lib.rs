#![forbid(unsafe_code)]

//! Runtime: the path-addressed store, its configuration, and the debug
//! mirror.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use treestate_core::path;
//! use treestate_runtime::{Store, StoreConfig};
//!
//! let store = Store::new(StoreConfig::new().with_fallback(json!({"user": {"name": "Anon"}})));
//! assert_eq!(store.get(path!["user", "name"]), Some(json!("Anon")));
//!
//! store.set("user", json!({"name": "Ada"}));
//! let _sub = store.watch(path!["user", "name"], || println!("renamed"));
//! store.flush();
//! ```

pub mod config;
pub mod fallback;
pub mod mirror;
pub mod source;
pub mod store;

pub use config::{FallbackMode, StoreConfig};
pub use fallback::FallbackResolver;
pub use mirror::{
    JsonlSink, MirrorAction, MirrorCommand, MirrorError, MirrorMessage, MirrorOutcome,
    MirrorRecord, MirrorSink, RecordingSink,
};
pub use source::{ExternalSource, KeysSource, PathSource, SizeSource, Subscription};
pub use store::{Notify, Patch, Store, WriteOutcome};
