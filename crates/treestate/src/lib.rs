#![forbid(unsafe_code)]

//! treestate public facade crate.
//!
//! Re-exports the store surface so applications depend on one crate.

pub use treestate_core::path;
pub use treestate_core::{FlushReport, Listener, PathKey, Segment, SkipReason};
pub use treestate_runtime::{
    ExternalSource, FallbackMode, JsonlSink, MirrorAction, MirrorCommand, MirrorError,
    MirrorMessage, MirrorOutcome, MirrorSink, Notify, Patch, RecordingSink, Store, StoreConfig,
    Subscription, WriteOutcome,
};

pub mod prelude {
    pub use treestate_core as core;
    pub use treestate_runtime as runtime;

    pub use treestate_core::path;
    pub use treestate_runtime::{ExternalSource, Notify, Patch, Store, StoreConfig};
}
