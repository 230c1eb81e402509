//! Fallback resolution for unset paths.
//!
//! Results are memoized per canonical identity for the resolver's lifetime.
//! The fallback tree is fixed at construction, so the memo is never
//! invalidated.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use serde_json::Value;
use treestate_core::CanonicalPath;
use treestate_core::tree::lookup;

use crate::config::FallbackMode;

#[derive(Debug)]
pub struct FallbackResolver {
    root: Option<Value>,
    mode: FallbackMode,
    memo: RefCell<AHashMap<Rc<str>, Option<Value>>>,
}

impl FallbackResolver {
    #[must_use]
    pub fn new(root: Option<Value>, mode: FallbackMode) -> Self {
        Self {
            root,
            mode,
            memo: RefCell::new(AHashMap::new()),
        }
    }

    /// Default value for `path`, if the fallback tree has one.
    #[must_use]
    pub fn resolve(&self, path: &CanonicalPath) -> Option<Value> {
        let root = self.root.as_ref()?;
        if path.is_empty() {
            return None;
        }
        if let Some(found) = self.memo.borrow().get(path.identity()) {
            return found.clone();
        }
        let segments = match self.mode {
            FallbackMode::Object => &path.segments()[..],
            FallbackMode::Map => path.nested(),
        };
        let found = lookup(root, segments).cloned();
        self.memo
            .borrow_mut()
            .insert(Rc::clone(path.identity()), found.clone());
        found
    }

    #[must_use]
    pub fn mode(&self) -> FallbackMode {
        self.mode
    }

    /// Number of memoized lookups.
    #[must_use]
    pub fn memo_len(&self) -> usize {
        self.memo.borrow().len()
    }
}
