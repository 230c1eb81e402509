//! Construction-time options for a [`Store`](crate::Store).
//!
//! Options can be built in code with the `with_*` methods or loaded from a
//! JSON document using the camelCase names `initialState`, `fallbackValue`,
//! `mode`, `debugName`, and `enableDebugMirror`.

use serde::Deserialize;
use serde_json::{Map, Value};

/// How the fallback tree is consulted for a missing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// The fallback is one shared default for every entry; lookup starts
    /// after the top-level key.
    Map,
    /// The fallback holds per-key defaults; lookup starts at the top-level
    /// key.
    #[default]
    Object,
}

/// Store configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Seed mapping, also retained as the reset target.
    pub initial_state: Map<String, Value>,
    /// Default tree consulted on read misses.
    #[serde(rename = "fallbackValue")]
    pub fallback: Option<Value>,
    pub mode: FallbackMode,
    /// Connection name for the debug mirror.
    pub debug_name: Option<String>,
    /// Explicit mirror switch; `None` means "on iff `debug_name` is set".
    pub enable_debug_mirror: Option<bool>,
}

impl StoreConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    #[must_use]
    pub fn with_initial_state(mut self, state: Map<String, Value>) -> Self {
        self.initial_state = state;
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: FallbackMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_debug_mirror(mut self, enabled: bool) -> Self {
        self.enable_debug_mirror = Some(enabled);
        self
    }

    /// Whether a supplied sink should be connected.
    #[must_use]
    pub fn mirror_enabled(&self) -> bool {
        self.debug_name.is_some() && self.enable_debug_mirror.unwrap_or(true)
    }
}
