//! Navigation and mutation helpers over `serde_json::Value` trees.
//!
//! Segments are the stringified form produced by the path canonicalizer.
//! Objects are addressed by key; arrays by a segment that parses as a
//! decimal index.

use std::fmt;

use serde_json::{Map, Value};

/// Why a write did not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The path had no segments.
    EmptyPath,
    /// Multi-segment writes require the top-level key to exist.
    MissingKey(String),
    /// An intermediate value is a scalar and cannot hold children.
    NotAContainer { segment: String },
    /// A segment addressing an array is not a decimal index.
    BadIndex { segment: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPath => f.write_str("empty path"),
            Self::MissingKey(key) => write!(f, "top-level key '{key}' is absent"),
            Self::NotAContainer { segment } => {
                write!(f, "value at '{segment}' cannot hold children")
            }
            Self::BadIndex { segment } => write!(f, "'{segment}' is not an array index"),
        }
    }
}

impl std::error::Error for SkipReason {}

/// Follow `segments` from `root`.
///
/// Returns `None` if any step is missing, or if an intermediate value is
/// `null` or a scalar.
#[must_use]
pub fn lookup<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = match node {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

/// Assign `value` at `segments` beneath `root`, creating missing or `null`
/// intermediates as empty objects. Arrays are padded with `null` when the
/// index is past the end.
///
/// Returns an error before mutating anything: creation only happens on
/// fresh nodes, which cannot fail.
pub fn assign(root: &mut Value, segments: &[String], value: Value) -> Result<(), SkipReason> {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return Ok(());
    };
    let mut node = root;
    for segment in parents {
        node = child_slot(node, segment)?;
    }
    *child_slot(node, last)? = value;
    Ok(())
}

fn child_slot<'a>(node: &'a mut Value, segment: &str) -> Result<&'a mut Value, SkipReason> {
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => Ok(map.entry(segment.to_owned()).or_insert(Value::Null)),
        Value::Array(items) => {
            let idx = segment.parse::<usize>().map_err(|_| SkipReason::BadIndex {
                segment: segment.to_owned(),
            })?;
            if idx >= items.len() {
                items.resize(idx + 1, Value::Null);
            }
            Ok(&mut items[idx])
        }
        _ => Err(SkipReason::NotAContainer {
            segment: segment.to_owned(),
        }),
    }
}

/// Merge rule for object-shaped patches.
///
/// - current is an object: a copy of it with `partial`'s fields laid over.
/// - current is an array: `partial` replaces it.
/// - anything else: `partial` as a fresh object.
#[must_use]
pub fn shallow_merge(current: Option<&Value>, partial: &Map<String, Value>) -> Value {
    match current {
        Some(Value::Object(fields)) => {
            let mut merged = fields.clone();
            for (key, value) in partial {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => Value::Object(partial.clone()),
    }
}

/// Short type name for log fields and error messages.
#[must_use]
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
