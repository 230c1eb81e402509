#![forbid(unsafe_code)]

//! Debug mirror wire types and sinks.
//!
//! Outbound, the store pushes an action `{type, payload}` plus a full state
//! snapshot to a [`MirrorSink`] after every mutation. Inbound, a time-travel
//! front end sends [`MirrorMessage`]s:
//!
//! ```json
//! {"type": "DISPATCH", "payload": {"type": "JUMP_TO_STATE"}, "state": "{\"count\":1}"}
//! ```
//!
//! The store applies them with
//! [`Store::handle_mirror_message`](crate::Store::handle_mirror_message).
//!
//! # Failure Modes
//!
//! - **Malformed message or state payload**: parsing completes before any
//!   store mutation, so a bad payload is reported as a [`MirrorError`] and
//!   the store is left untouched.
//! - **Sink I/O failure**: [`JsonlSink`] logs a warning and keeps going.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::warn;

use treestate_core::tree::kind_of;

/// Outbound action description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirrorAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl MirrorAction {
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Receiver for outbound mirror traffic.
pub trait MirrorSink {
    /// Reset the sink's baseline to `state`.
    fn init(&mut self, name: &str, state: &Map<String, Value>);

    /// Record one action and the state after it.
    fn send(&mut self, action: &MirrorAction, state: &Map<String, Value>);
}

// ─── Inbound ─────────────────────────────────────────────────────────────────

/// Message from the mirror front end.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MirrorMessage {
    Dispatch {
        payload: MirrorCommand,
        #[serde(default)]
        state: Option<String>,
    },
    /// Any other message type; ignored.
    #[serde(other)]
    Other,
}

impl MirrorMessage {
    /// Parse a raw JSON message.
    pub fn parse(raw: &str) -> Result<Self, MirrorError> {
        serde_json::from_str(raw).map_err(MirrorError::Message)
    }

    /// Shorthand for a dispatch without a state payload.
    #[must_use]
    pub fn dispatch(command: MirrorCommand) -> Self {
        Self::Dispatch {
            payload: command,
            state: None,
        }
    }

    /// Shorthand for a dispatch carrying serialized state.
    #[must_use]
    pub fn dispatch_with_state(command: MirrorCommand, state: impl Into<String>) -> Self {
        Self::Dispatch {
            payload: command,
            state: Some(state.into()),
        }
    }
}

/// Dispatch command carried in a [`MirrorMessage::Dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MirrorCommand {
    /// Restore the initial snapshot.
    Reset,
    /// Make the current state the sink's new baseline.
    Commit,
    /// Restore the last committed state.
    Rollback,
    JumpToState,
    JumpToAction,
    #[serde(other)]
    Unsupported,
}

impl MirrorCommand {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Reset => "RESET",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::JumpToState => "JUMP_TO_STATE",
            Self::JumpToAction => "JUMP_TO_ACTION",
            Self::Unsupported => "UNSUPPORTED",
        }
    }
}

/// What an inbound message did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// State restored to the initial snapshot.
    Reset,
    /// Sink baseline moved to the current state; store unchanged.
    Committed,
    /// State replaced from the message payload.
    Replaced,
    /// Message type or command not handled.
    Ignored,
}

/// Inbound mirror failures. None of these leave the store modified.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("malformed mirror message: {0}")]
    Message(#[source] serde_json::Error),
    #[error("malformed state payload: {0}")]
    State(#[source] serde_json::Error),
    #[error("state payload must be an object, found {found}")]
    NotAnObject { found: &'static str },
    #[error("{command} requires a state payload")]
    MissingState { command: &'static str },
}

/// Parse a serialized state payload into a store mapping.
pub fn parse_state(raw: &str) -> Result<Map<String, Value>, MirrorError> {
    match serde_json::from_str::<Value>(raw).map_err(MirrorError::State)? {
        Value::Object(map) => Ok(map),
        other => Err(MirrorError::NotAnObject {
            found: kind_of(&other),
        }),
    }
}

// ─── Sinks ───────────────────────────────────────────────────────────────────

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorRecord {
    Init {
        name: String,
        state: Map<String, Value>,
    },
    Action {
        action: MirrorAction,
        state: Map<String, Value>,
    },
}

/// In-memory sink. Clones share one log, so a test can keep a handle while
/// the store owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    log: Rc<RefCell<Vec<MirrorRecord>>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<MirrorRecord> {
        self.log.borrow().clone()
    }

    /// Action names in send order.
    #[must_use]
    pub fn action_kinds(&self) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter_map(|record| match record {
                MirrorRecord::Action { action, .. } => Some(action.kind.clone()),
                MirrorRecord::Init { .. } => None,
            })
            .collect()
    }

    /// State from the most recent record.
    #[must_use]
    pub fn last_state(&self) -> Option<Map<String, Value>> {
        self.log.borrow().last().map(|record| match record {
            MirrorRecord::Init { state, .. } | MirrorRecord::Action { state, .. } => state.clone(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.log.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

impl MirrorSink for RecordingSink {
    fn init(&mut self, name: &str, state: &Map<String, Value>) {
        self.log.borrow_mut().push(MirrorRecord::Init {
            name: name.to_owned(),
            state: state.clone(),
        });
    }

    fn send(&mut self, action: &MirrorAction, state: &Map<String, Value>) {
        self.log.borrow_mut().push(MirrorRecord::Action {
            action: action.clone(),
            state: state.clone(),
        });
    }
}

/// Sink writing one JSON object per line:
///
/// - `{"event":"init","name":...,"state":{...}}`
/// - `{"event":"action","seq":N,"action":{"type":...,"payload":...},"state":{...}}`
#[derive(Debug)]
pub struct JsonlSink<W: Write> {
    writer: W,
    seq: u64,
    flush_on_write: bool,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            seq: 0,
            flush_on_write: true,
        }
    }

    /// Toggle flush-on-write.
    #[must_use]
    pub fn with_flush_on_write(mut self, enabled: bool) -> Self {
        self.flush_on_write = enabled;
        self
    }

    /// Number of actions written.
    #[must_use]
    pub fn actions_written(&self) -> u64 {
        self.seq
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, line: &Value) {
        let result = writeln!(self.writer, "{line}").and_then(|()| {
            if self.flush_on_write {
                self.writer.flush()
            } else {
                Ok(())
            }
        });
        if let Err(err) = result {
            warn!(message = "mirror.sink_write_failed", error = %err);
        }
    }
}

impl<W: Write> MirrorSink for JsonlSink<W> {
    fn init(&mut self, name: &str, state: &Map<String, Value>) {
        self.write_line(&json!({"event": "init", "name": name, "state": state}));
    }

    fn send(&mut self, action: &MirrorAction, state: &Map<String, Value>) {
        self.seq += 1;
        let line = json!({
            "event": "action",
            "seq": self.seq,
            "action": action,
            "state": state,
        });
        self.write_line(&line);
    }
}
