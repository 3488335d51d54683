//! Values exchanged between the processor and action handlers

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input handed to an action handler for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub document: String,
    pub client_identifier: String,
    pub action_type: String,
    /// Opaque key/value payload; always a JSON object
    #[serde(default = "empty_object")]
    pub side_effects: Value,
}

impl EventData {
    pub fn new(
        document: impl Into<String>,
        client_identifier: impl Into<String>,
        action_type: impl Into<String>,
    ) -> Self {
        Self {
            document: document.into(),
            client_identifier: client_identifier.into(),
            action_type: action_type.into(),
            side_effects: empty_object(),
        }
    }

    pub fn with_side_effects(mut self, side_effects: Value) -> Self {
        self.side_effects = side_effects;
        self
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Outcome of one action execution
///
/// Ordinary external failures are reported as [`ActionResult::Failure`];
/// handlers reserve `Err` for faults that indicate a bug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionResult {
    Success { response: Option<String> },
    Failure { message: String },
}

impl ActionResult {
    pub fn success(response: Option<String>) -> Self {
        Self::Success { response }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
