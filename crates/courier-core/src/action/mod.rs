//! Action execution pipeline.
//!
//! ```text
//! payload string ──► ActionPayload (ordered name → value)
//!                        │
//!                        ▼
//! ActionCoordinator ── one ActionRunner::run per entry ──► Action::perform
//!        ▲                                                      │
//!        └──────────── Completion::finish(ActionResult) ◄───────┘
//! ```
//!
//! The coordinator counts completions per batch and tells its
//! [`BatchHost`](coordinator::BatchHost) exactly once when every action in
//! the batch has finished.

pub mod builtins;
pub mod coordinator;
pub mod registry;
pub mod runner;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CourierError, Result};

pub use coordinator::{ActionCoordinator, BatchHost, BatchSummary, RequestId};
pub use registry::{Action, ActionRegistry};
pub use runner::{ActionRunner, Completion, RegistryRunner};

/// Metadata key under which the originating push message is attached.
pub const PUSH_MESSAGE_METADATA: &str = "com.courier.PUSH_MESSAGE";

// ---------------------------------------------------------------------------
// Situation
// ---------------------------------------------------------------------------

/// How an action run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Situation {
    PushReceived,
    PushOpened,
    WebViewInvocation,
    ManualInvocation,
    ForegroundNotificationButton,
    BackgroundNotificationButton,
}

impl Situation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Situation::PushReceived => "push_received",
            Situation::PushOpened => "push_opened",
            Situation::WebViewInvocation => "web_view_invocation",
            Situation::ManualInvocation => "manual_invocation",
            Situation::ForegroundNotificationButton => "foreground_notification_button",
            Situation::BackgroundNotificationButton => "background_notification_button",
        }
    }
}

impl fmt::Display for Situation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Situation {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "push_received" => Ok(Situation::PushReceived),
            "push_opened" => Ok(Situation::PushOpened),
            "web_view_invocation" => Ok(Situation::WebViewInvocation),
            "manual_invocation" => Ok(Situation::ManualInvocation),
            "foreground_notification_button" => Ok(Situation::ForegroundNotificationButton),
            "background_notification_button" => Ok(Situation::BackgroundNotificationButton),
            other => Err(CourierError::InvalidSituation(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionArguments
// ---------------------------------------------------------------------------

/// Everything one action run gets to see. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionArguments {
    value: Value,
    situation: Situation,
    metadata: HashMap<String, Value>,
}

impl ActionArguments {
    pub fn new(value: Value, situation: Situation) -> Self {
        Self {
            value,
            situation,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn situation(&self) -> Situation {
        self.situation
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

// ---------------------------------------------------------------------------
// ActionResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Completed,
    Error,
    Rejected,
}

/// Outcome of a single action run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    status: ActionStatus,
    value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ActionResult {
    pub fn completed(value: Value) -> Self {
        Self {
            status: ActionStatus::Completed,
            value: Some(value),
            error: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            status: ActionStatus::Completed,
            value: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Error,
            value: None,
            error: Some(message.into()),
        }
    }

    pub fn rejected() -> Self {
        Self {
            status: ActionStatus::Rejected,
            value: None,
            error: None,
        }
    }

    pub fn status(&self) -> ActionStatus {
        self.status
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

// ---------------------------------------------------------------------------
// ActionPayload
// ---------------------------------------------------------------------------

/// Ordered `name → value` pairs decoded from a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPayload {
    entries: Vec<(String, Value)>,
}

impl ActionPayload {
    /// Decode a payload. Fails on blank input, invalid JSON, a non-object
    /// root, or an empty object.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(CourierError::InvalidPayload("payload is empty".into()));
        }
        let root: Value = serde_json::from_str(raw)?;
        let Value::Object(map) = root else {
            return Err(CourierError::InvalidPayload(
                "payload must be a JSON object".into(),
            ));
        };
        if map.is_empty() {
            return Err(CourierError::InvalidPayload(
                "payload has no actions".into(),
            ));
        }
        Ok(Self {
            entries: map.into_iter().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(String, Value)> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_preserves_declared_order() {
        let payload =
            ActionPayload::parse(r#"{"zeta": 1, "alpha": "two", "mid": {"k": [3]}}"#).unwrap();
        let names: Vec<&str> = payload.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert_eq!(payload.entries()[2].1, json!({"k": [3]}));
    }

    #[test]
    fn payload_rejects_blank_and_malformed_input() {
        for raw in ["", "   ", "{}", "[1,2]", "\"addTag\"", "{not json"] {
            assert!(ActionPayload::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn situation_round_trips_through_str() {
        for s in [
            Situation::PushReceived,
            Situation::PushOpened,
            Situation::WebViewInvocation,
            Situation::ManualInvocation,
            Situation::ForegroundNotificationButton,
            Situation::BackgroundNotificationButton,
        ] {
            assert_eq!(s.as_str().parse::<Situation>().unwrap(), s);
        }
        assert!("launch".parse::<Situation>().is_err());
    }

    #[test]
    fn arguments_expose_metadata_by_key() {
        let mut metadata = HashMap::new();
        metadata.insert(PUSH_MESSAGE_METADATA.to_string(), json!({"oh": "hi"}));
        let args = ActionArguments::new(json!("actionValue"), Situation::PushReceived)
            .with_metadata(metadata);

        assert_eq!(args.value(), &json!("actionValue"));
        assert_eq!(
            args.metadata(PUSH_MESSAGE_METADATA).and_then(|m| m.get("oh")),
            Some(&json!("hi"))
        );
        assert!(args.metadata("missing").is_none());
    }
}
