//! Conversation history entries.
//!
//! History is append-only. A [`Message::Model`] may carry capability
//! invocations; each invocation that was executed is answered by exactly one
//! [`Message::CapabilityResult`] with the same invocation id, appended later.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utilities::errors::CapabilityExecutionError;

/// A request from the model to call one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// Unique within one model turn. A later turn may reuse it.
    pub id: String,
    /// The capability name as the model spelled it.
    pub capability_name: String,
    /// Structured arguments, usually a JSON object.
    #[serde(default)]
    pub arguments: Value,
}

impl Invocation {
    pub fn new(
        id: impl Into<String>,
        capability_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self {
            id: id.into(),
            capability_name: capability_name.into(),
            arguments,
        }
    }
}

/// Success or failure payload of one capability call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "content", rename_all = "snake_case")]
pub enum CapabilityOutcome {
    Ok(String),
    Err(String),
}

impl CapabilityOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, CapabilityOutcome::Ok(_))
    }

    /// The text the model sees, whichever way the call went.
    pub fn content(&self) -> &str {
        match self {
            CapabilityOutcome::Ok(text) | CapabilityOutcome::Err(text) => text,
        }
    }
}

impl From<Result<String, CapabilityExecutionError>> for CapabilityOutcome {
    fn from(result: Result<String, CapabilityExecutionError>) -> Self {
        match result {
            Ok(text) => CapabilityOutcome::Ok(text),
            Err(err) => CapabilityOutcome::Err(err.to_string()),
        }
    }
}

/// Answer to one [`Invocation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub invocation_id: String,
    pub capability_name: String,
    pub outcome: CapabilityOutcome,
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// The user's request.
    User { text: String },
    /// A model turn: free text, invocations, or both.
    Model {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default)]
        invocations: Vec<Invocation>,
    },
    /// Result of an executed invocation.
    CapabilityResult(CapabilityResult),
    /// Out-of-band information from the runtime to the model.
    SystemNotice { text: String },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User { text: text.into() }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Message::SystemNotice { text: text.into() }
    }

    pub fn model(text: Option<String>, invocations: Vec<Invocation>) -> Self {
        Message::Model { text, invocations }
    }

    pub fn result(invocation: &Invocation, outcome: CapabilityOutcome) -> Self {
        Message::CapabilityResult(CapabilityResult {
            invocation_id: invocation.id.clone(),
            capability_name: invocation.capability_name.clone(),
            outcome,
        })
    }

    /// Invocations carried by a model turn; empty for every other kind.
    pub fn invocations(&self) -> &[Invocation] {
        match self {
            Message::Model { invocations, .. } => invocations,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serializes_with_kind_tag() {
        let msg = Message::result(
            &Invocation::new("call-1", "get_weather", json!({"city": "Paris"})),
            CapabilityOutcome::Ok("sunny".to_string()),
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "capability_result");
        assert_eq!(value["invocation_id"], "call-1");
        assert_eq!(value["outcome"]["status"], "ok");
        assert_eq!(value["outcome"]["content"], "sunny");
    }

    #[test]
    fn test_outcome_from_execution_error() {
        let outcome: CapabilityOutcome = Err(CapabilityExecutionError::Provider {
            name: "get_weather".to_string(),
            reason: "upstream 503".to_string(),
        })
        .into();
        assert!(!outcome.is_ok());
        assert_eq!(outcome.content(), "capability 'get_weather' failed: upstream 503");
    }

    #[test]
    fn test_invocations_only_on_model_turns() {
        let inv = Invocation::new("1", "x", Value::Null);
        assert_eq!(Message::model(None, vec![inv.clone()]).invocations(), &[inv]);
        assert!(Message::user("hi").invocations().is_empty());
    }
}
