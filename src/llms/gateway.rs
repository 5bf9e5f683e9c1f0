//! Model Gateway: the stateless request/response boundary to the language
//! model.
//!
//! The gateway receives the capabilities currently available and the whole
//! conversation history, and returns free text and/or a typed list of
//! invocations. Whatever wire format the model speaks is parsed into
//! [`Invocation`]s here and never re-parsed downstream.

use async_trait::async_trait;

use crate::capabilities::CapabilityDescriptor;
use crate::types::{Invocation, Message};
use crate::utilities::errors::ModelGatewayError;

/// One model call.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system_prompt: &'a str,
    pub capabilities: &'a [CapabilityDescriptor],
    pub history: &'a [Message],
}

/// What the model answered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub invocations: Vec<Invocation>,
}

impl ModelResponse {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            invocations: Vec::new(),
        }
    }

    pub fn invoke(invocations: Vec<Invocation>) -> Self {
        Self {
            text: None,
            invocations,
        }
    }

    /// Trimmed text, if any is left after trimming.
    pub fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Model identifier, for logging.
    fn model(&self) -> &str;

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelGatewayError>;
}
