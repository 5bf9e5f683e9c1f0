//! Error taxonomy for the capability loop.
//!
//! Only [`ModelGatewayError`] and the bound violations reported through
//! [`TaskFailure`] end a task. Every other error is turned into an entry in
//! the conversation history so the model can see it and adapt.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A provider manifest on disk could not be parsed.
///
/// Discovery logs the error, skips the provider and keeps going.
#[derive(Debug, Error)]
pub enum ConfigParseError {
    /// The descriptor or connection file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The front-matter block is not valid YAML.
    #[error("invalid front-matter in {path}: {source}")]
    FrontMatter {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The front-matter block was opened but never closed.
    #[error("unterminated front-matter block in {path}")]
    UnterminatedFrontMatter { path: PathBuf },

    /// The connection-config file is not valid JSON or has the wrong shape.
    #[error("invalid connection config {path}: {source}")]
    ConnectionConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An endpoint declares neither a command nor a URL.
    #[error("endpoint '{endpoint}' in {path} declares neither `command` nor `url`")]
    EndpointTarget { path: PathBuf, endpoint: String },
}

/// Loading a provider failed. Cached as `Failed` and never retried implicitly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderLoadError {
    /// No manifest with this provider id was discovered.
    #[error("provider '{0}' is not present in any manifest root")]
    UnknownProvider(String),

    /// An endpoint could not be reached or refused the handshake.
    #[error("provider '{provider_id}' endpoint '{endpoint}': {reason}")]
    Connection {
        provider_id: String,
        endpoint: String,
        reason: String,
    },

    /// The endpoint's transport kind has no client implementation.
    #[error("provider '{provider_id}' endpoint '{endpoint}' uses unsupported transport '{transport}'")]
    UnsupportedTransport {
        provider_id: String,
        endpoint: String,
        transport: String,
    },

    /// The load did not finish within the configured timeout.
    #[error("provider '{provider_id}' did not finish loading within {timeout_secs}s")]
    Timeout { provider_id: String, timeout_secs: u64 },
}

/// The resolver found no provider that could supply a capability name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("capability '{name}' cannot be fulfilled: {reason}")]
pub struct UnresolvableCapability {
    pub name: String,
    pub reason: String,
}

/// A loaded capability's call failed. Becomes an `Err` capability result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityExecutionError {
    /// The index pointed at a provider that has no handler for this name.
    #[error("capability '{name}' is not registered for provider '{provider_id}'")]
    NotRegistered { name: String, provider_id: String },

    /// Arguments did not match what the handler accepts.
    #[error("invalid arguments for '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    /// The call did not finish within the execution timeout.
    #[error("capability '{name}' timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },

    /// The provider reported an error.
    #[error("capability '{name}' failed: {reason}")]
    Provider { name: String, reason: String },
}

/// The model call itself failed. Fatal to the task.
#[derive(Debug, Error)]
pub enum ModelGatewayError {
    /// No API credential configured.
    #[error("model credential is not configured (set LLM_API_KEY)")]
    MissingCredential,

    /// Network-level failure after all retries.
    #[error("model request failed: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be interpreted.
    #[error("malformed model response: {0}")]
    Malformed(String),

    /// The call exceeded the model timeout.
    #[error("model call timed out after {0}s")]
    Timeout(u64),
}

impl From<reqwest::Error> for ModelGatewayError {
    fn from(err: reqwest::Error) -> Self {
        ModelGatewayError::Transport(err.to_string())
    }
}

/// Why a task ended without an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The model gateway was unavailable or returned garbage.
    ModelGateway,
    /// The step bound was exceeded.
    StepLimit,
    /// One capability name stayed unresolvable for too many attempts.
    UnresolvableCapability,
    /// The task-level timeout fired.
    TaskTimeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelGateway => write!(f, "model-gateway"),
            Self::StepLimit => write!(f, "step-limit"),
            Self::UnresolvableCapability => write!(f, "unresolvable-capability"),
            Self::TaskTimeout => write!(f, "task-timeout"),
        }
    }
}

/// Terminal failure of a task, carried in the task report.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("task failed ({kind}): {reason}")]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_load_error_is_cloneable_for_waiters() {
        let err = ProviderLoadError::Timeout {
            provider_id: "weather".to_string(),
            timeout_secs: 60,
        };
        let shared = err.clone();
        assert_eq!(err, shared);
        assert_eq!(
            shared.to_string(),
            "provider 'weather' did not finish loading within 60s"
        );
    }

    #[test]
    fn test_task_failure_display() {
        let failure = TaskFailure {
            kind: FailureKind::StepLimit,
            reason: "exceeded 25 steps".to_string(),
        };
        assert_eq!(failure.to_string(), "task failed (step-limit): exceeded 25 steps");
    }
}
