//! Built-in capabilities served in-process by the `builtin` provider.
//!
//! These are plain local I/O wrappers: read, write and list files, run a
//! shell command, and report the current time. They are registered as a
//! pinned provider, so every conversation starts with them available.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::capabilities::{CapabilityDescriptor, CapabilityHandler, CapabilityRegistry};
use crate::manifests::ProviderMetadata;
use crate::utilities::errors::CapabilityExecutionError;

/// Provider id of the built-in capabilities.
pub const BUILTIN_PROVIDER_ID: &str = "builtin";

/// Characters of a file returned by `view_file` before truncation.
pub const VIEW_FILE_LIMIT: usize = 10_000;

/// Wall-clock bound on `execute_bash`.
pub const SHELL_TIMEOUT: Duration = Duration::from_secs(30);

/// Register the built-in provider on `registry`.
pub fn register(registry: &CapabilityRegistry) {
    let metadata = ProviderMetadata {
        name: "Built-in tools".to_string(),
        description: "Local file access, shell commands and the current time".to_string(),
        category: "system".to_string(),
        ..ProviderMetadata::default()
    };
    registry.register_static_provider(BUILTIN_PROVIDER_ID, metadata, handlers());
}

/// Every built-in handler.
pub fn handlers() -> Vec<Arc<dyn CapabilityHandler>> {
    vec![
        Arc::new(ViewFile::new()),
        Arc::new(WriteFile::new()),
        Arc::new(ListDirectory::new()),
        Arc::new(ExecuteBash::new()),
        Arc::new(CurrentTime::new()),
    ]
}

/// Parse arguments given as a JSON object or as a JSON-encoded string.
fn parse_args<T: DeserializeOwned>(name: &str, raw: Value) -> Result<T, CapabilityExecutionError> {
    let invalid = |reason: String| CapabilityExecutionError::InvalidArguments {
        name: name.to_string(),
        reason,
    };
    let value = match raw {
        Value::String(s) => serde_json::from_str(&s).map_err(|e| invalid(e.to_string()))?,
        Value::Null => json!({}),
        other => other,
    };
    serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
}

fn provider_error(name: &str, reason: impl std::fmt::Display) -> CapabilityExecutionError {
    CapabilityExecutionError::Provider {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// view_file
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Debug)]
pub struct ViewFile {
    descriptor: CapabilityDescriptor,
}

impl Default for ViewFile {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewFile {
    pub fn new() -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "view_file",
                BUILTIN_PROVIDER_ID,
                "Read and return the content of a text file.",
            )
            .with_input_schema(json!({
                "type": "object",
                "properties": { "path": { "type": "string", "description": "File to read" } },
                "required": ["path"]
            })),
        }
    }
}

#[async_trait]
impl CapabilityHandler for ViewFile {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn call(&self, arguments: Value) -> Result<String, CapabilityExecutionError> {
        let args: PathArgs = parse_args(&self.descriptor.name, arguments)?;
        let content = tokio::fs::read_to_string(&args.path)
            .await
            .map_err(|e| provider_error(&self.descriptor.name, format!("{}: {}", args.path, e)))?;
        if content.chars().count() > VIEW_FILE_LIMIT {
            let head: String = content.chars().take(VIEW_FILE_LIMIT).collect();
            return Ok(format!("{}\n\n... [truncated]", head));
        }
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[derive(Debug)]
pub struct WriteFile {
    descriptor: CapabilityDescriptor,
}

impl Default for WriteFile {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteFile {
    pub fn new() -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "write_file",
                BUILTIN_PROVIDER_ID,
                "Write text to a file, creating parent directories as needed.",
            )
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            })),
        }
    }
}

#[async_trait]
impl CapabilityHandler for WriteFile {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn call(&self, arguments: Value) -> Result<String, CapabilityExecutionError> {
        let name = &self.descriptor.name;
        let args: WriteArgs = parse_args(name, arguments)?;
        if let Some(parent) = Path::new(&args.path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| provider_error(name, format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&args.path, args.content.as_bytes())
            .await
            .map_err(|e| provider_error(name, format!("{}: {}", args.path, e)))?;
        Ok(format!("Wrote {} bytes to {}", args.content.len(), args.path))
    }
}

// ---------------------------------------------------------------------------
// list_directory
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default = "current_dir")]
    path: String,
}

fn current_dir() -> String {
    ".".to_string()
}

#[derive(Debug)]
pub struct ListDirectory {
    descriptor: CapabilityDescriptor,
}

impl Default for ListDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ListDirectory {
    pub fn new() -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "list_directory",
                BUILTIN_PROVIDER_ID,
                "List the entries of a directory, sorted by name. Directories end with '/'.",
            )
            .with_input_schema(json!({
                "type": "object",
                "properties": { "path": { "type": "string", "default": "." } }
            })),
        }
    }
}

#[async_trait]
impl CapabilityHandler for ListDirectory {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn call(&self, arguments: Value) -> Result<String, CapabilityExecutionError> {
        let name = &self.descriptor.name;
        let args: ListArgs = parse_args(name, arguments)?;
        let mut entries = tokio::fs::read_dir(&args.path)
            .await
            .map_err(|e| provider_error(name, format!("{}: {}", args.path, e)))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| provider_error(name, e))?
        {
            let mut entry_name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                entry_name.push('/');
            }
            names.push(entry_name);
        }
        names.sort();
        Ok(names.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// execute_bash
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CommandArgs {
    command: String,
}

#[derive(Debug)]
pub struct ExecuteBash {
    descriptor: CapabilityDescriptor,
    timeout: Duration,
}

impl Default for ExecuteBash {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecuteBash {
    pub fn new() -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "execute_bash",
                BUILTIN_PROVIDER_ID,
                "Run a shell command and return its output.",
            )
            .with_input_schema(json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"]
            })),
            timeout: SHELL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CapabilityHandler for ExecuteBash {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn call(&self, arguments: Value) -> Result<String, CapabilityExecutionError> {
        let name = &self.descriptor.name;
        let args: CommandArgs = parse_args(name, arguments)?;
        log::debug!("execute_bash: {}", args.command);

        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(&args.command).kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| CapabilityExecutionError::Timeout {
                name: name.clone(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| provider_error(name, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
            return Err(provider_error(name, format!("exit code {}: {}", code, detail)));
        }
        if !stdout.is_empty() {
            Ok(stdout.into_owned())
        } else if !stderr.is_empty() {
            Ok(stderr.into_owned())
        } else {
            Ok(format!("Command completed with code {}", code))
        }
    }
}

// ---------------------------------------------------------------------------
// current_time
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TimeArgs {
    #[serde(default)]
    utc: bool,
}

#[derive(Debug)]
pub struct CurrentTime {
    descriptor: CapabilityDescriptor,
}

impl Default for CurrentTime {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrentTime {
    pub fn new() -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "current_time",
                BUILTIN_PROVIDER_ID,
                "Return the current date and time (RFC 3339) and weekday.",
            )
            .with_input_schema(json!({
                "type": "object",
                "properties": { "utc": { "type": "boolean", "default": false } }
            })),
        }
    }
}

#[async_trait]
impl CapabilityHandler for CurrentTime {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn call(&self, arguments: Value) -> Result<String, CapabilityExecutionError> {
        let args: TimeArgs = parse_args(&self.descriptor.name, arguments)?;
        let (stamp, weekday) = if args.utc {
            let now = Utc::now();
            (now.to_rfc3339(), now.format("%A").to_string())
        } else {
            let now = Local::now();
            (now.to_rfc3339(), now.format("%A").to_string())
        };
        Ok(json!({ "now": stamp, "weekday": weekday }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_view_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/notes.txt");
        let path_str = path.to_string_lossy().to_string();

        let written = WriteFile::new()
            .call(json!({"path": path_str, "content": "hello"}))
            .await
            .unwrap();
        assert!(written.contains("5 bytes"));

        let content = ViewFile::new().call(json!({"path": path_str})).await.unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn test_view_file_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "x".repeat(VIEW_FILE_LIMIT + 50)).unwrap();

        let content = ViewFile::new()
            .call(json!({"path": path.to_string_lossy()}))
            .await
            .unwrap();
        assert!(content.ends_with("... [truncated]"));
        assert!(content.starts_with(&"x".repeat(VIEW_FILE_LIMIT)));
    }

    #[tokio::test]
    async fn test_view_missing_file_is_provider_error() {
        let err = ViewFile::new()
            .call(json!({"path": "/nonexistent/skillgate.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityExecutionError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_missing_argument_is_invalid() {
        let err = ViewFile::new().call(json!({})).await.unwrap_err();
        assert!(matches!(err, CapabilityExecutionError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_arguments_as_json_string() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let raw = json!({"path": dir.path().to_string_lossy()}).to_string();

        let listing = ListDirectory::new().call(Value::String(raw)).await.unwrap();
        assert_eq!(listing, "a/\nb.txt");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_bash() {
        let out = ExecuteBash::new().call(json!({"command": "echo hi"})).await.unwrap();
        assert_eq!(out.trim(), "hi");

        let err = ExecuteBash::new()
            .call(json!({"command": "echo boom >&2; exit 3"}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CapabilityExecutionError::Provider {
                name: "execute_bash".to_string(),
                reason: "exit code 3: boom".to_string(),
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_bash_timeout() {
        let err = ExecuteBash::new()
            .with_timeout(Duration::from_millis(100))
            .call(json!({"command": "sleep 5"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityExecutionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_current_time() {
        let out = CurrentTime::new().call(json!({"utc": true})).await.unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert!(parsed["now"].as_str().unwrap().contains('T'));
        assert!(!parsed["weekday"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_handler_names_are_unique() {
        let mut names: Vec<_> = handlers().iter().map(|h| h.descriptor().name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_default_matches_new() {
        assert_eq!(ViewFile::default().descriptor(), ViewFile::new().descriptor());
        assert_eq!(WriteFile::default().descriptor(), WriteFile::new().descriptor());
        assert_eq!(ListDirectory::default().descriptor(), ListDirectory::new().descriptor());
        assert_eq!(ExecuteBash::default().timeout, SHELL_TIMEOUT);
        assert_eq!(CurrentTime::default().descriptor().name, "current_time");
    }
}
