//! Stdio transport for MCP servers running as local processes.

use std::process::Stdio;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::mcp::config::StdioEndpoint;
use crate::mcp::transports::{is_response_to, McpTransport, TransportType};

struct StdioChannel {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Newline-delimited JSON-RPC over a child process's stdin/stdout.
///
/// The child is killed when the transport is closed or dropped. Its stderr
/// is forwarded to the debug log.
pub struct StdioTransport {
    identifier: String,
    channel: Mutex<StdioChannel>,
    process: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Spawn the server process and wire up its pipes.
    pub fn spawn(endpoint: &StdioEndpoint) -> anyhow::Result<Self> {
        let identifier = if endpoint.args.is_empty() {
            format!("stdio:{}", endpoint.command)
        } else {
            format!("stdio:{}:{}", endpoint.command, endpoint.args.join(":"))
        };

        let mut cmd = Command::new(&endpoint.command);
        cmd.args(&endpoint.args)
            .envs(&endpoint.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to start MCP server process '{}'", endpoint.command))?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("child stdin unavailable"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("child stdout unavailable"))?;
        if let Some(stderr) = child.stderr.take() {
            let tag = identifier.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("[{}] {}", tag, line);
                }
            });
        }

        log::info!("Stdio transport started: {}", identifier);

        Ok(Self {
            identifier,
            channel: Mutex::new(StdioChannel {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            process: Mutex::new(Some(child)),
        })
    }

    async fn write_line(stdin: &mut ChildStdin, message: &Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
    }

    fn server_identifier(&self) -> String {
        self.identifier.clone()
    }

    async fn request(&self, id: u64, message: Value) -> anyhow::Result<Value> {
        let mut channel = self.channel.lock().await;
        Self::write_line(&mut channel.stdin, &message).await?;

        loop {
            let line = channel
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| anyhow!("{} closed its stdout", self.identifier))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    log::debug!("[{}] ignoring non-JSON line: {}", self.identifier, e);
                    continue;
                }
            };
            if is_response_to(&parsed, id) {
                return Ok(parsed);
            }
            log::trace!("[{}] skipping message while waiting for id {}", self.identifier, id);
        }
    }

    async fn notify(&self, message: Value) -> anyhow::Result<()> {
        let mut channel = self.channel.lock().await;
        Self::write_line(&mut channel.stdin, &message).await
    }

    async fn close(&self) -> anyhow::Result<()> {
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
            log::info!("Stdio transport stopped: {}", self.identifier);
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sh(script: &str) -> StdioEndpoint {
        StdioEndpoint {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_request_skips_notifications_and_foreign_ids() {
        let transport = StdioTransport::spawn(&sh(
            r#"read line; echo '{"jsonrpc":"2.0","method":"notifications/progress"}'; echo 'not json'; echo '{"jsonrpc":"2.0","id":9,"result":{}}'; echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'"#,
        ))
        .unwrap();

        let response = transport
            .request(1, json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .await
            .unwrap();
        assert_eq!(response["result"]["ok"], true);
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_request_fails_when_process_exits() {
        let transport = StdioTransport::spawn(&sh("read line; exit 0")).unwrap();
        let err = transport
            .request(1, json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("closed its stdout"));
    }

    #[test]
    fn test_spawn_missing_binary_fails() {
        let endpoint = StdioEndpoint {
            command: "/nonexistent/mcp-server-binary".to_string(),
            args: vec![],
            env: BTreeMap::new(),
        };
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(async { StdioTransport::spawn(&endpoint) });
        assert!(result.is_err());
    }
}
