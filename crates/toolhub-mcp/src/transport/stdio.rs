//! Stdio transport implementation for process-based MCP servers

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use toolhub_core::{Result, ToolhubError};
use tracing::{debug, error, info, warn};

use super::{Transport, RESPONSE_CHANNEL_CAPACITY};
use crate::config::LaunchSpec;
use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Stdio transport for process-based MCP servers
pub struct StdioTransport {
    /// Server identifier, for logs
    server: String,

    /// Child process handle; killed on drop if still present
    process: Mutex<Option<Child>>,

    /// Process stdin for sending data
    stdin: Mutex<Option<ChildStdin>>,

    command_line: String,

    connected: Arc<AtomicBool>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("server", &self.server)
            .field("command", &self.command_line)
            .finish()
    }
}

impl StdioTransport {
    /// Spawn the server process and start its reader tasks.
    ///
    /// Returns the transport and the channel on which parsed responses
    /// from the server's stdout arrive.
    pub fn spawn(
        server: &str,
        spec: &LaunchSpec,
    ) -> Result<(Self, mpsc::Receiver<JsonRpcResponse>)> {
        info!("Starting MCP server '{}' via stdio: {}", server, spec.command_line());

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(env) = &spec.env {
            cmd.envs(env);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ToolhubError::Protocol(format!(
                "Failed to spawn MCP server process '{}': {}",
                spec.command, e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolhubError::Protocol("Failed to get process stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolhubError::Protocol("Failed to get process stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ToolhubError::Protocol("Failed to get process stderr".into()))?;

        let (response_tx, response_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(read_stdout(
            server.to_string(),
            stdout,
            response_tx,
            connected.clone(),
        ));

        tokio::spawn(read_stderr(server.to_string(), stderr));

        Ok((
            Self {
                server: server.to_string(),
                process: Mutex::new(Some(child)),
                stdin: Mutex::new(Some(stdin)),
                command_line: spec.command_line(),
                connected,
            },
            response_rx,
        ))
    }

    async fn write_line<T: Serialize>(&self, message: &T) -> Result<()> {
        let mut json = serde_json::to_string(message)?;
        json.push('\n');

        let mut stdin_guard = self.stdin.lock().await;
        let stdin = stdin_guard
            .as_mut()
            .ok_or_else(|| ToolhubError::Protocol("Process stdin not available".into()))?;

        debug!("Sending to MCP server '{}': {}", self.server, json.trim_end());
        stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| ToolhubError::Protocol(format!("Failed to write to stdin: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| ToolhubError::Protocol(format!("Failed to flush stdin: {}", e)))?;
        Ok(())
    }
}

/// Log server stderr. Only EOF or an I/O error ends it; undecodable bytes
/// are shown lossily.
async fn read_stderr(server: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    debug!("MCP server '{}' stderr: {}", server, trimmed);
                }
            }
            Err(e) => {
                error!("Error reading stderr of MCP server '{}': {}", server, e);
                break;
            }
        }
    }
}

/// Parse stdout line by line and forward responses. Messages carrying a
/// `method` are server-initiated requests or notifications and are only logged.
/// Lines that are not UTF-8 or not JSON are skipped; only EOF or an I/O
/// error ends the session.
async fn read_stdout(
    server: String,
    stdout: ChildStdout,
    responses: mpsc::Sender<JsonRpcResponse>,
    connected: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                info!("MCP server '{}' stdout closed", server);
                break;
            }
            Ok(_) => {
                let line = match std::str::from_utf8(&buf) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Skipping non-UTF-8 output from MCP server '{}': {}", server, e);
                        continue;
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                debug!("Received from MCP server '{}': {}", server, trimmed);

                let message: Value = match serde_json::from_str(trimmed) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!("Non-JSON output from MCP server '{}': {}", server, e);
                        continue;
                    }
                };

                if message.get("method").is_some() {
                    debug!("Ignoring server-initiated message from '{}'", server);
                    continue;
                }

                match serde_json::from_value::<JsonRpcResponse>(message) {
                    Ok(response) => {
                        if responses.send(response).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Malformed JSON-RPC response from '{}': {}", server, e),
                }
            }
            Err(e) => {
                error!("Error reading stdout of MCP server '{}': {}", server, e);
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_request(&self, request: &JsonRpcRequest) -> Result<()> {
        self.write_line(request).await
    }

    async fn send_notification(&self, notification: &JsonRpcNotification) -> Result<()> {
        self.write_line(notification).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        info!("Closing stdio transport for '{}'", self.server);

        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(e) = stdin.shutdown().await {
                debug!("Error shutting down stdin of '{}': {}", self.server, e);
            }
        }

        if let Some(mut child) = self.process.lock().await.take() {
            match child.kill().await {
                Ok(()) => info!("MCP server process '{}' terminated", self.server),
                Err(e) => error!("Failed to kill MCP server process '{}': {}", self.server, e),
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
