//! MCP client implementation

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use toolhub_core::{Result, ToolhubError};
use tracing::{debug, info, warn};

use crate::config::LaunchSpec;
use crate::session::ToolSession;
use crate::transport::{StdioTransport, Transport};
use crate::types::{
    InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, McpTool, RequestId, ToolCallParams, ToolCallResult,
};

type PendingRequests = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;

/// MCP client for communicating with an MCP server
pub struct McpClient {
    /// Server name for identification
    name: String,

    transport: Arc<dyn Transport>,

    /// Requests awaiting a response, keyed by id
    pending: PendingRequests,

    request_id: AtomicU64,

    /// Routes incoming responses to `pending`
    dispatcher: JoinHandle<()>,

    closed: AtomicBool,
}

/// Removes a pending entry when the waiting request finishes or is dropped
struct PendingGuard {
    pending: PendingRequests,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

impl McpClient {
    /// Spawn the server process described by `spec` and attach a client to it
    pub fn spawn(name: &str, spec: &LaunchSpec) -> Result<Self> {
        let (transport, responses) = StdioTransport::spawn(name, spec)?;
        Ok(Self::new(name, Arc::new(transport), responses))
    }

    /// Attach a client to an already-open transport
    pub fn new(
        name: &str,
        transport: Arc<dyn Transport>,
        mut responses: mpsc::Receiver<JsonRpcResponse>,
    ) -> Self {
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));

        let dispatch_pending = pending.clone();
        let dispatch_name = name.to_string();
        let dispatcher = tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                let waiter = dispatch_pending.lock().remove(&response.id);
                match waiter {
                    Some(tx) => {
                        if tx.send(response).is_err() {
                            debug!("Waiter for response on '{}' went away", dispatch_name);
                        }
                    }
                    None => warn!(
                        "Received response for unknown request {} from '{}'",
                        response.id, dispatch_name
                    ),
                }
            }
            // Transport is gone: fail everything still outstanding.
            dispatch_pending.lock().clear();
            debug!("Response dispatcher for '{}' stopped", dispatch_name);
        });

        Self {
            name: name.to_string(),
            transport,
            pending,
            request_id: AtomicU64::new(1),
            dispatcher,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Send a request and wait for the correlated response.
    ///
    /// Carries no deadline of its own; dropping the future cancels the
    /// request and frees its pending slot.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ToolhubError::Protocol(format!(
                "MCP session '{}' is closed",
                self.name
            )));
        }

        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id: id.clone(),
        };

        // The reader flags disconnection before the dispatcher drains the
        // table, so an entry added after the drain is caught here.
        if !self.transport.is_connected() {
            return Err(ToolhubError::Protocol(format!(
                "MCP server '{}' is not connected",
                self.name
            )));
        }

        let request = JsonRpcRequest::new(id, method, params);
        self.transport.send_request(&request).await?;

        let response = rx.await.map_err(|_| {
            ToolhubError::Protocol(format!(
                "MCP session '{}' closed while waiting for '{}'",
                self.name, method
            ))
        })?;

        if let Some(error) = response.error {
            return Err(ToolhubError::Protocol(format!(
                "'{}' failed: {} (code {})",
                method, error.message, error.code
            )));
        }

        response.result.ok_or_else(|| {
            ToolhubError::Protocol(format!("'{}' response missing result", method))
        })
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.transport.send_notification(&notification).await
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl ToolSession for McpClient {
    async fn initialize(&self) -> Result<InitializeResult> {
        info!("Initializing MCP client: {}", self.name);

        let params = serde_json::to_value(InitializeParams::default())?;
        let result: InitializeResult =
            serde_json::from_value(self.request("initialize", Some(params)).await?)?;

        info!(
            "MCP client '{}' initialized with protocol version: {}",
            self.name, result.protocol_version
        );
        if let Some(ref server_info) = result.server_info {
            info!(
                "Connected to MCP server: {} v{}",
                server_info.name, server_info.version
            );
        }

        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        debug!("Listing tools from MCP server: {}", self.name);

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.take().map(|c| serde_json::json!({ "cursor": c }));
            let page: ListToolsResult =
                serde_json::from_value(self.request("tools/list", params).await?)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!("Discovered {} tools from MCP server '{}'", tools.len(), self.name);
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        debug!("Calling MCP tool '{}' on server '{}'", name, self.name);

        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let result = self
            .request("tools/call", Some(serde_json::to_value(params)?))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing MCP client: {}", self.name);

        // Dropping the senders wakes every waiter with a "closed" error.
        self.pending.lock().clear();
        self.transport.close().await
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.dispatcher.abort();
        debug!("Dropping MCP client: {}", self.name);
    }
}
