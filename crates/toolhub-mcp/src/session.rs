//! Session seams: the typed client API a connection talks through, and the
//! connector that opens one from a launch spec.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use toolhub_core::Result;

use crate::client::McpClient;
use crate::config::LaunchSpec;
use crate::types::{InitializeResult, McpTool, ToolCallResult};

/// An opened protocol session with one tool server.
///
/// Methods take `&self` so a session can be shared between a tool call and
/// a concurrent health probe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Perform the protocol handshake
    async fn initialize(&self) -> Result<InitializeResult>;

    /// Enumerate the server's tools
    async fn list_tools(&self) -> Result<Vec<McpTool>>;

    /// Invoke one tool
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult>;

    /// Release the process, pipes and session; fails outstanding requests
    async fn close(&self) -> Result<()>;
}

/// Opens sessions. The manager only ever launches servers through this.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, server: &str, spec: &LaunchSpec) -> Result<Arc<dyn ToolSession>>;
}

/// Spawns the server as a child process and speaks JSON-RPC over its stdio
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioConnector;

#[async_trait]
impl Connector for StdioConnector {
    async fn open(&self, server: &str, spec: &LaunchSpec) -> Result<Arc<dyn ToolSession>> {
        let client = McpClient::spawn(server, spec)?;
        Ok(Arc::new(client))
    }
}
