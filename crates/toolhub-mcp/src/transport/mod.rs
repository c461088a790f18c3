//! Transport layer for MCP communication
//!
//! A transport only moves framed JSON-RPC messages. Outgoing messages go
//! through the `Transport` trait; incoming responses are delivered on the
//! channel handed out when the transport is created, and the client
//! correlates them with outstanding requests.

use async_trait::async_trait;
use std::fmt::Debug;
use toolhub_core::Result;

use crate::types::{JsonRpcNotification, JsonRpcRequest};

pub mod stdio;

pub use stdio::StdioTransport;

/// Capacity of the incoming-response channel of a transport
pub(crate) const RESPONSE_CHANNEL_CAPACITY: usize = 100;

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Send a JSON-RPC request
    async fn send_request(&self, request: &JsonRpcRequest) -> Result<()>;

    /// Send a JSON-RPC notification (no response expected)
    async fn send_notification(&self, notification: &JsonRpcNotification) -> Result<()>;

    /// Whether the peer is still reachable
    fn is_connected(&self) -> bool;

    /// Close the transport and release the underlying resources
    async fn close(&self) -> Result<()>;
}
