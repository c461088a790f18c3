//! Server connection lifecycle
//!
//! `establish` runs the three suspension points of a connect (transport
//! open, session initialize, tool listing), each under its own deadline.
//! A session that was opened is always released again if a later step
//! fails, so a failed connect never leaves a process behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use toolhub_config::TimeoutSettings;
use toolhub_core::{Result, ToolhubError};
use tracing::{debug, info, warn};

use crate::config::LaunchSpec;
use crate::session::{Connector, ToolSession};
use crate::types::{InitializeResult, McpTool, ServerInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Degraded,
    Closed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Degraded => "degraded",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// One supervised tool server: its launch spec, open session and the tools
/// it contributed to the registry.
pub struct ServerConnection {
    pub id: String,

    /// Distinguishes this connection from earlier ones under the same id
    pub generation: u64,

    pub launch: LaunchSpec,

    pub session: Arc<dyn ToolSession>,

    pub status: ConnectionStatus,

    /// Registered tool names, in server order
    pub tools: Vec<String>,

    /// Configuration blob as supplied by the caller
    pub config: Value,

    pub server_info: Option<ServerInfo>,

    pub connected_at: DateTime<Utc>,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("status", &self.status)
            .field("tools", &self.tools)
            .finish()
    }
}

impl ServerConnection {
    /// Flip `connected` to `degraded`. Returns whether the status changed.
    pub fn mark_degraded(&mut self) -> bool {
        if self.status == ConnectionStatus::Connected {
            self.status = ConnectionStatus::Degraded;
            warn!("MCP server '{}' marked degraded", self.id);
            true
        } else {
            false
        }
    }

    /// Flip `degraded` back to `connected`. Returns whether the status changed.
    pub fn mark_recovered(&mut self) -> bool {
        if self.status == ConnectionStatus::Degraded {
            self.status = ConnectionStatus::Connected;
            info!("MCP server '{}' recovered", self.id);
            true
        } else {
            false
        }
    }
}

/// A session that completed its handshake and tool enumeration
pub struct Established {
    pub session: Arc<dyn ToolSession>,
    pub init: InitializeResult,
    pub tools: Vec<McpTool>,
}

/// Open, initialize and enumerate a server, rolling back on any failure.
pub async fn establish(
    server: &str,
    spec: &LaunchSpec,
    connector: &dyn Connector,
    timeouts: &TimeoutSettings,
) -> Result<Established> {
    let session = bounded(
        server,
        "transport open",
        timeouts.spawn(),
        connector.open(server, spec),
    )
    .await?;

    let handshake = async {
        let init = bounded(
            server,
            "session initialize",
            timeouts.handshake(),
            session.initialize(),
        )
        .await?;
        let tools = bounded(
            server,
            "tool listing",
            timeouts.list_tools(),
            session.list_tools(),
        )
        .await?;
        Ok::<_, ToolhubError>((init, tools))
    };

    match handshake.await {
        Ok((init, tools)) => Ok(Established {
            session,
            init,
            tools,
        }),
        Err(e) => {
            debug!("Rolling back partial connection to '{}'", server);
            if let Err(release_err) = release(server, session.as_ref(), timeouts.disconnect()).await {
                warn!("{}", release_err);
            }
            Err(e)
        }
    }
}

/// Close a session within `limit`
pub async fn release(server: &str, session: &dyn ToolSession, limit: Duration) -> Result<()> {
    match tokio::time::timeout(limit, session.close()).await {
        Ok(result) => result,
        Err(_) => Err(ToolhubError::DisconnectTimeout {
            server: server.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

/// Run one connect step under a deadline, classifying its failure.
async fn bounded<T, F>(server: &str, stage: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e @ ToolhubError::ConnectTimeout { .. }))
        | Ok(Err(e @ ToolhubError::HandshakeFailure { .. })) => Err(e),
        Ok(Err(e)) => Err(ToolhubError::HandshakeFailure {
            server: server.to_string(),
            reason: format!("{} failed: {}", stage, e),
        }),
        Err(_) => {
            warn!(
                "Timed out after {:?} during {} for server '{}'",
                limit, stage, server
            );
            Err(ToolhubError::ConnectTimeout {
                server: server.to_string(),
                stage: stage.to_string(),
                secs: limit.as_secs(),
            })
        }
    }
}
