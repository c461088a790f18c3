//! MCP Manager for handling multiple MCP servers
//!
//! The façade callers talk to: connects and disconnects servers, keeps the
//! tool registry in step with them, executes tools and runs the health
//! monitor.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use toolhub_config::{HubConfig, McpServersConfig, MonitorSettings, TimeoutSettings};
use toolhub_core::{Result, ToolCallOutcome, ToolhubError};
use tracing::{debug, error, info, warn};

use crate::config::LaunchSpec;
use crate::connection::{establish, release, ConnectionStatus, ServerConnection};
use crate::executor;
use crate::health::{run_health_checks, spawn_monitor};
use crate::registry::ToolInfo;
use crate::schema::FunctionDeclaration;
use crate::session::{Connector, StdioConnector};
use crate::state::{HubState, SharedState};
use crate::types::ServerInfo;

/// Status projection of one server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub status: ConnectionStatus,
    pub tools: Vec<String>,
    pub config: Value,
    /// Command line the server was launched with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
}

/// Outcome of `connect_all`, per server
#[derive(Debug, Default, Clone, Serialize)]
pub struct ConnectReport {
    /// Server name to the tools it contributed
    pub connected: BTreeMap<String, Vec<String>>,
    /// Server name to the failure message
    pub failed: BTreeMap<String, String>,
}

impl ConnectReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

type Reservations = Mutex<HashMap<String, Value>>;

/// Claim on an identifier while its connect is in flight
struct Reservation<'a> {
    reservations: &'a Reservations,
    id: String,
    /// Cleanup epoch the connect started in
    epoch: u64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.reservations.lock().remove(&self.id);
    }
}

/// MCP Manager for handling multiple MCP servers
pub struct McpManager {
    state: SharedState,

    connector: Arc<dyn Connector>,

    timeouts: TimeoutSettings,

    monitor_settings: MonitorSettings,

    /// Identifiers with a connect in flight, with their config blobs
    reservations: Reservations,

    monitor: Mutex<Option<JoinHandle<()>>>,

    generation: AtomicU64,

    /// Bumped by every `cleanup`; connects started before it are discarded
    epoch: AtomicU64,
}

impl McpManager {
    /// Create a manager that launches servers as stdio child processes
    pub fn new(config: &HubConfig) -> Self {
        Self::with_connector(config, Arc::new(StdioConnector))
    }

    pub fn with_connector(config: &HubConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            state: HubState::shared(),
            connector,
            timeouts: config.timeouts.clone(),
            monitor_settings: config.monitor.clone(),
            reservations: Mutex::new(HashMap::new()),
            monitor: Mutex::new(None),
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn timeouts(&self) -> &TimeoutSettings {
        &self.timeouts
    }

    async fn reserve(&self, id: &str, config: &Value) -> Result<Reservation<'_>> {
        let state = self.state.read().await;
        let mut reservations = self.reservations.lock();
        if state.connections.contains_key(id) || reservations.contains_key(id) {
            warn!("MCP server '{}' is already connected", id);
            return Err(ToolhubError::DuplicateIdentifier(id.to_string()));
        }
        reservations.insert(id.to_string(), config.clone());
        Ok(Reservation {
            reservations: &self.reservations,
            id: id.to_string(),
            epoch: self.epoch.load(Ordering::SeqCst),
        })
    }

    /// Connect a server and register its tools. Returns the accepted tool
    /// names; colliding names are dropped.
    pub async fn connect(&self, id: &str, spec: LaunchSpec) -> Result<Vec<String>> {
        let config = serde_json::to_value(&spec)?;
        let reservation = self.reserve(id, &config).await?;
        spec.validate(id)?;
        self.complete_connect(reservation, spec, config).await
    }

    /// Connect from a raw `mcpServers` entry, keeping the entry verbatim
    /// as the connection's config.
    pub async fn connect_from_config(&self, id: &str, config: Value) -> Result<Vec<String>> {
        let reservation = self.reserve(id, &config).await?;
        let spec = LaunchSpec::from_config(id, &config)?;
        self.complete_connect(reservation, spec, config).await
    }

    async fn complete_connect(
        &self,
        reservation: Reservation<'_>,
        spec: LaunchSpec,
        config: Value,
    ) -> Result<Vec<String>> {
        let id = reservation.id.clone();
        info!("Connecting to MCP server '{}': {}", id, spec.command_line());

        let established =
            match establish(&id, &spec, self.connector.as_ref(), &self.timeouts).await {
                Ok(established) => established,
                Err(e) => {
                    error!("Failed to connect MCP server '{}': {}", id, e);
                    return Err(e);
                }
            };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let offered = established.tools.len();

        let mut state = self.state.write().await;
        if self.epoch.load(Ordering::SeqCst) != reservation.epoch {
            drop(state);
            warn!("Manager was cleaned up while '{}' was connecting, releasing it", id);
            if let Err(e) =
                release(&id, established.session.as_ref(), self.timeouts.disconnect()).await
            {
                warn!("{}", e);
            }
            return Err(ToolhubError::HandshakeFailure {
                server: id,
                reason: "manager was cleaned up during connect".to_string(),
            });
        }
        let accepted = state.registry.register(&id, established.tools);
        state.connections.insert(
            id.clone(),
            ServerConnection {
                id: id.clone(),
                generation,
                launch: spec,
                session: established.session,
                status: ConnectionStatus::Connected,
                tools: accepted.clone(),
                config,
                server_info: established.init.server_info,
                connected_at: Utc::now(),
            },
        );
        drop(state);
        drop(reservation);

        info!(
            "MCP server '{}' connected with {} tools ({} offered)",
            id,
            accepted.len(),
            offered
        );
        Ok(accepted)
    }

    /// Connect every enabled server of a document, one after another.
    /// A failing server is recorded in the report and the rest continue.
    pub async fn connect_all(&self, config: &McpServersConfig) -> ConnectReport {
        let mut report = ConnectReport::default();
        let servers = config.enabled_servers();
        if servers.is_empty() {
            info!("No enabled MCP servers to connect");
            return report;
        }

        info!("Connecting {} MCP servers", servers.len());
        for (name, entry) in servers {
            match self.connect_from_config(name, entry.clone()).await {
                Ok(tools) => {
                    report.connected.insert(name.to_string(), tools);
                }
                Err(e) => {
                    report.failed.insert(name.to_string(), e.to_string());
                }
            }
        }

        info!(
            "MCP server startup complete: {} connected, {} failed",
            report.connected.len(),
            report.failed.len()
        );
        report
    }

    /// Disconnect every server the document no longer lists.
    pub async fn sync_with_config(&self, config: &McpServersConfig) -> Vec<String> {
        let stale: Vec<String> = {
            let state = self.state.read().await;
            let mut ids: Vec<String> = state
                .connections
                .keys()
                .filter(|id| !config.contains(id))
                .cloned()
                .collect();
            ids.sort();
            ids
        };

        let mut removed = Vec::with_capacity(stale.len());
        for id in stale {
            if self.disconnect(&id).await {
                removed.push(id);
            }
        }
        removed
    }

    /// Disconnect a server. Returns false if it was not connected.
    pub async fn disconnect(&self, id: &str) -> bool {
        let mut connection = {
            let mut state = self.state.write().await;
            let Some(connection) = state.connections.remove(id) else {
                warn!("MCP server '{}' not found", id);
                return false;
            };
            state.registry.remove_server_tools(id);
            connection
        };
        connection.status = ConnectionStatus::Closed;

        info!("Disconnecting MCP server '{}'", id);
        if let Err(e) = release(id, connection.session.as_ref(), self.timeouts.disconnect()).await {
            warn!("{}", e);
        }
        info!("MCP server '{}' disconnected", id);
        true
    }

    /// Enable or disable a tool; unknown names are ignored with a warning.
    pub async fn toggle_tool(&self, name: &str, enabled: bool) -> bool {
        self.state.write().await.registry.set_enabled(name, enabled)
    }

    pub async fn execute(&self, tool: &str, arguments: Value) -> ToolCallOutcome {
        executor::execute(&self.state, tool, arguments, &self.timeouts).await
    }

    pub async fn list_tools(&self) -> Vec<ToolInfo> {
        self.state.read().await.registry.list()
    }

    pub async fn server_status(&self) -> BTreeMap<String, ServerStatus> {
        let state = self.state.read().await;
        let mut status: BTreeMap<String, ServerStatus> = state
            .connections
            .values()
            .map(|c| {
                (
                    c.id.clone(),
                    ServerStatus {
                        status: c.status,
                        tools: c.tools.clone(),
                        config: c.config.clone(),
                        command: Some(c.launch.command_line()),
                        connected_at: Some(c.connected_at),
                        server_info: c.server_info.clone(),
                    },
                )
            })
            .collect();

        for (id, config) in self.reservations.lock().iter() {
            status.entry(id.clone()).or_insert_with(|| ServerStatus {
                status: ConnectionStatus::Connecting,
                tools: Vec::new(),
                config: config.clone(),
                command: None,
                connected_at: None,
                server_info: None,
            });
        }
        status
    }

    /// Function declarations of the enabled tools, from the cache
    pub async fn active_declarations(&self) -> Vec<FunctionDeclaration> {
        self.state.write().await.registry.active_declarations()
    }

    /// Run one health pass now
    pub async fn check_health(&self) -> BTreeMap<String, bool> {
        run_health_checks(&self.state, self.monitor_settings.probe_timeout()).await
    }

    /// Start the background health monitor. Returns false if it is already running.
    pub fn start_monitoring(&self) -> bool {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Health monitor already running");
            return false;
        }
        *monitor = Some(spawn_monitor(
            self.state.clone(),
            self.monitor_settings.clone(),
        ));
        true
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn stop_monitoring(&self) {
        let handle = self.monitor.lock().take();
        let Some(handle) = handle else {
            return;
        };
        handle.abort();
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => debug!("Health monitor stopped"),
            Err(e) => warn!("Health monitor ended abnormally: {}", e),
        }
    }

    /// Stop monitoring and disconnect every server. Connects still in
    /// flight are released when they finish. Safe to call repeatedly.
    pub async fn cleanup(&self) {
        self.stop_monitoring().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let ids: Vec<String> = self.state.read().await.connections.keys().cloned().collect();
        if ids.is_empty() {
            return;
        }
        info!("Disconnecting all MCP servers");
        for id in ids {
            self.disconnect(&id).await;
        }
    }
}

impl Drop for McpManager {
    fn drop(&mut self) {
        // Sessions kill their processes on drop; only the monitor task
        // would outlive us.
        if let Some(handle) = self.monitor.get_mut().take() {
            handle.abort();
        }
        debug!("McpManager dropped");
    }
}
