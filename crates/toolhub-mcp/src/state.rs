//! State shared between the manager, the execution engine and the health monitor

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::connection::ServerConnection;
use crate::registry::ToolRegistry;

/// Connections and registry behind one lock: writers are serialized, and a
/// reader never sees a registry that disagrees with the connection table.
#[derive(Debug)]
pub struct HubState {
    pub connections: HashMap<String, ServerConnection>,
    pub registry: ToolRegistry,
}

pub type SharedState = Arc<RwLock<HubState>>;

impl HubState {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            registry: ToolRegistry::new(),
        }
    }

    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Degrade a connection, but only the one a result was obtained from.
    /// A reconnect under the same id carries a new generation.
    pub fn mark_degraded(&mut self, server: &str, generation: u64) -> bool {
        match self.connections.get_mut(server) {
            Some(connection) if connection.generation == generation => connection.mark_degraded(),
            _ => false,
        }
    }

    pub fn mark_recovered(&mut self, server: &str, generation: u64) -> bool {
        match self.connections.get_mut(server) {
            Some(connection) if connection.generation == generation => {
                connection.mark_recovered()
            }
            _ => false,
        }
    }
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}
