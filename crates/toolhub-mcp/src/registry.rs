//! Unified tool registry across every connected server
//!
//! Holds the name→owner index, the active-tool set and the declaration
//! cache together, so a mutation and the cache invalidation it implies
//! always happen under the same lock.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::schema::{translate_all, FunctionDeclaration};
use crate::types::McpTool;

/// Read projection of one registered tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub server: String,
}

#[derive(Debug, Clone)]
struct RegisteredTool {
    tool: McpTool,
    server: String,
}

#[derive(Debug, Default)]
struct DeclarationCache {
    /// Full translated set, regardless of enabled state
    declarations: Vec<FunctionDeclaration>,
    dirty: bool,
    builds: u64,
}

#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,

    /// Registration order, for stable listings
    order: Vec<String>,

    active: HashSet<String>,

    cache: DeclarationCache,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            cache: DeclarationCache {
                dirty: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Register a server's tools. The first registration of a name wins;
    /// later duplicates are dropped. Returns the names actually accepted,
    /// each of which starts enabled.
    pub fn register(&mut self, server: &str, tools: Vec<McpTool>) -> Vec<String> {
        let mut accepted = Vec::with_capacity(tools.len());

        for tool in tools {
            if let Some(existing) = self.tools.get(&tool.name) {
                warn!(
                    "Tool name collision: '{}' from server '{}' is already provided by '{}', ignoring",
                    tool.name, server, existing.server
                );
                continue;
            }

            let name = tool.name.clone();
            self.tools.insert(
                name.clone(),
                RegisteredTool {
                    tool,
                    server: server.to_string(),
                },
            );
            self.order.push(name.clone());
            self.active.insert(name.clone());
            debug!("Registered tool '{}' from server '{}'", name, server);
            accepted.push(name);
        }

        if !accepted.is_empty() {
            self.cache.dirty = true;
        }
        accepted
    }

    /// Drop every tool owned by `server`; returns the removed names.
    pub fn remove_server_tools(&mut self, server: &str) -> Vec<String> {
        let removed: Vec<String> = self
            .order
            .iter()
            .filter(|name| self.owner(name) == Some(server))
            .cloned()
            .collect();

        for name in &removed {
            self.tools.remove(name);
            self.active.remove(name);
        }
        self.order.retain(|name| self.tools.contains_key(name));

        if !removed.is_empty() {
            self.cache.dirty = true;
            debug!("Removed {} tools of server '{}'", removed.len(), server);
        }
        removed
    }

    /// Enable or disable a tool. Returns false when the tool is unknown.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        if !self.tools.contains_key(name) {
            warn!("Cannot toggle unknown tool '{}'", name);
            return false;
        }

        if enabled {
            self.active.insert(name.to_string());
        } else {
            self.active.remove(name);
        }
        self.cache.dirty = true;
        info!(
            "Tool '{}' {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.active.contains(name)
    }

    /// Owning server of a tool
    pub fn owner(&self, name: &str) -> Option<&str> {
        self.tools.get(name).map(|t| t.server.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|entry| ToolInfo {
                name: entry.tool.name.clone(),
                description: entry.tool.description.clone(),
                enabled: self.active.contains(&entry.tool.name),
                server: entry.server.clone(),
            })
            .collect()
    }

    /// Function declarations of the enabled tools.
    ///
    /// The translated set is rebuilt only when a mutation marked it dirty;
    /// the enabled filter is applied on every read.
    pub fn active_declarations(&mut self) -> Vec<FunctionDeclaration> {
        if self.cache.dirty {
            let tools = self
                .order
                .iter()
                .filter_map(|name| self.tools.get(name))
                .map(|entry| &entry.tool);
            self.cache.declarations = translate_all(tools);
            self.cache.dirty = false;
            self.cache.builds += 1;
            info!(
                "Rebuilt function declarations: {} of {} tools translated",
                self.cache.declarations.len(),
                self.tools.len()
            );
        }

        self.cache
            .declarations
            .iter()
            .filter(|d| self.active.contains(&d.name))
            .cloned()
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.cache.dirty
    }

    /// How many times the declaration cache has been rebuilt
    pub fn declaration_builds(&self) -> u64 {
        self.cache.builds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> McpTool {
        McpTool {
            name: name.to_string(),
            description: format!("{} tool", name),
            input_schema: json!({
                "type": "object",
                "properties": {"value": {"type": "string"}}
            }),
        }
    }

    #[test]
    fn test_register_and_list() {
        let mut registry = ToolRegistry::new();
        let accepted = registry.register("fs", vec![tool("read_file"), tool("write_file")]);
        assert_eq!(accepted, vec!["read_file", "write_file"]);

        let listed = registry.list();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|t| t.enabled && t.server == "fs"));
        assert_eq!(registry.owner("write_file"), Some("fs"));
    }

    #[test]
    fn test_first_registration_wins() {
        let mut registry = ToolRegistry::new();
        registry.register("a", vec![tool("search")]);
        let accepted = registry.register("b", vec![tool("search"), tool("fetch")]);

        assert_eq!(accepted, vec!["fetch"]);
        assert_eq!(registry.owner("search"), Some("a"));
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry
                .active_declarations()
                .iter()
                .filter(|d| d.name == "search")
                .count(),
            1
        );
    }

    #[test]
    fn test_remove_server_tools() {
        let mut registry = ToolRegistry::new();
        registry.register("a", vec![tool("one"), tool("two")]);
        registry.register("b", vec![tool("three")]);

        let removed = registry.remove_server_tools("a");
        assert_eq!(removed, vec!["one", "two"]);
        assert!(!registry.contains("one"));
        assert!(!registry.is_enabled("two"));
        assert_eq!(registry.list().len(), 1);
        assert!(registry.remove_server_tools("a").is_empty());
    }

    #[test]
    fn test_toggle() {
        let mut registry = ToolRegistry::new();
        registry.register("a", vec![tool("one")]);

        assert!(registry.set_enabled("one", false));
        assert!(registry.contains("one"));
        assert!(!registry.is_enabled("one"));
        assert!(!registry.set_enabled("missing", true));
    }

    #[test]
    fn test_declaration_cache_coherence() {
        let mut registry = ToolRegistry::new();
        registry.register("a", vec![tool("one"), tool("two")]);

        assert_eq!(registry.active_declarations().len(), 2);
        assert_eq!(registry.active_declarations().len(), 2);
        assert_eq!(registry.declaration_builds(), 1);

        registry.set_enabled("two", false);
        assert!(registry.is_dirty());
        let names: Vec<String> = registry
            .active_declarations()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["one"]);

        registry.register("b", vec![tool("three")]);
        assert_eq!(registry.active_declarations().len(), 2);

        registry.remove_server_tools("a");
        let names: Vec<String> = registry
            .active_declarations()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["three"]);
        assert_eq!(registry.declaration_builds(), 4);
    }
}
