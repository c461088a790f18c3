//! Launch specification for a tool server process

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use toolhub_config::env_substitution::substitute_str;
use toolhub_config::ServerEntry;
use toolhub_core::{Result, ToolhubError};

/// How to start a tool server: executable, arguments, extra environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Build a launch spec from a raw `mcpServers` entry, resolving
    /// `${VAR}` placeholders in args and env values.
    pub fn from_config(server: &str, config: &Value) -> Result<Self> {
        let entry = ServerEntry::from_value(server, config)?;

        let command = match entry.command {
            Some(command) if !command.trim().is_empty() => command,
            _ => return Err(ToolhubError::MissingCommand(server.to_string())),
        };

        let args = entry
            .args
            .iter()
            .map(|arg| substitute_str(arg))
            .collect::<Result<Vec<_>>>()?;

        let env = if entry.env.is_empty() {
            None
        } else {
            let mut resolved = BTreeMap::new();
            for (key, value) in &entry.env {
                resolved.insert(key.clone(), substitute_str(value)?);
            }
            Some(resolved)
        };

        Ok(Self { command, args, env })
    }

    /// Reject a spec without an executable before anything is spawned
    pub fn validate(&self, server: &str) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(ToolhubError::MissingCommand(server.to_string()));
        }
        Ok(())
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_config() {
        std::env::set_var("TOOLHUB_LAUNCH_ROOT", "/srv/data");

        let spec = LaunchSpec::from_config(
            "filesystem",
            &json!({
                "command": "npx",
                "args": ["-y", "@modelcontextprotocol/server-filesystem", "${TOOLHUB_LAUNCH_ROOT}"],
                "env": {"LOG_LEVEL": "${TOOLHUB_LAUNCH_LEVEL:-warn}"}
            }),
        )
        .unwrap();

        assert_eq!(spec.command, "npx");
        assert_eq!(spec.args[2], "/srv/data");
        assert_eq!(spec.env.unwrap()["LOG_LEVEL"], "warn");

        std::env::remove_var("TOOLHUB_LAUNCH_ROOT");
    }

    #[test]
    fn test_missing_command() {
        let err = LaunchSpec::from_config("x", &json!({"args": ["a"]})).unwrap_err();
        assert!(matches!(err, ToolhubError::MissingCommand(ref s) if s == "x"));

        let err = LaunchSpec::from_config("y", &json!({"command": "  "})).unwrap_err();
        assert!(matches!(err, ToolhubError::MissingCommand(_)));

        assert!(LaunchSpec::default().validate("z").is_err());
        assert!(LaunchSpec::new("uvx").validate("z").is_ok());
    }

    #[test]
    fn test_command_line() {
        let spec = LaunchSpec::new("python").with_args(["-m", "mcp_server_fetch"]);
        assert_eq!(spec.command_line(), "python -m mcp_server_fetch");
    }
}
