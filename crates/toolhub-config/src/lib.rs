use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use toolhub_core::{Result, ToolhubError};
use tracing::info;

pub mod env_substitution;
pub mod servers;

pub use servers::{McpServersConfig, ServerConfigStore, ServerEntry};

/// Top-level hub settings, loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_servers_file")]
    pub servers_file: PathBuf,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
}

/// Deadlines applied to every suspension point of a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_spawn_secs")]
    pub spawn_secs: u64,
    #[serde(default = "default_handshake_secs")]
    pub handshake_secs: u64,
    #[serde(default = "default_list_tools_secs")]
    pub list_tools_secs: u64,
    #[serde(default = "default_call_secs")]
    pub call_secs: u64,
    #[serde(default = "default_disconnect_secs")]
    pub disconnect_secs: u64,
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

/// Background health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_monitor_enabled")]
    pub enabled: bool,
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl HubConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ToolhubError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        info!("Loaded hub settings from {}", path.display());
        Self::from_yaml_str(&content)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_yaml(path)
        } else {
            info!("No hub settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config: HubConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ToolhubError::ConfigError(format!("Failed to parse YAML: {}", e)))?;

        config.expand_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve `${VAR}` placeholders in path settings
    fn expand_env_vars(&mut self) -> Result<()> {
        if let Some(path) = self.servers_file.to_str() {
            self.servers_file = PathBuf::from(env_substitution::substitute_str(path)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.timeouts;
        let durations = [
            ("timeouts.spawn_secs", t.spawn_secs),
            ("timeouts.handshake_secs", t.handshake_secs),
            ("timeouts.list_tools_secs", t.list_tools_secs),
            ("timeouts.call_secs", t.call_secs),
            ("timeouts.disconnect_secs", t.disconnect_secs),
            ("timeouts.progress_interval_secs", t.progress_interval_secs),
            ("monitor.interval_secs", self.monitor.interval_secs),
            ("monitor.probe_timeout_secs", self.monitor.probe_timeout_secs),
        ];
        for (field, secs) in durations {
            if secs == 0 {
                return Err(ToolhubError::ConfigError(format!(
                    "{} must be greater than zero",
                    field
                )));
            }
        }
        if self.servers_file.as_os_str().is_empty() {
            return Err(ToolhubError::ConfigError("servers_file cannot be empty".into()));
        }
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        home_dir().join(".toolhub").join("hub.yaml")
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            servers_file: default_servers_file(),
            timeouts: TimeoutSettings::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

impl TimeoutSettings {
    pub fn spawn(&self) -> Duration {
        Duration::from_secs(self.spawn_secs)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    pub fn list_tools(&self) -> Duration {
        Duration::from_secs(self.list_tools_secs)
    }

    pub fn call(&self) -> Duration {
        Duration::from_secs(self.call_secs)
    }

    pub fn disconnect(&self) -> Duration {
        Duration::from_secs(self.disconnect_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            spawn_secs: default_spawn_secs(),
            handshake_secs: default_handshake_secs(),
            list_tools_secs: default_list_tools_secs(),
            call_secs: default_call_secs(),
            disconnect_secs: default_disconnect_secs(),
            progress_interval_secs: default_progress_interval_secs(),
        }
    }
}

impl MonitorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: default_monitor_enabled(),
            interval_secs: default_monitor_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

fn default_spawn_secs() -> u64 { 30 }
fn default_handshake_secs() -> u64 { 30 }
fn default_list_tools_secs() -> u64 { 10 }
fn default_call_secs() -> u64 { 30 }
fn default_disconnect_secs() -> u64 { 10 }
fn default_progress_interval_secs() -> u64 { 5 }
fn default_monitor_enabled() -> bool { true }
fn default_monitor_interval_secs() -> u64 { 30 }
fn default_probe_timeout_secs() -> u64 { 5 }

fn home_dir() -> PathBuf {
    env::var("HOME_DIR")
        .unwrap_or_else(|_| env::var("HOME").unwrap_or_else(|_| ".".to_string()))
        .into()
}

fn default_servers_file() -> PathBuf {
    home_dir().join(".toolhub").join("mcp_servers.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
servers_file: /tmp/servers.json
timeouts:
  call_secs: 45
  list_tools_secs: 5
monitor:
  enabled: false
  interval_secs: 60
"#;

        let config = HubConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.servers_file, PathBuf::from("/tmp/servers.json"));
        assert_eq!(config.timeouts.call(), Duration::from_secs(45));
        assert_eq!(config.timeouts.list_tools(), Duration::from_secs(5));
        assert_eq!(config.timeouts.handshake(), Duration::from_secs(30));
        assert!(!config.monitor.enabled);
        assert_eq!(config.monitor.interval(), Duration::from_secs(60));
        assert_eq!(config.monitor.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_defaults_match_recommended_deadlines() {
        let config = HubConfig::default();
        assert_eq!(config.timeouts.spawn(), Duration::from_secs(30));
        assert_eq!(config.timeouts.handshake(), Duration::from_secs(30));
        assert_eq!(config.timeouts.list_tools(), Duration::from_secs(10));
        assert_eq!(config.timeouts.call(), Duration::from_secs(30));
        assert_eq!(config.timeouts.disconnect(), Duration::from_secs(10));
        assert_eq!(config.timeouts.progress_interval(), Duration::from_secs(5));
        assert_eq!(config.monitor.interval(), Duration::from_secs(30));
        assert!(config.monitor.enabled);
    }

    #[test]
    fn test_servers_file_env_expansion() {
        std::env::set_var("TOOLHUB_TEST_STATE_DIR", "/var/lib/toolhub");
        let config =
            HubConfig::from_yaml_str("servers_file: ${TOOLHUB_TEST_STATE_DIR}/servers.json\n")
                .unwrap();
        assert_eq!(
            config.servers_file,
            PathBuf::from("/var/lib/toolhub/servers.json")
        );
        std::env::remove_var("TOOLHUB_TEST_STATE_DIR");
    }

    #[test]
    fn test_validation() {
        let yaml = r#"
timeouts:
  call_secs: 0
"#;

        let result = HubConfig::from_yaml_str(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("timeouts.call_secs"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig::load_or_default(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.timeouts.call_secs, 30);
    }
}
