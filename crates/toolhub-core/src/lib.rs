use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolhubError {
    #[error("Server '{0}' is already connected")]
    DuplicateIdentifier(String),

    #[error("Server config for '{0}' must have a 'command' field")]
    MissingCommand(String),

    #[error("Timed out after {secs}s during {stage} for server '{server}'")]
    ConnectTimeout {
        server: String,
        stage: String,
        secs: u64,
    },

    #[error("Handshake with server '{server}' failed: {reason}")]
    HandshakeFailure { server: String, reason: String },

    #[error("Tool '{0}' not found or its server is disconnected")]
    UnknownTool(String),

    #[error("Tool '{0}' is currently disabled")]
    ToolDisabled(String),

    #[error("Internal error finding server for tool '{0}'")]
    RoutingError(String),

    #[error("Timeout executing tool '{tool}' ({secs}s timeout exceeded)")]
    ExecutionTimeout { tool: String, secs: u64 },

    #[error("Error executing tool '{tool}': {message}")]
    ExecutionError { tool: String, message: String },

    #[error("Timeout closing resources for server '{server}' after {secs}s")]
    DisconnectTimeout { server: String, secs: u64 },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ToolhubError>;

/// Status tag of a tool invocation. Callers branch on this, never on error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Success,
    UnknownTool,
    ToolDisabled,
    RoutingError,
    Timeout,
    Error,
}

impl std::fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ToolCallStatus::Success => "Success",
            ToolCallStatus::UnknownTool => "UnknownTool",
            ToolCallStatus::ToolDisabled => "ToolDisabled",
            ToolCallStatus::RoutingError => "RoutingError",
            ToolCallStatus::Timeout => "Timeout",
            ToolCallStatus::Error => "Error",
        };
        f.write_str(label)
    }
}

/// Structured result of `execute`: a status tag, the rendered content on
/// success, and a human-readable detail on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallOutcome {
    pub tool: String,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallOutcome {
    pub fn success(tool: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            status: ToolCallStatus::Success,
            content: Some(content.into()),
            error: None,
        }
    }

    /// Build a failed outcome, deriving the status tag from the error.
    pub fn failure(tool: impl Into<String>, error: &ToolhubError) -> Self {
        let status = match error {
            ToolhubError::UnknownTool(_) => ToolCallStatus::UnknownTool,
            ToolhubError::ToolDisabled(_) => ToolCallStatus::ToolDisabled,
            ToolhubError::RoutingError(_) => ToolCallStatus::RoutingError,
            ToolhubError::ExecutionTimeout { .. } => ToolCallStatus::Timeout,
            _ => ToolCallStatus::Error,
        };
        Self {
            tool: tool.into(),
            status,
            content: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolCallStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_maps_status_tags() {
        let cases = [
            (ToolhubError::UnknownTool("x".into()), ToolCallStatus::UnknownTool),
            (ToolhubError::ToolDisabled("x".into()), ToolCallStatus::ToolDisabled),
            (ToolhubError::RoutingError("x".into()), ToolCallStatus::RoutingError),
            (
                ToolhubError::ExecutionTimeout { tool: "x".into(), secs: 30 },
                ToolCallStatus::Timeout,
            ),
            (
                ToolhubError::ExecutionError { tool: "x".into(), message: "boom".into() },
                ToolCallStatus::Error,
            ),
        ];

        for (error, expected) in cases {
            let outcome = ToolCallOutcome::failure("x", &error);
            assert_eq!(outcome.status, expected);
            assert!(outcome.content.is_none());
            assert_eq!(outcome.error.as_deref(), Some(error.to_string().as_str()));
        }
    }

    #[test]
    fn test_success_outcome_serialization() {
        let outcome = ToolCallOutcome::success("add", "5");
        assert!(outcome.is_success());

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["content"], "5");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_timeout_message() {
        let error = ToolhubError::ExecutionTimeout { tool: "slow".into(), secs: 30 };
        assert_eq!(error.to_string(), "Timeout executing tool 'slow' (30s timeout exceeded)");
    }
}
