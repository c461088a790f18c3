//! Tool execution engine

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant};
use toolhub_config::TimeoutSettings;
use toolhub_core::{Result, ToolCallOutcome, ToolhubError};
use tracing::{debug, error, info, warn};

use crate::session::ToolSession;
use crate::state::SharedState;
use crate::types::ToolCallResult;

/// Where a tool call goes, captured under the read lock
struct Route {
    server: String,
    generation: u64,
    session: Arc<dyn ToolSession>,
}

async fn resolve(state: &SharedState, tool: &str) -> Result<Route> {
    let state = state.read().await;

    if !state.registry.contains(tool) {
        return Err(ToolhubError::UnknownTool(tool.to_string()));
    }
    if !state.registry.is_enabled(tool) {
        return Err(ToolhubError::ToolDisabled(tool.to_string()));
    }

    let connection = state
        .registry
        .owner(tool)
        .and_then(|server| state.connections.get(server))
        .ok_or_else(|| ToolhubError::RoutingError(tool.to_string()))?;

    Ok(Route {
        server: connection.id.clone(),
        generation: connection.generation,
        session: connection.session.clone(),
    })
}

/// Run one call under the call deadline, logging progress while it is
/// outstanding. On timeout the call future is dropped, which cancels it.
async fn call_with_deadline(
    session: &dyn ToolSession,
    tool: &str,
    arguments: Value,
    timeouts: &TimeoutSettings,
) -> Result<ToolCallResult> {
    let started = Instant::now();
    let limit = timeouts.call();
    // interval_at panics on a zero period
    let period = timeouts.progress_interval().max(Duration::from_millis(1));

    let call = session.call_tool(tool, arguments);
    tokio::pin!(call);
    let deadline = sleep(limit);
    tokio::pin!(deadline);
    let mut progress = interval_at(started + period, period);

    loop {
        tokio::select! {
            biased;

            result = &mut call => {
                return result.map_err(|e| ToolhubError::ExecutionError {
                    tool: tool.to_string(),
                    message: e.to_string(),
                });
            }
            _ = &mut deadline => {
                return Err(ToolhubError::ExecutionTimeout {
                    tool: tool.to_string(),
                    secs: limit.as_secs(),
                });
            }
            _ = progress.tick() => {
                info!(
                    "Tool '{}' still running ({}s elapsed)",
                    tool,
                    started.elapsed().as_secs()
                );
            }
        }
    }
}

/// Execute a tool against its owning server. Never fails: every error is
/// folded into the returned outcome's status tag.
pub async fn execute(
    state: &SharedState,
    tool: &str,
    arguments: Value,
    timeouts: &TimeoutSettings,
) -> ToolCallOutcome {
    let route = match resolve(state, tool).await {
        Ok(route) => route,
        Err(e) => {
            warn!("{}", e);
            return ToolCallOutcome::failure(tool, &e);
        }
    };

    debug!("Routing tool '{}' to server '{}'", tool, route.server);

    match call_with_deadline(route.session.as_ref(), tool, arguments, timeouts).await {
        Ok(result) => {
            if result.is_error == Some(true) {
                warn!("Tool '{}' reported an error result", tool);
            }
            state
                .write()
                .await
                .mark_recovered(&route.server, route.generation);
            ToolCallOutcome::success(tool, result.render())
        }
        Err(e) => {
            error!("{}", e);
            state
                .write()
                .await
                .mark_degraded(&route.server, route.generation);
            ToolCallOutcome::failure(tool, &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaunchSpec;
    use crate::connection::{ConnectionStatus, ServerConnection};
    use crate::state::HubState;
    use crate::types::{InitializeResult, McpTool};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use toolhub_core::ToolCallStatus;

    /// Answers every call after a fixed delay
    struct SlowSession {
        delay: Duration,
    }

    #[async_trait]
    impl ToolSession for SlowSession {
        async fn initialize(&self) -> Result<InitializeResult> {
            unimplemented!("not used by the executor")
        }

        async fn list_tools(&self) -> Result<Vec<McpTool>> {
            Ok(Vec::new())
        }

        async fn call_tool(&self, name: &str, _arguments: Value) -> Result<ToolCallResult> {
            sleep(self.delay).await;
            Ok(ToolCallResult::text(format!("{} done", name)))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn state_with(delay: Duration) -> SharedState {
        let state = HubState::shared();
        {
            let mut guard = state.try_write().unwrap();
            let tools = guard.registry.register(
                "slow",
                vec![McpTool {
                    name: "crunch".into(),
                    description: String::new(),
                    input_schema: json!({"type": "object"}),
                }],
            );
            guard.connections.insert(
                "slow".into(),
                ServerConnection {
                    id: "slow".into(),
                    generation: 1,
                    launch: LaunchSpec::new("slow-server"),
                    session: Arc::new(SlowSession { delay }),
                    status: ConnectionStatus::Connected,
                    tools,
                    config: Value::Null,
                    server_info: None,
                    connected_at: Utc::now(),
                },
            );
        }
        state
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_outlasting_progress_ticks_succeeds() {
        let state = state_with(Duration::from_secs(12));
        let timeouts = TimeoutSettings::default();
        assert_eq!(timeouts.progress_interval(), Duration::from_secs(5));

        let started = Instant::now();
        let outcome = execute(&state, "crunch", json!({}), &timeouts).await;

        assert_eq!(outcome.status, ToolCallStatus::Success);
        assert_eq!(outcome.content.as_deref(), Some("crunch done"));
        assert!(started.elapsed() >= Duration::from_secs(12));
        assert_eq!(
            state.read().await.connections["slow"].status,
            ConnectionStatus::Connected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_progress_interval_is_clamped() {
        let state = state_with(Duration::from_millis(50));
        let timeouts = TimeoutSettings {
            progress_interval_secs: 0,
            ..TimeoutSettings::default()
        };

        let outcome = execute(&state, "crunch", json!({}), &timeouts).await;
        assert_eq!(outcome.status, ToolCallStatus::Success);
    }
}
