#![cfg(unix)]

use serde_json::json;
use toolhub_config::HubConfig;
use toolhub_core::ToolCallStatus;
use toolhub_mcp::{LaunchSpec, McpClient, McpManager, ToolSession};

/// Minimal line-oriented MCP server: answers initialize, tools/list and
/// tools/call, and ignores notifications.
const FAKE_SERVER: &str = r##"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"sh-echo","version":"1.0.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo back","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      echo "call received" >&2
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
  esac
done
"##;

fn fake_server() -> LaunchSpec {
    LaunchSpec::new("sh").with_args(["-c", FAKE_SERVER])
}

/// Same server, but it writes a line that is not valid UTF-8 to both
/// streams before answering a tool call.
fn noisy_server() -> LaunchSpec {
    let script = FAKE_SERVER.replace(
        r#"echo "call received" >&2"#,
        r#"printf 'log \377 line\n'; printf 'warn \377\n' >&2"#,
    );
    LaunchSpec::new("sh").with_args(["-c".to_string(), script])
}

#[tokio::test]
async fn manager_round_trip_over_stdio() {
    let manager = McpManager::new(&HubConfig::default());

    let tools = manager.connect("sh-echo", fake_server()).await.unwrap();
    assert_eq!(tools, vec!["echo"]);

    let status = manager.server_status().await;
    let info = status["sh-echo"].server_info.clone().unwrap();
    assert_eq!(info.name, "sh-echo");
    assert_eq!(info.version, "1.0.0");

    let outcome = manager.execute("echo", json!({"text": "ping"})).await;
    assert_eq!(outcome.status, ToolCallStatus::Success);
    assert_eq!(outcome.content.as_deref(), Some("pong"));

    let declarations = manager.active_declarations().await;
    assert_eq!(declarations[0].parameters.required, Some(vec!["text".to_string()]));

    assert!(manager.check_health().await["sh-echo"]);

    assert!(manager.disconnect("sh-echo").await);
    assert!(manager.server_status().await.is_empty());
}

#[tokio::test]
async fn client_rejects_requests_after_close() {
    let client = McpClient::spawn("sh-echo", &fake_server()).unwrap();
    let init = client.initialize().await.unwrap();
    assert_eq!(init.protocol_version, "2024-11-05");
    assert!(client.is_connected());

    client.close().await.unwrap();
    assert!(!client.is_connected());
    assert!(client.list_tools().await.is_err());
    // Closing twice is harmless.
    client.close().await.unwrap();
}

#[tokio::test]
async fn missing_executable_fails_connect() {
    let manager = McpManager::new(&HubConfig::default());

    let result = manager
        .connect("ghost", LaunchSpec::new("/nonexistent/toolhub-test-server"))
        .await;
    assert!(result.is_err());
    assert!(manager.server_status().await.is_empty());
}

#[tokio::test]
async fn server_exiting_during_handshake_is_rolled_back() {
    let manager = McpManager::new(&HubConfig::default());

    let result = manager
        .connect("quitter", LaunchSpec::new("sh").with_args(["-c", "exit 0"]))
        .await;
    assert!(result.is_err());
    assert!(manager.server_status().await.is_empty());
}

#[tokio::test]
async fn invalid_utf8_output_does_not_end_session() {
    let manager = McpManager::new(&HubConfig::default());
    manager.connect("enc", noisy_server()).await.unwrap();

    for _ in 0..2 {
        let outcome = manager.execute("echo", json!({"text": "ping"})).await;
        assert_eq!(outcome.status, ToolCallStatus::Success, "{:?}", outcome.error);
        assert_eq!(outcome.content.as_deref(), Some("pong"));
    }

    assert!(manager.check_health().await["enc"]);
    let status = manager.server_status().await;
    assert_eq!(status["enc"].status, toolhub_mcp::ConnectionStatus::Connected);

    manager.cleanup().await;
}
