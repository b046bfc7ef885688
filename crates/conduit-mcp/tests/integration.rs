//! Integration tests for the MCP client.
//!
//! Stdio tests drive the `mock-mcp-server` binary through the process
//! transport. HTTP tests run against wiremock. Docker tests skip when no
//! daemon is reachable.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use conduit_docker::{DockerError, HostResolver};
use conduit_mcp::{
    ConnectionState, McpClient, McpError, McpManager, ServerConfig, TransportKind,
};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Path to the mock MCP server binary.
fn mock_server_path() -> String {
    env!("CARGO_BIN_EXE_mock-mcp-server").to_string()
}

fn mock_config(name: &str) -> ServerConfig {
    ServerConfig::new(name, TransportKind::Uvx).with_command(mock_server_path())
}

async fn wait_for_state(client: &McpClient, state: ConnectionState) -> bool {
    let mut rx = client.subscribe_state();
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == state))
        .await
        .is_ok_and(|r| r.is_ok())
}

#[tokio::test]
async fn test_connect_and_initialize() {
    let client = McpClient::new(mock_config("test"));
    client.connect().await.expect("Failed to connect");

    assert_eq!(client.state(), ConnectionState::Ready);
    assert!(client.is_connected());
    let server_info = client.server_info().expect("server info");
    assert_eq!(server_info.name, "mock-mcp-server");
    assert_eq!(server_info.version, "1.0.0");

    client.disconnect().await;
}

#[tokio::test]
async fn test_list_tools() {
    let client = McpClient::new(mock_config("test"));
    client.connect().await.expect("Failed to connect");

    let tools = client.list_tools().await.expect("Failed to list tools");
    assert_eq!(tools.len(), 6); // echo, add, slow, crash, roots, stray

    let echo_tool = tools
        .iter()
        .find(|t| t.name == "echo")
        .expect("echo tool not found");
    assert_eq!(
        echo_tool.description.as_deref(),
        Some("Echo back the input")
    );
    assert!(tools.iter().any(|t| t.name == "slow"), "slow tool not found");
    assert!(tools.iter().any(|t| t.name == "crash"), "crash tool not found");

    client.disconnect().await;
}

#[tokio::test]
async fn test_call_tools() {
    let client = McpClient::new(mock_config("test"));
    client.connect().await.expect("Failed to connect");

    let result = client
        .call_tool("echo", json!({"message": "Hello, MCP!"}))
        .await
        .expect("Failed to call tool");
    assert!(!result.is_error());
    assert_eq!(result.text(), Some("Hello, MCP!".to_string()));

    let result = client
        .call_tool("add", json!({"a": 2, "b": 3}))
        .await
        .expect("Failed to call tool");
    assert_eq!(result.text(), Some("5".to_string()));

    let result = client
        .call_tool("nope", Value::Null)
        .await
        .expect("Failed to call tool");
    assert!(result.is_error());

    client.disconnect().await;
}

#[tokio::test]
async fn test_concurrent_calls() {
    let client = Arc::new(McpClient::new(mock_config("test")));
    client.connect().await.expect("Failed to connect");

    let calls = (0..5).map(|i| {
        let client = Arc::clone(&client);
        async move {
            client
                .call_tool("echo", json!({"message": format!("m{i}")}))
                .await
        }
    });
    let results = futures::future::join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap().text(), Some(format!("m{i}")));
    }

    client.disconnect().await;
}

#[tokio::test]
async fn test_raw_request() {
    let client = McpClient::new(mock_config("test"));
    client.connect().await.expect("Failed to connect");

    let pong = client.request("ping", None).await.expect("ping");
    assert_eq!(pong, json!({}));

    let err = client.request("no/such", None).await.unwrap_err();
    assert!(matches!(err, McpError::ServerError { code: -32601, .. }));

    client.disconnect().await;
}

#[tokio::test]
async fn test_request_timeout() {
    let config = mock_config("test").with_timeout(Duration::from_secs(1));
    let client = McpClient::new(config);
    client.connect().await.expect("Failed to connect");

    let err = client
        .call_tool("slow", json!({"delay_ms": 3000}))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    // a timeout fails the call, not the connection
    assert_eq!(client.state(), ConnectionState::Ready);

    client.disconnect().await;
}

#[tokio::test]
async fn test_server_crash_rejects_pending_and_disconnects() {
    let client = McpClient::new(mock_config("test"));
    client.connect().await.expect("Failed to connect");

    let err = client.call_tool("crash", json!({})).await.unwrap_err();
    assert!(
        matches!(err, McpError::ConnectionClosed(_)),
        "unexpected error: {err:?}"
    );

    assert!(wait_for_state(&client, ConnectionState::Disconnected).await);
    assert!(matches!(
        client.list_tools().await,
        Err(McpError::NotConnected)
    ));
}

#[tokio::test]
async fn test_crash_on_flag() {
    let config = mock_config("test").with_args(vec!["--crash-on".into(), "add".into()]);
    let client = McpClient::new(config);
    client.connect().await.expect("Failed to connect");

    // other tools keep working
    let result = client
        .call_tool("echo", json!({"message": "still here"}))
        .await
        .unwrap();
    assert_eq!(result.text(), Some("still here".to_string()));

    assert!(client.call_tool("add", json!({"a": 1, "b": 1})).await.is_err());
    assert!(wait_for_state(&client, ConnectionState::Disconnected).await);
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_reconnect_works() {
    let client = McpClient::new(mock_config("test"));
    client.connect().await.expect("Failed to connect");

    client.disconnect().await;
    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client.call_tool("echo", json!({})).await,
        Err(McpError::NotConnected)
    ));

    client.connect().await.expect("Failed to reconnect");
    assert!(client.is_connected());
    client.disconnect().await;
}

#[tokio::test]
async fn test_connect_when_connected_is_noop() {
    let client = McpClient::new(mock_config("test"));
    client.connect().await.expect("Failed to connect");
    client.connect().await.expect("second connect");
    assert!(client.is_connected());
    client.disconnect().await;
}

#[tokio::test]
async fn test_concurrent_connect_rejected() {
    let config = mock_config("test").with_args(vec!["--delay-ms".into(), "500".into()]);
    let client = McpClient::new(config);

    let (first, second) = tokio::join!(client.connect(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.connect().await
    });

    first.expect("first connect");
    assert!(matches!(second, Err(McpError::ConnectInProgress)));
    client.disconnect().await;
}

#[tokio::test]
async fn test_tool_name_prefixing() {
    let client = McpClient::new(mock_config("mock").with_prefix_tool_names(true));
    client.connect().await.expect("Failed to connect");

    let tools = client.list_tools().await.unwrap();
    assert!(tools.iter().all(|t| t.name.starts_with("mock__")));
    assert!(tools.iter().any(|t| t.name == "mock__echo"));

    let qualified = client
        .call_tool("mock__echo", json!({"message": "q"}))
        .await
        .unwrap();
    assert_eq!(qualified.text(), Some("q".to_string()));

    let bare = client
        .call_tool("echo", json!({"message": "b"}))
        .await
        .unwrap();
    assert_eq!(bare.text(), Some("b".to_string()));

    client.disconnect().await;
}

#[tokio::test]
async fn test_spawn_failure_is_tagged() {
    let config = ServerConfig::new("ghost", TransportKind::Npx)
        .with_command("definitely-not-a-real-binary-12345");
    let client = McpClient::new(config);

    let err = client.connect().await.unwrap_err();
    assert!(err.to_string().starts_with("ghost (npx): "), "{err}");
    assert!(matches!(err.root(), McpError::SpawnFailed(_)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_slow_start_preamble_and_split_writes() {
    let config = mock_config("chatty").with_args(vec![
        "--startup-ms".into(),
        "300".into(),
        "--preamble".into(),
        "Booting mock".into(),
        "--split-writes".into(),
    ]);
    let client = McpClient::new(config);
    client.connect().await.expect("Failed to connect");

    let result = client
        .call_tool("echo", json!({"message": "in two halves"}))
        .await
        .unwrap();
    assert_eq!(result.text(), Some("in two halves".to_string()));
    assert_eq!(client.list_tools().await.unwrap().len(), 6);

    client.disconnect().await;
}

#[tokio::test]
async fn test_server_request_is_refused() {
    let client = McpClient::new(mock_config("test"));
    client.connect().await.expect("Failed to connect");

    let result = client.call_tool("roots", json!({})).await.unwrap();
    assert_eq!(result.text(), Some("-32601".to_string()));
    assert_eq!(client.state(), ConnectionState::Ready);

    client.disconnect().await;
}

#[tokio::test]
async fn test_unknown_response_id_is_ignored() {
    let client = McpClient::new(mock_config("test"));
    client.connect().await.expect("Failed to connect");

    let result = client.call_tool("stray", json!({})).await.unwrap();
    assert_eq!(result.text(), Some("after stray".to_string()));
    assert_eq!(client.state(), ConnectionState::Ready);

    let result = client
        .call_tool("echo", json!({"message": "still fine"}))
        .await
        .unwrap();
    assert_eq!(result.text(), Some("still fine".to_string()));

    client.disconnect().await;
}

#[tokio::test]
async fn test_late_response_after_timeout_is_dropped() {
    let config = mock_config("test").with_timeout(Duration::from_secs(1));
    let client = McpClient::new(config);
    client.connect().await.expect("Failed to connect");

    let err = client
        .call_tool("slow", json!({"delay_ms": 1500}))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err:?}");

    // the reply to the abandoned call lands while nobody waits for it
    tokio::time::sleep(Duration::from_millis(800)).await;

    let result = client
        .call_tool("echo", json!({"message": "next"}))
        .await
        .unwrap();
    assert_eq!(result.text(), Some("next".to_string()));
    assert_eq!(client.state(), ConnectionState::Ready);

    client.disconnect().await;
}

#[tokio::test]
async fn test_clean_exit_disconnects() {
    let config = mock_config("test").with_args(vec!["--exit-after-list".into()]);
    let client = McpClient::new(config);
    client.connect().await.expect("Failed to connect");

    assert_eq!(client.list_tools().await.unwrap().len(), 6);
    assert!(wait_for_state(&client, ConnectionState::Disconnected).await);
    assert!(matches!(
        client.call_tool("echo", json!({})).await,
        Err(McpError::NotConnected)
    ));
}

#[tokio::test]
async fn test_disconnect_during_connect_wins() {
    let config = mock_config("test").with_args(vec!["--delay-ms".into(), "500".into()]);
    let client = McpClient::new(config);

    let (outcome, ()) = tokio::join!(client.connect(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.disconnect().await;
    });

    let err = outcome.unwrap_err();
    assert!(err.to_string().starts_with("test (uvx): "), "{err}");
    assert!(matches!(err.root(), McpError::ConnectionClosed(_)), "{err:?}");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.is_connected());
}

// --- HTTP ---

/// Answers JSON-RPC requests with the given results, echoing the request id.
struct RpcResponder {
    sse: bool,
}

impl Respond for RpcResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let Some(id) = body.get("id").cloned() else {
            return ResponseTemplate::new(202);
        };
        let result = match body["method"].as_str() {
            Some("initialize") => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "remote", "version": "2.0.0"}
            }),
            Some("tools/list") => json!({
                "tools": [{
                    "name": "search",
                    "description": "Search things",
                    "inputSchema": {"type": "object", "properties": {"q": {"type": "string"}}}
                }]
            }),
            Some("tools/call") => json!({
                "content": [{"type": "text", "text": body["params"]["arguments"]["q"].clone()}]
            }),
            _ => {
                return ResponseTemplate::new(200).set_body_json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": "Method not found"}
                }));
            }
        };
        let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
        if self.sse {
            let stream = format!("event: message\ndata: {reply}\n\n");
            ResponseTemplate::new(200).set_body_raw(stream, "text/event-stream")
        } else {
            ResponseTemplate::new(200).set_body_json(reply)
        }
    }
}

#[tokio::test]
async fn test_http_connect_list_and_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(RpcResponder { sse: false })
        .mount(&server)
        .await;

    let client = McpClient::new(ServerConfig::http("remote", format!("{}/mcp", server.uri())));
    client.connect().await.expect("Failed to connect");
    assert_eq!(client.server_info().unwrap().name, "remote");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "search");

    let result = client.call_tool("search", json!({"q": "rust"})).await.unwrap();
    assert_eq!(result.text(), Some("rust".to_string()));

    let err = client.request("unknown", None).await.unwrap_err();
    assert!(matches!(err, McpError::ServerError { code: -32601, .. }));

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_http_event_stream_with_headers_and_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("x-tenant", "acme"))
        .and(header("authorization", "Bearer tok-123"))
        .respond_with(RpcResponder { sse: true })
        .mount(&server)
        .await;

    let config = ServerConfig::http("remote", format!("{}/mcp", server.uri()))
        .with_header("X-Tenant", "acme")
        .with_auth(conduit_mcp::AuthConfig::Bearer {
            token: "tok-123".into(),
        });
    let client = McpClient::new(config);
    client.connect().await.expect("Failed to connect");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools[0].name, "search");
    client.disconnect().await;
}

#[tokio::test]
async fn test_http_error_status_redacts_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html><body>secret stack</body></html>"))
        .mount(&server)
        .await;

    let config = ServerConfig::http(
        "remote",
        format!("{}/mcp?api_key=hunter2", server.uri()),
    )
    .with_retries(0);
    let client = McpClient::new(config);

    let err = client.connect().await.unwrap_err();
    match err.root() {
        McpError::HttpStatus { status, endpoint } => {
            assert_eq!(*status, 500);
            assert!(endpoint.ends_with("/mcp"), "{endpoint}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let message = err.to_string();
    assert!(!message.contains("hunter2"));
    assert!(!message.contains("secret stack"));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_streamable_http_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(RpcResponder { sse: false })
        .mount(&server)
        .await;

    let config = ServerConfig::streamable_http("stream", format!("{}/mcp", server.uri()))
        .with_prefix_tool_names(true);
    let client = McpClient::new(config);
    client.connect().await.expect("Failed to connect");
    assert_eq!(client.server_info().unwrap().name, "remote");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "stream__search");

    let result = client
        .call_tool("stream__search", json!({"q": "session"}))
        .await
        .unwrap();
    assert_eq!(result.text(), Some("session".to_string()));

    assert!(matches!(
        client.request("tools/list", None).await,
        Err(McpError::UseSpecificMethods)
    ));

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

/// Serves like [`RpcResponder`] until `expired` flips, then answers 404.
struct ExpiringSession {
    expired: Arc<AtomicBool>,
}

impl Respond for ExpiringSession {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if self.expired.load(Ordering::SeqCst) {
            return ResponseTemplate::new(404);
        }
        RpcResponder { sse: false }.respond(request)
    }
}

#[tokio::test]
async fn test_streamable_http_expired_session_disconnects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    let expired = Arc::new(AtomicBool::new(false));
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ExpiringSession {
            expired: Arc::clone(&expired),
        })
        .mount(&server)
        .await;

    let config = ServerConfig::streamable_http("stream", format!("{}/mcp", server.uri()))
        .with_timeout(Duration::from_secs(5));
    let client = McpClient::new(config);
    client.connect().await.expect("Failed to connect");
    assert_eq!(client.list_tools().await.unwrap().len(), 1);

    expired.store(true, Ordering::SeqCst);
    assert!(client.call_tool("search", json!({"q": "gone"})).await.is_err());
    assert!(wait_for_state(&client, ConnectionState::Disconnected).await);
    assert!(matches!(
        client.list_tools().await,
        Err(McpError::NotConnected)
    ));
}

#[tokio::test]
async fn test_streamable_http_unreachable() {
    let config = ServerConfig::streamable_http("stream", "http://127.0.0.1:1/mcp")
        .with_timeout(Duration::from_secs(5));
    let client = McpClient::new(config);

    let err = client.connect().await.unwrap_err();
    assert!(err.to_string().starts_with("stream (streamable-http): "), "{err}");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

// --- Docker ---

#[tokio::test]
async fn test_docker_unsupported_flags() {
    let config = ServerConfig::docker("db", "mcp/sqlite")
        .with_container_args(vec!["--cpus".into(), "2".into(), "-e".into(), "A=1".into()]);
    let client = McpClient::new(config);

    let err = client.connect().await.unwrap_err();
    assert!(err.to_string().starts_with("db (docker): "), "{err}");
    match err.root() {
        McpError::Docker(DockerError::UnsupportedArgs(flags)) => {
            assert_eq!(flags, &vec!["--cpus 2".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

async fn docker_available() -> bool {
    match HostResolver::for_current_host(None) {
        Ok(mut resolver) => resolver.resolve().await.is_ok(),
        Err(_) => false,
    }
}

#[tokio::test]
async fn test_docker_container_exit_reports_startup_failure() {
    if !docker_available().await {
        eprintln!("Skipping test: no Docker daemon reachable");
        return;
    }

    let config = ServerConfig::docker("exits", "alpine:3")
        .with_args(vec!["sh".into(), "-c".into(), "echo going away; exit 2".into()])
        .with_container_args(vec!["--rm".into()])
        .with_startup_retries(1);
    let client = McpClient::new(config);

    let err = client.connect().await.unwrap_err();
    assert!(err.to_string().starts_with("exits (docker): "), "{err}");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

// --- Manager ---

#[tokio::test]
async fn test_manager_connects_routes_and_shuts_down() {
    let mut manager = McpManager::new();
    manager.add_server(mock_config("alpha").with_prefix_tool_names(true));
    manager.add_server(mock_config("beta").with_prefix_tool_names(true));
    manager.add_server(
        ServerConfig::new("broken", TransportKind::Uvx).with_command("definitely-not-a-real-binary-12345"),
    );

    assert_eq!(manager.connect_all().await, 2);
    assert!(manager.is_connected("alpha"));
    assert!(manager.is_connected("beta"));
    assert!(!manager.is_connected("broken"));

    let tools = manager.all_tools_flat().await;
    assert_eq!(tools.len(), 12);
    assert!(tools.iter().any(|(server, tool)| server == "beta" && tool.name == "beta__add"));

    let result = manager
        .call_qualified("alpha__echo", json!({"message": "routed"}))
        .await
        .unwrap();
    assert_eq!(result.text(), Some("routed".to_string()));

    let result = manager
        .call_tool("beta", "add", json!({"a": 1, "b": 2}))
        .await
        .unwrap();
    assert_eq!(result.text(), Some("3".to_string()));

    manager.shutdown_all().await;
    assert_eq!(manager.connected_count(), 0);
    assert_eq!(manager.config_count(), 3);
}
