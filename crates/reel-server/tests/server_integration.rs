//! Boots the full application state from settings: tool servers from an
//! `mcpServers` file, a custom OpenAI-compatible backend served by wiremock.
#![cfg(unix)]

use std::io::Write;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use reel_server::configuration::ToolServerSettings;
use reel_server::routes;
use reel_server::state::AppState;
use reel::model::ModelConfig;
use reel::providers::configs::OpenAiProviderConfig;
use reel::providers::ProviderConfig;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// One `inspect` tool answering "inspected".
const INSPECT_SERVER: &str = r#"while IFS= read -r line; do id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\).*/\1/p'); case "$line" in *'"method":"initialize"'*) echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"protocolVersion\":\"2024-11-05\",\"capabilities\":{\"tools\":{}},\"serverInfo\":{\"name\":\"inspect\",\"version\":\"1.0.0\"}}}" ;; *'"method":"tools/list"'*) echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"tools\":[{\"name\":\"inspect\",\"description\":\"Inspect a media file\",\"inputSchema\":{\"type\":\"object\"}}]}}" ;; *'"method":"tools/call"'*) echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"inspected\"}]}}" ;; esac; done"#;

fn mcp_config() -> tempfile::NamedTempFile {
    let config = json!({
        "mcpServers": {
            "media": {"command": "sh", "args": ["-c", INSPECT_SERVER]},
            "offline": {"command": "sh", "args": ["-c", "exit 1"], "disabled": true}
        }
    });
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(config.to_string().as_bytes()).unwrap();
    file
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_chat_over_configured_servers() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Tool 'inspect' result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "It is 10 seconds long."}, "finish_reason": "stop"}]
        })))
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_inspect",
                        "type": "function",
                        "function": {"name": "inspect", "arguments": "{\"path\":\"a.mp4\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .up_to_n_times(1)
        .mount(&backend)
        .await;

    let config_file = mcp_config();
    let servers = ToolServerSettings {
        config_path: Some(config_file.path().to_path_buf()),
        servers_dir: None,
    }
    .servers();
    assert_eq!(servers.len(), 1);

    let provider = ProviderConfig::Custom(OpenAiProviderConfig {
        host: backend.uri(),
        api_key: String::new(),
        model: ModelConfig::new("local-model"),
    });
    let state = AppState::new(provider, &servers, 5).await.unwrap();
    let app = routes::configure(state.clone());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/tools").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(response).await[0]["name"], "inspect");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/chat")
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from(json!({"content": "how long is a.mp4?"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"content": "It is 10 seconds long."})
    );

    let requests = backend.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(first["model"], "local-model");
    assert!(first["messages"][0]["content"]
        .as_str()
        .unwrap()
        .contains("- inspect: Inspect a media file"));

    state.shutdown().await;
    assert!(state.registry.server_names().await.is_empty());
}
