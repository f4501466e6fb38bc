use axum::{
    extract::ws::{Message as WsRawMessage, WebSocket},
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use reel::agents::AgentEvent;
use reel::message::{ChatOptions, Message};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::system_message;
use crate::state::AppState;

// Message types for WebSocket communication
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum WsMessage {
    // Client -> Server
    #[serde(rename = "copilot.message")]
    CopilotMessage {
        content: String,
        #[serde(rename = "projectId", default, skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
    },

    // Server -> Client
    #[serde(rename = "copilot.response")]
    CopilotResponse { content: String, done: bool },
    #[serde(rename = "copilot.tool_call")]
    ToolCall {
        tool: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        args: Value,
    },
    #[serde(rename = "copilot.tool_result")]
    ToolResult {
        tool: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        result: Value,
        #[serde(rename = "isError", default)]
        is_error: bool,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

type Outbox = mpsc::Sender<WsMessage>;
type Closed = mpsc::error::SendError<WsMessage>;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// One conversation per socket. Turns on a socket run one at a time; separate sockets
/// run independently.
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("client connected");
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(32);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("failed to encode websocket message: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(WsRawMessage::Text(text.into())).await {
                warn!("failed to send websocket message: {}", e);
                break;
            }
        }
    });

    let mut history: Vec<Message> = Vec::new();
    while let Some(Ok(raw_message)) = ws_receiver.next().await {
        let sent = match raw_message {
            WsRawMessage::Text(text) => match serde_json::from_str::<WsMessage>(&text) {
                Ok(WsMessage::CopilotMessage {
                    content,
                    project_id,
                }) => run_turn(&state, &mut history, content, project_id, &tx).await,
                Ok(_) => {
                    tx.send(WsMessage::Error {
                        message: "Received server-only message type from client".to_string(),
                    })
                    .await
                }
                Err(e) => {
                    debug!("unrecognized websocket message: {}", e);
                    tx.send(WsMessage::Error {
                        message: format!("Invalid message format: {}", e),
                    })
                    .await
                }
            },
            WsRawMessage::Close(_) => break,
            _ => Ok(()),
        };
        if sent.is_err() {
            break;
        }
    }

    drop(tx);
    let _ = writer.await;
    info!("client disconnected");
}

/// Streams one agent run to the client and folds its transcript into the socket's
/// history. Errors from the model end the turn with an error response.
async fn run_turn(
    state: &AppState,
    history: &mut Vec<Message>,
    content: String,
    project_id: Option<String>,
    tx: &Outbox,
) -> Result<(), Closed> {
    let system = match system_message(state, project_id.as_deref()).await {
        Ok(system) => system,
        Err(e) => return fail_turn(tx, e).await,
    };

    // History only grows once a turn completes, so a failed turn leaves no trace
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(system);
    messages.extend(history.iter().cloned());
    messages.push(Message::user(content));

    let mut events = state.agent.run_streaming(messages, ChatOptions::default());
    while let Some(event) = events.next().await {
        match event {
            Ok(AgentEvent::Content(content)) => {
                tx.send(WsMessage::CopilotResponse {
                    content,
                    done: false,
                })
                .await?
            }
            Ok(AgentEvent::ToolCall(call)) => {
                tx.send(WsMessage::ToolCall {
                    tool: call.tool_name,
                    tool_call_id: call.tool_call_id,
                    args: call.args,
                })
                .await?
            }
            Ok(AgentEvent::ToolResult(result)) => {
                tx.send(WsMessage::ToolResult {
                    tool: result.tool_name,
                    tool_call_id: result.tool_call_id,
                    result: result.result,
                    is_error: result.is_error,
                })
                .await?
            }
            Ok(AgentEvent::Done(reply)) => {
                // Keep everything but the system prompt, which is rebuilt per turn
                *history = reply.messages.into_iter().skip(1).collect();
            }
            Err(e) => return fail_turn(tx, e).await,
        }
    }

    tx.send(WsMessage::CopilotResponse {
        content: String::new(),
        done: true,
    })
    .await
}

async fn fail_turn(tx: &Outbox, e: impl std::fmt::Display) -> Result<(), Closed> {
    error!("copilot turn failed: {}", e);
    tx.send(WsMessage::CopilotResponse {
        content: format!("Error: {}", e),
        done: true,
    })
    .await
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_core::Tool;
    use reel::message::{ChatResponse, Role, ToolCall};
    use reel::orchestrator::Orchestrator;
    use reel::providers::mock::{MockProvider, MockReply};
    use reel::tool_servers::mock::MockMcpClient;
    use reel::tool_servers::ToolServerRegistry;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn create_test_server(provider: Arc<MockProvider>) -> SocketAddr {
        let registry = Arc::new(ToolServerRegistry::new());
        registry
            .add_client(
                "ffmpeg",
                Arc::new(MockMcpClient::new(vec![Tool::new(
                    "trim_video",
                    "Trim a clip",
                    json!({"type": "object"}),
                )])),
            )
            .await;
        let orchestrator = Arc::new(Orchestrator::with_provider(provider));
        let app = routes(AppState::from_parts(orchestrator, registry, 5));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();
        client
    }

    async fn send(client: &mut Client, msg: &WsMessage) {
        let text = serde_json::to_string(msg).unwrap();
        client
            .send(tungstenite::Message::Text(text.into()))
            .await
            .unwrap();
    }

    /// Everything up to and including the closing `done: true` response.
    async fn read_turn(client: &mut Client) -> Vec<WsMessage> {
        let mut received = Vec::new();
        while let Some(Ok(msg)) = client.next().await {
            if let tungstenite::Message::Text(text) = msg {
                let msg: WsMessage = serde_json::from_str(&text).unwrap();
                let done = matches!(msg, WsMessage::CopilotResponse { done: true, .. });
                received.push(msg);
                if done {
                    break;
                }
            }
        }
        received
    }

    fn user_message(content: &str) -> WsMessage {
        WsMessage::CopilotMessage {
            content: content.to_string(),
            project_id: None,
        }
    }

    #[test]
    fn test_wire_format() {
        let incoming: WsMessage = serde_json::from_value(json!({
            "type": "copilot.message",
            "payload": {"content": "hi", "projectId": "p1"}
        }))
        .unwrap();
        assert_eq!(
            incoming,
            WsMessage::CopilotMessage {
                content: "hi".to_string(),
                project_id: Some("p1".to_string())
            }
        );

        let outgoing = serde_json::to_value(WsMessage::CopilotResponse {
            content: String::new(),
            done: true,
        })
        .unwrap();
        assert_eq!(
            outgoing,
            json!({"type": "copilot.response", "payload": {"content": "", "done": true}})
        );
    }

    #[tokio::test]
    async fn test_streamed_turn_with_tool_call() {
        let provider = Arc::new(MockProvider::new(vec![
            MockReply::Chunks(
                vec!["Trim".to_string(), "ming".to_string()],
                ChatResponse::text("Trimming").with_tool_calls(vec![ToolCall::new(
                    "trim_video",
                    "call_1",
                    json!({"clipId": "c1"}),
                )]),
            ),
            MockReply::Chunks(vec!["Done.".to_string()], ChatResponse::text("Done.")),
            ChatResponse::text("Anything else?").into(),
        ]));
        let addr = create_test_server(provider.clone()).await;
        let mut client = connect(addr).await;

        send(&mut client, &user_message("trim c1")).await;
        let turn = read_turn(&mut client).await;

        assert_eq!(turn.len(), 6);
        assert_eq!(
            turn[0],
            WsMessage::CopilotResponse {
                content: "Trim".to_string(),
                done: false
            }
        );
        assert_eq!(
            turn[2],
            WsMessage::ToolCall {
                tool: "trim_video".to_string(),
                tool_call_id: "call_1".to_string(),
                args: json!({"clipId": "c1"}),
            }
        );
        match &turn[3] {
            WsMessage::ToolResult {
                tool,
                tool_call_id,
                is_error,
                ..
            } => {
                assert_eq!(tool, "trim_video");
                assert_eq!(tool_call_id, "call_1");
                assert!(!is_error);
            }
            other => panic!("expected tool result, got {:?}", other),
        }
        assert_eq!(
            turn[4],
            WsMessage::CopilotResponse {
                content: "Done.".to_string(),
                done: false
            }
        );

        // The second turn sees the whole first conversation
        send(&mut client, &user_message("thanks")).await;
        let turn = read_turn(&mut client).await;
        assert_eq!(turn.len(), 2);

        let calls = provider.calls();
        assert_eq!(calls.len(), 3);
        let messages = &calls[2].messages;
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User
            ]
        );
        assert_eq!(messages[5].content, "thanks");
    }

    #[tokio::test]
    async fn test_provider_error_ends_turn() {
        let provider = Arc::new(MockProvider::new(vec![
            MockReply::Error("quota exhausted".to_string()),
            ChatResponse::text("Back again.").into(),
        ]));
        let addr = create_test_server(provider.clone()).await;
        let mut client = connect(addr).await;

        send(&mut client, &user_message("hello")).await;
        let turn = read_turn(&mut client).await;

        assert_eq!(turn.len(), 1);
        match &turn[0] {
            WsMessage::CopilotResponse { content, done } => {
                assert!(done);
                assert!(content.starts_with("Error: "));
                assert!(content.contains("quota exhausted"));
            }
            other => panic!("expected error response, got {:?}", other),
        }

        // The failed turn left nothing behind, so no two user messages in a row
        send(&mut client, &user_message("retry")).await;
        read_turn(&mut client).await;
        let calls = provider.calls();
        let roles: Vec<Role> = calls[1].messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
        assert_eq!(calls[1].messages[1].content, "retry");
    }

    #[tokio::test]
    async fn test_sockets_keep_separate_histories() {
        let provider = Arc::new(MockProvider::new(vec![
            ChatResponse::text("one"),
            ChatResponse::text("two"),
        ]));
        let addr = create_test_server(provider.clone()).await;
        let mut first = connect(addr).await;
        let mut second = connect(addr).await;

        send(&mut first, &user_message("from first")).await;
        read_turn(&mut first).await;
        send(&mut second, &user_message("from second")).await;
        read_turn(&mut second).await;

        let calls = provider.calls();
        assert_eq!(calls[1].messages.len(), 2);
        assert_eq!(calls[1].messages[1].content, "from second");
    }

    #[tokio::test]
    async fn test_invalid_message_reports_error() {
        let provider = Arc::new(MockProvider::new(Vec::<MockReply>::new()));
        let addr = create_test_server(provider).await;
        let mut client = connect(addr).await;

        client
            .send(tungstenite::Message::Text("not json".into()))
            .await
            .unwrap();

        let reply = client.next().await.unwrap().unwrap();
        let reply: WsMessage = serde_json::from_str(reply.to_text().unwrap()).unwrap();
        assert!(matches!(reply, WsMessage::Error { .. }));
    }
}
