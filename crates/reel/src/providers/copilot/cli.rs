//! Copilot CLI running in server mode, spoken to over line-delimited JSON-RPC on stdio.
//!
//! Requests sent: `session.create`, `session.send`, `session.destroy`, `models.list`.
//! Received from the CLI: `session.event` notifications and `tool.call` requests.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use mcp_client::transport::{StdioTransport, Transport, TransportHandle};
use mcp_core::protocol::{
    ErrorData, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, INVALID_PARAMS, METHOD_NOT_FOUND,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::client::{
    CopilotClient, CopilotSession, EventHandler, SessionConfig, SessionEvent, ToolHandler,
};
use crate::providers::errors::ProviderError;

#[derive(Default)]
struct SessionRoute {
    handlers: Mutex<Vec<EventHandler>>,
    tools: HashMap<String, ToolHandler>,
}

impl SessionRoute {
    fn emit(&self, event: &SessionEvent) {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(event);
        }
    }
}

type SessionTable = Mutex<HashMap<String, Arc<SessionRoute>>>;

/// What the dispatcher works through, in the order the CLI wrote it.
enum Inbound {
    Peer(JsonRpcMessage),
    /// Acknowledged once everything queued ahead of it has been dispatched.
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
struct Rpc {
    handle: TransportHandle,
    next_id: Arc<AtomicU64>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl Rpc {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcMessage::Request(JsonRpcRequest::new(id, method, Some(params)));

        let reply = self
            .handle
            .send(request)
            .await
            .map_err(|e| ProviderError::Session(format!("{method}: {e}")))?;

        match reply {
            JsonRpcMessage::Response(JsonRpcResponse {
                error: Some(error), ..
            }) => Err(ProviderError::Session(format!(
                "{method} failed: {}",
                error.message
            ))),
            JsonRpcMessage::Response(JsonRpcResponse { result, .. }) => {
                Ok(result.unwrap_or(Value::Null))
            }
            other => Err(ProviderError::Session(format!(
                "{method}: unexpected reply {other:?}"
            ))),
        }
    }

    /// Wait until the dispatcher has handled every event received so far.
    async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.inbound.send(Inbound::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    async fn respond(&self, response: JsonRpcResponse) {
        if let Err(e) = self.handle.send(JsonRpcMessage::Response(response)).await {
            warn!(error = %e, "failed to answer copilot request");
        }
    }
}

pub struct CopilotCliClient {
    transport: StdioTransport,
    rpc: Rpc,
    sessions: Arc<SessionTable>,
    dispatcher: JoinHandle<()>,
}

impl CopilotCliClient {
    /// Spawn the CLI and start routing its events and tool requests.
    pub async fn start(cli_path: &str, args: Vec<String>) -> Result<Self, ProviderError> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let peer_tx = inbound_tx.clone();
        let transport = StdioTransport::new(cli_path, args, HashMap::new()).with_inbound(
            move |message| {
                let _ = peer_tx.send(Inbound::Peer(message));
            },
        );
        let handle = transport.start().await.map_err(|e| {
            ProviderError::Session(format!("failed to start Copilot CLI '{cli_path}': {e}"))
        })?;

        let rpc = Rpc {
            handle,
            next_id: Arc::new(AtomicU64::new(1)),
            inbound: inbound_tx,
        };
        let sessions: Arc<SessionTable> = Arc::default();
        let dispatcher = tokio::spawn(dispatch(inbound_rx, rpc.clone(), Arc::clone(&sessions)));

        debug!(cli = cli_path, "copilot cli started");
        Ok(Self {
            transport,
            rpc,
            sessions,
            dispatcher,
        })
    }

    pub async fn close(&self) {
        self.dispatcher.abort();
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "closing copilot cli");
        }
    }
}

impl Drop for CopilotCliClient {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    rpc: Rpc,
    sessions: Arc<SessionTable>,
) {
    let route_for = |params: &Value| {
        let id = params.get("sessionId").and_then(Value::as_str)?;
        sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    };

    while let Some(item) = inbound.recv().await {
        let message = match item {
            Inbound::Peer(message) => message,
            Inbound::Flush(ack) => {
                let _ = ack.send(());
                continue;
            }
        };
        match message {
            JsonRpcMessage::Notification(notification) if notification.method == "session.event" => {
                let params = notification.params.unwrap_or_default();
                let Some(route) = route_for(&params) else {
                    debug!("event for unknown copilot session");
                    continue;
                };
                match serde_json::from_value::<SessionEvent>(params["event"].clone()) {
                    Ok(event) => route.emit(&event),
                    Err(e) => warn!(error = %e, "undecodable copilot session event"),
                }
            }
            JsonRpcMessage::Request(request) if request.method == "tool.call" => {
                let params = request.params.clone().unwrap_or_default();
                let tool_name = params["toolName"].as_str().unwrap_or_default().to_string();
                let handler = route_for(&params).and_then(|route| route.tools.get(&tool_name).cloned());
                let rpc = rpc.clone();

                // Tools may be slow; keep dispatching events meanwhile
                tokio::spawn(async move {
                    let response = match handler {
                        Some(handler) => {
                            let result = handler(params["arguments"].clone()).await;
                            JsonRpcResponse::success(request.id, json!({ "result": result }))
                        }
                        None => JsonRpcResponse::failure(
                            request.id,
                            ErrorData::new(INVALID_PARAMS, format!("Unknown tool '{tool_name}'")),
                        ),
                    };
                    rpc.respond(response).await;
                });
            }
            JsonRpcMessage::Request(request) => {
                let error = ErrorData::new(
                    METHOD_NOT_FOUND,
                    format!("Method '{}' not supported", request.method),
                );
                rpc.respond(JsonRpcResponse::failure(request.id, error)).await;
            }
            other => debug!(message = ?other, "ignoring copilot message"),
        }
    }
}

struct CliSession {
    id: String,
    rpc: Rpc,
    route: Arc<SessionRoute>,
    sessions: Arc<SessionTable>,
    destroyed: AtomicBool,
}

#[async_trait]
impl CopilotSession for CliSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn on(&self, handler: EventHandler) {
        self.route
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    async fn send_and_wait(&self, prompt: &str) -> Result<Option<SessionEvent>, ProviderError> {
        let result = self
            .rpc
            .request(
                "session.send",
                json!({ "sessionId": self.id, "prompt": prompt }),
            )
            .await;
        // Events written ahead of the reply were queued before it resolved
        self.rpc.flush().await;
        let result = result?;
        match result.get("event") {
            Some(event) if !event.is_null() => Ok(Some(serde_json::from_value(event.clone())?)),
            _ => Ok(None),
        }
    }

    async fn destroy(&self) -> Result<(), ProviderError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        self.rpc
            .request("session.destroy", json!({ "sessionId": self.id }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CopilotClient for CopilotCliClient {
    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Arc<dyn CopilotSession>, ProviderError> {
        let tools: Vec<Value> = config
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                })
            })
            .collect();
        let mut params = json!({
            "model": config.model,
            "tools": tools,
            "streaming": config.streaming,
        });
        if let Some(system) = &config.system_message {
            params["systemMessage"] = json!({ "mode": "replace", "content": system });
        }

        let result = self.rpc.request("session.create", params).await?;
        let id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Session("session.create returned no sessionId".into()))?
            .to_string();

        let route = Arc::new(SessionRoute {
            handlers: Mutex::new(Vec::new()),
            tools: config
                .tools
                .into_iter()
                .map(|tool| (tool.name, tool.handler))
                .collect(),
        });
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::clone(&route));

        Ok(Arc::new(CliSession {
            id,
            rpc: self.rpc.clone(),
            route,
            sessions: Arc::clone(&self.sessions),
            destroyed: AtomicBool::new(false),
        }))
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let result = self.rpc.request("models.list", json!({})).await?;
        let entries = match &result {
            Value::Array(entries) => entries.clone(),
            other => other
                .get("models")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        };
        Ok(entries
            .iter()
            .filter_map(|entry| match entry {
                Value::String(id) => Some(id.clone()),
                other => other
                    .get("id")
                    .or_else(|| other.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
            .collect())
    }
}
