//! The session-oriented client surface the Copilot adapter is written against.
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::providers::errors::ProviderError;

/// Runs one tool invocation requested by the session and returns its JSON result.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Value> + Send + Sync>;

/// Receives every event a session emits, in order.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

pub const EVENT_MESSAGE_DELTA: &str = "assistant.message_delta";
pub const EVENT_MESSAGE: &str = "assistant.message";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl SessionEvent {
    pub fn new<S: Into<String>>(kind: S, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Incremental text of an `assistant.message_delta` event.
    pub fn delta_content(&self) -> Option<&str> {
        if self.kind != EVENT_MESSAGE_DELTA {
            return None;
        }
        self.data
            .get("deltaContent")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Full text of a final `assistant.message` event.
    pub fn message_content(&self) -> Option<&str> {
        if self.kind != EVENT_MESSAGE {
            return None;
        }
        self.data.get("content").and_then(Value::as_str)
    }
}

#[derive(Clone)]
pub struct SessionTool {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
    pub handler: ToolHandler,
}

impl fmt::Debug for SessionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    /// Replaces the CLI's own system prompt when set.
    pub system_message: Option<String>,
    pub tools: Vec<SessionTool>,
    pub streaming: bool,
}

#[async_trait]
pub trait CopilotSession: Send + Sync {
    fn id(&self) -> &str;

    /// Subscribe to session events. Handlers run on the client's dispatch task and
    /// must not block.
    fn on(&self, handler: EventHandler);

    /// Send a prompt and wait for the turn to finish. Returns the final event, if any.
    /// Every event the turn emitted has reached the handlers by the time this returns.
    async fn send_and_wait(&self, prompt: &str) -> Result<Option<SessionEvent>, ProviderError>;

    /// Release the session. Safe to call more than once.
    async fn destroy(&self) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait CopilotClient: Send + Sync {
    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Arc<dyn CopilotSession>, ProviderError>;

    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;
}
