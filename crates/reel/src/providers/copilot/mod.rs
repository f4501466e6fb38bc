//! Adapter for GitHub Copilot, which is reached through a session-oriented client
//! instead of an HTTP API. Sessions deliver text through event callbacks; the
//! [`StreamMultiplexer`] turns those back into a pull-based chunk stream.
pub mod cli;
pub mod client;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use self::cli::CopilotCliClient;
use self::client::{
    CopilotClient, CopilotSession, SessionConfig, SessionEvent, SessionTool, ToolHandler,
};
use super::base::{ChunkStream, Provider, ProviderKind, ToolExecutor};
use super::configs::CopilotProviderConfig;
use super::errors::ProviderError;
use super::utils::error_value;
use crate::message::{split_system, ChatOptions, ChatResponse, Message, Role, StreamChunk};
use crate::model::ModelConfig;
use crate::multiplexer::StreamMultiplexer;
use mcp_core::tool::Tool;

/// Served by `list_models` when the CLI cannot be asked.
pub const COPILOT_FALLBACK_MODELS: [&str; 3] = ["gpt-4o", "claude-3.5-sonnet", "o1-preview"];

const TOOL_UNAVAILABLE: &str = "Tool execution not available";

pub struct CopilotProvider {
    config: CopilotProviderConfig,
    client: OnceCell<Arc<dyn CopilotClient>>,
}

impl CopilotProvider {
    /// The CLI is only spawned on first use.
    pub fn new(config: CopilotProviderConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    pub fn with_client(config: CopilotProviderConfig, client: Arc<dyn CopilotClient>) -> Self {
        Self {
            config,
            client: OnceCell::new_with(Some(client)),
        }
    }

    async fn client(&self) -> Result<&Arc<dyn CopilotClient>, ProviderError> {
        self.client
            .get_or_try_init(|| async {
                let client =
                    CopilotCliClient::start(&self.config.cli_path, self.config.cli_args.clone())
                        .await?;
                Ok(Arc::new(client) as Arc<dyn CopilotClient>)
            })
            .await
    }

    fn session_config(
        &self,
        system: Option<String>,
        tools: &[Tool],
        executor: Option<ToolExecutor>,
        options: &ChatOptions,
        streaming: bool,
    ) -> SessionConfig {
        SessionConfig {
            model: options
                .model_or(&self.config.model.model_name)
                .to_string(),
            system_message: system,
            tools: tools
                .iter()
                .map(|tool| SessionTool {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                    handler: tool_handler(&tool.name, executor.clone()),
                })
                .collect(),
            streaming,
        }
    }

    async fn open_session(
        &self,
        messages: &[Message],
        tools: &[Tool],
        executor: Option<ToolExecutor>,
        options: &ChatOptions,
        streaming: bool,
    ) -> Result<(Arc<dyn CopilotSession>, SessionGuard, String), ProviderError> {
        let (system, history) = split_system(messages);
        let prompt = format_history(&history);
        let config = self.session_config(system, tools, executor, options, streaming);

        let session = self.client().await?.create_session(config).await?;
        debug!(session = session.id(), streaming, "copilot session created");
        let guard = SessionGuard::new(Arc::clone(&session));
        Ok((session, guard, prompt))
    }
}

fn tool_handler(name: &str, executor: Option<ToolExecutor>) -> ToolHandler {
    let Some(executor) = executor else {
        return Arc::new(|_args: Value| async { error_value(TOOL_UNAVAILABLE) }.boxed());
    };
    let name = name.to_string();
    Arc::new(move |args: Value| {
        let executor = Arc::clone(&executor);
        let name = name.clone();
        async move {
            match executor(name.clone(), args).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %name, error = %e, "copilot tool call failed");
                    error_value(e)
                }
            }
        }
        .boxed()
    })
}

/// Flatten the conversation into the single prompt a Copilot turn accepts. Turns
/// without text (an assistant turn that only called tools) keep their role marker.
fn format_history(messages: &[&Message]) -> String {
    messages
        .iter()
        .map(|message| match message.role {
            Role::Assistant => format!("Assistant: {}", message.content),
            _ => format!("User: {}", message.content),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Owns a live session. `release` destroys it in-line; dropping the guard without
/// releasing (an abandoned stream) aborts the pending turn and destroys it in the
/// background.
struct SessionGuard {
    session: Option<Arc<dyn CopilotSession>>,
    request: Option<JoinHandle<()>>,
}

impl SessionGuard {
    fn new(session: Arc<dyn CopilotSession>) -> Self {
        Self {
            session: Some(session),
            request: None,
        }
    }

    async fn release(mut self) {
        self.request.take();
        if let Some(session) = self.session.take() {
            destroy(session).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            request.abort();
        }
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(destroy(session));
            }
            Err(_) => warn!(session = session.id(), "no runtime to destroy copilot session"),
        }
    }
}

async fn destroy(session: Arc<dyn CopilotSession>) {
    if let Err(e) = session.destroy().await {
        warn!(session = session.id(), error = %e, "failed to destroy copilot session");
    }
}

#[async_trait]
impl Provider for CopilotProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Copilot
    }

    fn get_model_config(&self) -> &ModelConfig {
        &self.config.model
    }

    #[tracing::instrument(skip_all, fields(provider = "copilot"))]
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let (session, guard, prompt) = self
            .open_session(messages, tools, executor, options, false)
            .await?;
        if prompt.is_empty() {
            guard.release().await;
            return Ok(ChatResponse::text(""));
        }

        let result = session.send_and_wait(&prompt).await;
        guard.release().await;

        let content = result?
            .as_ref()
            .and_then(|event| event.message_content())
            .unwrap_or_default()
            .to_string();
        Ok(ChatResponse::text(content))
    }

    #[tracing::instrument(skip_all, fields(provider = "copilot"))]
    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let (session, mut guard, prompt) = self
            .open_session(messages, tools, executor, options, true)
            .await?;
        if prompt.is_empty() {
            guard.release().await;
            return Ok(futures::stream::iter([Ok(StreamChunk::Done)]).boxed());
        }

        let mux = StreamMultiplexer::<StreamChunk, ProviderError>::new();
        let sender = mux.sender();
        let saw_delta = AtomicBool::new(false);
        session.on(Arc::new(move |event: &SessionEvent| {
            if let Some(delta) = event.delta_content() {
                saw_delta.store(true, Ordering::SeqCst);
                sender.push(StreamChunk::Content(delta.to_string()));
            } else if let Some(content) = event.message_content() {
                // Backends that skip deltas still deliver the full text once
                if !saw_delta.load(Ordering::SeqCst) && !content.is_empty() {
                    sender.push(StreamChunk::Content(content.to_string()));
                }
            }
        }));

        let completion = mux.completion();
        guard.request = Some(tokio::spawn(async move {
            let result = session.send_and_wait(&prompt).await.map(|_| ());
            completion.complete(result);
        }));

        let stream = try_stream! {
            let outcome = loop {
                match mux.next().await {
                    Some(Ok(chunk)) => yield chunk,
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                }
            };
            guard.release().await;
            outcome?;
            yield StreamChunk::Done;
        };
        Ok(stream.boxed())
    }

    async fn list_models(&self) -> Vec<String> {
        let listed = match self.client().await {
            Ok(client) => client.list_models().await,
            Err(e) => Err(e),
        };
        match listed {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => fallback_models(),
            Err(e) => {
                warn!(error = %e, "copilot model listing failed, using fallback list");
                fallback_models()
            }
        }
    }
}

fn fallback_models() -> Vec<String> {
    COPILOT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
}
