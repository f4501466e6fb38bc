use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use mcp_core::tool::Tool;

use super::base::{ChunkStream, Provider, ProviderKind, ToolExecutor};
use super::errors::ProviderError;
use crate::message::{ChatOptions, ChatResponse, Message, StreamChunk};
use crate::model::ModelConfig;

/// One scripted turn of a [`MockProvider`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Response(ChatResponse),
    /// Streamed as these content chunks, then the response's tool calls, then `Done`.
    Chunks(Vec<String>, ChatResponse),
    Error(String),
}

impl From<ChatResponse> for MockReply {
    fn from(response: ChatResponse) -> Self {
        MockReply::Response(response)
    }
}

/// A request the mock received.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub had_executor: bool,
    pub options: ChatOptions,
}

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    replies: Arc<Mutex<Vec<MockReply>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    model_config: ModelConfig,
    models: Vec<String>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new<I, R>(replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<MockReply>,
    {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().map(Into::into).collect())),
            calls: Arc::new(Mutex::new(Vec::new())),
            model_config: ModelConfig::new("mock"),
            models: vec!["mock".to_string()],
        }
    }

    pub fn with_models<I: IntoIterator<Item = S>, S: Into<String>>(mut self, models: I) -> Self {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Every request received so far, oldest first.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next_reply(
        &self,
        messages: &[Message],
        tools: &[Tool],
        executor: &Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> MockReply {
        self.calls.lock().unwrap().push(MockCall {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            had_executor: executor.is_some(),
            options: options.clone(),
        });
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            // Return empty response if no more pre-configured responses
            MockReply::Response(ChatResponse::text(""))
        } else {
            replies.remove(0)
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Custom
    }

    fn get_model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        match self.next_reply(messages, tools, &executor, options) {
            MockReply::Response(response) | MockReply::Chunks(_, response) => Ok(response),
            MockReply::Error(message) => Err(ProviderError::ServerError(message)),
        }
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let (texts, response) = match self.next_reply(messages, tools, &executor, options) {
            MockReply::Response(response) => {
                let texts = if response.content.is_empty() {
                    Vec::new()
                } else {
                    vec![response.content.clone()]
                };
                (texts, response)
            }
            MockReply::Chunks(texts, response) => (texts, response),
            MockReply::Error(message) => return Err(ProviderError::ServerError(message)),
        };

        let chunks: Vec<Result<StreamChunk, ProviderError>> = texts
            .into_iter()
            .map(StreamChunk::Content)
            .chain(response.tool_calls.into_iter().map(StreamChunk::ToolCall))
            .chain(std::iter::once(StreamChunk::Done))
            .map(Ok)
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn list_models(&self) -> Vec<String> {
        self.models.clone()
    }
}
