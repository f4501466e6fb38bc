use async_trait::async_trait;

use super::base::{ChunkStream, Provider, ProviderKind, ToolExecutor};
use super::configs::OpenAiProviderConfig;
use super::errors::ProviderError;
use super::openai::OpenAiProvider;
use crate::message::{ChatOptions, ChatResponse, Message};
use crate::model::ModelConfig;
use mcp_core::tool::Tool;

/// An OpenAI-compatible endpoint at a caller-supplied host.
///
/// Such endpoints rarely implement a trustworthy model catalog, so none is reported.
pub struct CustomProvider {
    inner: OpenAiProvider,
}

impl CustomProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            inner: OpenAiProvider::new(config)?,
        })
    }
}

#[async_trait]
impl Provider for CustomProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Custom
    }

    fn get_model_config(&self) -> &ModelConfig {
        self.inner.get_model_config()
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.inner.chat(messages, tools, executor, options).await
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        self.inner.stream_chat(messages, tools, executor, options).await
    }

    async fn list_models(&self) -> Vec<String> {
        Vec::new()
    }
}
