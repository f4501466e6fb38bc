//! Front door to whichever provider adapter is active.
use std::sync::{Arc, PoisonError, RwLock};

use mcp_core::tool::Tool;
use tracing::info;

use crate::message::{ChatOptions, ChatResponse, Message};
use crate::providers::{
    self, ChunkStream, Provider, ProviderConfig, ProviderError, ProviderKind, ToolExecutor,
};

pub struct Orchestrator {
    provider: RwLock<Arc<dyn Provider>>,
}

impl Orchestrator {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self::with_provider(Arc::from(providers::create(config)?)))
    }

    pub fn with_provider(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider: RwLock::new(provider),
        }
    }

    /// Replace the active adapter. Calls already in flight finish on the old one.
    pub fn set_provider(&self, config: ProviderConfig) -> Result<(), ProviderError> {
        let provider: Arc<dyn Provider> = Arc::from(providers::create(config)?);
        info!(provider = %provider.kind(), "switching provider");
        *self
            .provider
            .write()
            .unwrap_or_else(PoisonError::into_inner) = provider;
        Ok(())
    }

    pub fn provider(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.provider.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider().kind()
    }

    pub async fn chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.provider()
            .chat(messages, tools, executor, options)
            .await
    }

    pub async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        self.provider()
            .stream_chat(messages, tools, executor, options)
            .await
    }

    pub async fn list_models(&self) -> Vec<String> {
        self.provider().list_models().await
    }
}
