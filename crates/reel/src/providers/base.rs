use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::ProviderError;
use crate::message::{ChatOptions, ChatResponse, Message, StreamChunk};
use crate::model::ModelConfig;
use mcp_core::tool::Tool;

/// Callback a provider may use to run tools itself instead of returning tool calls.
/// Receives the tool name and arguments.
pub type ToolExecutor =
    Arc<dyn Fn(String, Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// The lazy, single-consumer stream returned by [`Provider::stream_chat`].
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ProviderError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Google,
    Copilot,
    Custom,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Google => "google",
            ProviderKind::Copilot => "copilot",
            ProviderKind::Custom => "custom",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Base trait for model providers (Anthropic, OpenAI, Google, ...)
///
/// Adapters translate the neutral conversation model to their vendor's wire format
/// and back. Streams must end with exactly one [`StreamChunk::Done`] unless they
/// end in an error.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Get the model configuration
    fn get_model_config(&self) -> &ModelConfig;

    /// Produce one complete reply to the conversation.
    ///
    /// `tools` may be empty, in which case no tool schema is sent. The executor is
    /// only used by providers that run tools in-process.
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError>;

    /// Stream a reply. Errors establishing the stream are returned directly; errors
    /// after the first chunk arrive as the stream's final item.
    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChunkStream, ProviderError>;

    /// Model identifiers this provider can serve. Never fails: an unreachable
    /// catalog yields an empty list (or the provider's static fallback).
    async fn list_models(&self) -> Vec<String>;
}
