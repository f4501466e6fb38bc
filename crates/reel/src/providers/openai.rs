use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::warn;

use super::base::{ChunkStream, Provider, ProviderKind, ToolExecutor};
use super::configs::{OpenAiProviderConfig, ProviderModelConfig};
use super::errors::ProviderError;
use super::sse;
use super::streaming::PartialToolCalls;
use super::tool_mapper::ToolFormat;
use super::utils::{emit_debug_trace, ensure_success, handle_response, insert_field, usage_from};
use crate::message::{split_system, ChatOptions, ChatResponse, Message, Role, StreamChunk};
use crate::model::ModelConfig;
use mcp_core::tool::Tool;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    /// System instructions stay in the message list, collapsed into one leading entry.
    fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
        let (system, conversation) = split_system(messages);
        let mut openai_messages = Vec::with_capacity(conversation.len() + 1);

        if let Some(system) = system {
            openai_messages.push(json!({"role": "system", "content": system}));
        }
        for message in conversation {
            let role = match message.role {
                Role::Assistant => "assistant",
                _ => "user",
            };
            openai_messages.push(json!({"role": role, "content": message.content}));
        }

        openai_messages
    }

    fn create_payload(&self, messages: &[Message], tools: &[Tool], options: &ChatOptions) -> Value {
        let model = &self.config.model;
        let mut payload = json!({
            "model": options.model_or(&model.model_name),
            "messages": Self::messages_to_openai_spec(messages),
        });

        let tool_specs = ToolFormat::OpenAi.tool_specs(tools);
        if !tool_specs.is_empty() {
            insert_field(&mut payload, "tools", json!(tool_specs));
        }
        if let Some(temp) = model.temperature {
            insert_field(&mut payload, "temperature", json!(temp));
        }
        if let Some(tokens) = model.max_tokens {
            insert_field(&mut payload, "max_tokens", json!(tokens));
        }

        payload
    }

    fn parse_openai_response(response: &Value) -> Result<ChatResponse, ProviderError> {
        if let Some(error) = response.get("error") {
            return Err(ProviderError::RequestFailed(
                error["message"].as_str().unwrap_or("unknown error").to_string(),
            ));
        }

        let message = &response["choices"][0]["message"];
        let content = message["content"].as_str().unwrap_or_default();
        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|call| ToolFormat::OpenAi.parse_tool_call(call))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(ChatResponse::text(content).with_tool_calls(tool_calls))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.host.trim_end_matches('/'), path)
    }

    async fn post(&self, payload: &Value) -> Result<Response, ProviderError> {
        let response = self
            .client
            .post(self.url("v1/chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(payload)
            .send()
            .await?;
        Ok(response)
    }

    /// Decode the chat-completions SSE stream. Tool calls arrive as `delta.tool_calls`
    /// entries keyed by `index`; the id and name come first, arguments follow as string
    /// fragments. A `finish_reason` or the `[DONE]` sentinel completes them.
    fn chunks(response: Response) -> impl Stream<Item = Result<StreamChunk, ProviderError>> + Send {
        try_stream! {
            let mut events = Box::pin(sse::data_events(response));
            let mut partials = PartialToolCalls::new();

            while let Some(data) = events.next().await {
                let data = data?;
                if data.trim() == "[DONE]" {
                    for call in partials.finish_all() {
                        yield StreamChunk::ToolCall(call);
                    }
                    break;
                }

                let event: Value = match serde_json::from_str(&data) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "skipping undecodable openai chunk");
                        continue;
                    }
                };
                if let Some(error) = event.get("error") {
                    let message = error["message"].as_str().unwrap_or("stream error");
                    Err::<(), _>(ProviderError::ServerError(message.to_string()))?;
                }

                let choice = &event["choices"][0];
                let delta = &choice["delta"];
                if let Some(text) = delta["content"].as_str().filter(|t| !t.is_empty()) {
                    yield StreamChunk::Content(text.to_string());
                }
                if let Some(calls) = delta["tool_calls"].as_array() {
                    for call in calls {
                        let index = call["index"].as_u64().unwrap_or_default();
                        let function = &call["function"];
                        partials.push(
                            index,
                            call["id"].as_str(),
                            function["name"].as_str(),
                            function["arguments"].as_str().unwrap_or_default(),
                        );
                    }
                }
                if !choice["finish_reason"].is_null() {
                    for call in partials.finish_all() {
                        yield StreamChunk::ToolCall(call);
                    }
                }
            }

            let unterminated = partials.discard();
            if unterminated > 0 {
                warn!(unterminated, "openai stream ended mid tool call");
            }
            yield StreamChunk::Done;
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn get_model_config(&self) -> &ModelConfig {
        self.config.model_config()
    }

    #[tracing::instrument(skip_all, fields(provider = "openai"))]
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        _executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let payload = self.create_payload(messages, tools, options);

        let response = self.post(&payload).await?;
        let response = handle_response(&payload, response).await?;

        let reply = Self::parse_openai_response(&response)?;
        let usage = usage_from(&response, "usage", "prompt_tokens", "completion_tokens");
        emit_debug_trace(&self.config.model, &payload, &response, &usage);
        Ok(reply)
    }

    #[tracing::instrument(skip_all, fields(provider = "openai"))]
    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        _executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let mut payload = self.create_payload(messages, tools, options);
        insert_field(&mut payload, "stream", json!(true));

        let response = self.post(&payload).await?;
        let response = ensure_success(&payload, response).await?;
        Ok(Box::pin(Self::chunks(response)))
    }

    async fn list_models(&self) -> Vec<String> {
        let result = async {
            let response = self
                .client
                .get(self.url("v1/models"))
                .bearer_auth(&self.config.api_key)
                .send()
                .await?;
            handle_response(&json!({}), response).await
        }
        .await;

        match result {
            Ok(body) => body["data"]
                .as_array()
                .map(|models| {
                    models
                        .iter()
                        .filter_map(|m| m["id"].as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "failed to list openai models");
                Vec::new()
            }
        }
    }
}
