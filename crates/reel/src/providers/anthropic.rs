use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::warn;

use super::base::{ChunkStream, Provider, ProviderKind, ToolExecutor};
use super::configs::{AnthropicProviderConfig, ProviderModelConfig};
use super::errors::ProviderError;
use super::sse;
use super::streaming::PartialToolCalls;
use super::tool_mapper::ToolFormat;
use super::utils::{emit_debug_trace, ensure_success, handle_response, insert_field, usage_from};
use crate::message::{split_system, ChatOptions, ChatResponse, Message, Role, StreamChunk};
use crate::model::ModelConfig;
use mcp_core::tool::Tool;

const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: i32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn messages_to_anthropic_spec(messages: &[&Message]) -> Vec<Value> {
        messages
            .iter()
            // Skip messages with empty content
            .filter(|message| !message.content.is_empty())
            .map(|message| {
                let role = match message.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };
                json!({
                    "role": role,
                    "content": [{"type": "text", "text": message.content}]
                })
            })
            .collect()
    }

    fn parse_anthropic_response(response: &Value) -> Result<ChatResponse, ProviderError> {
        let content_blocks = response
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| {
                ProviderError::RequestFailed(
                    "Invalid response format: missing content array".to_string(),
                )
            })?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in content_blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => tool_calls.push(ToolFormat::Anthropic.parse_tool_call(block)?),
                _ => continue,
            }
        }

        Ok(ChatResponse::text(text).with_tool_calls(tool_calls))
    }

    fn create_payload(
        &self,
        messages: &[Message],
        tools: &[Tool],
        options: &ChatOptions,
    ) -> Result<Value, ProviderError> {
        let (system, conversation) = split_system(messages);
        let anthropic_messages = Self::messages_to_anthropic_spec(&conversation);

        // Check if we have any messages to send
        if anthropic_messages.is_empty() {
            return Err(ProviderError::RequestFailed(
                "No valid messages to send to Anthropic API".to_string(),
            ));
        }

        let model = &self.config.model;
        let mut payload = json!({
            "model": options.model_or(&model.model_name),
            "messages": anthropic_messages,
            "max_tokens": model.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
        });

        if let Some(system) = system {
            insert_field(&mut payload, "system", json!(system));
        }

        let tool_specs = ToolFormat::Anthropic.tool_specs(tools);
        if !tool_specs.is_empty() {
            insert_field(&mut payload, "tools", json!(tool_specs));
        }

        if let Some(temp) = model.temperature {
            insert_field(&mut payload, "temperature", json!(temp));
        }

        Ok(payload)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.host.trim_end_matches('/'), path)
    }

    async fn post(&self, payload: &Value) -> Result<Response, ProviderError> {
        let response = self
            .request(self.client.post(self.url("v1/messages")))
            .json(payload)
            .send()
            .await?;
        Ok(response)
    }

    /// Decode the messages SSE stream. Tool input arrives as `input_json_delta`
    /// fragments per content block and is complete at that block's `content_block_stop`.
    fn chunks(response: Response) -> impl Stream<Item = Result<StreamChunk, ProviderError>> + Send {
        try_stream! {
            let mut events = Box::pin(sse::data_events(response));
            let mut partials = PartialToolCalls::new();

            while let Some(data) = events.next().await {
                let data = data?;
                let event: Value = match serde_json::from_str(&data) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "skipping undecodable anthropic event");
                        continue;
                    }
                };
                let index = event.get("index").and_then(Value::as_u64).unwrap_or_default();

                match event.get("type").and_then(Value::as_str) {
                    Some("content_block_start") => {
                        let block = &event["content_block"];
                        if block["type"] == "tool_use" {
                            partials.push(index, block["id"].as_str(), block["name"].as_str(), "");
                        }
                    }
                    Some("content_block_delta") => {
                        let delta = &event["delta"];
                        match delta["type"].as_str() {
                            Some("text_delta") => {
                                if let Some(text) = delta["text"].as_str().filter(|t| !t.is_empty()) {
                                    yield StreamChunk::Content(text.to_string());
                                }
                            }
                            Some("input_json_delta") => {
                                let fragment = delta["partial_json"].as_str().unwrap_or_default();
                                partials.push(index, None, None, fragment);
                            }
                            _ => {}
                        }
                    }
                    Some("content_block_stop") => {
                        if let Some(call) = partials.finish(index) {
                            yield StreamChunk::ToolCall(call);
                        }
                    }
                    Some("message_stop") => break,
                    Some("error") => {
                        let message = event["error"]["message"].as_str().unwrap_or("stream error");
                        Err::<(), _>(ProviderError::ServerError(message.to_string()))?;
                    }
                    _ => {}
                }
            }

            let unterminated = partials.discard();
            if unterminated > 0 {
                warn!(unterminated, "anthropic stream ended mid tool call");
            }
            yield StreamChunk::Done;
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn get_model_config(&self) -> &ModelConfig {
        self.config.model_config()
    }

    #[tracing::instrument(skip_all, fields(provider = "anthropic"))]
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        _executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let payload = self.create_payload(messages, tools, options)?;

        let response = self.post(&payload).await?;
        let response = handle_response(&payload, response).await?;

        let reply = Self::parse_anthropic_response(&response)?;
        let usage = usage_from(&response, "usage", "input_tokens", "output_tokens");
        emit_debug_trace(&self.config.model, &payload, &response, &usage);
        Ok(reply)
    }

    #[tracing::instrument(skip_all, fields(provider = "anthropic"))]
    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        _executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let mut payload = self.create_payload(messages, tools, options)?;
        insert_field(&mut payload, "stream", json!(true));

        let response = self.post(&payload).await?;
        let response = ensure_success(&payload, response).await?;
        Ok(Box::pin(Self::chunks(response)))
    }

    async fn list_models(&self) -> Vec<String> {
        let result = async {
            let response = self
                .request(self.client.get(self.url("v1/models")))
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
                warn!(error = %e, "failed to list anthropic models");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> AnthropicProvider {
        let config = AnthropicProviderConfig {
            host: server.uri(),
            api_key: "test_api_key".to_string(),
            model: ModelConfig::new("claude-3-5-sonnet-20241022").with_temperature(Some(0.7)),
        };
        AnthropicProvider::new(config).unwrap()
    }

    async fn setup_mock_server(response: ResponseTemplate) -> (MockServer, AnthropicProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test_api_key"))
            .and(header("anthropic-version", ANTHROPIC_API_VERSION))
            .respond_with(response)
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server);
        (mock_server, provider)
    }

    fn sse_body(events: &[Value]) -> String {
        events
            .iter()
            .map(|e| format!("event: {}\ndata: {}\n\n", e["type"].as_str().unwrap(), e))
            .collect()
    }

    fn tool_stream(fragments: &[&str]) -> Vec<Value> {
        let mut events = vec![
            json!({"type": "message_start", "message": {"id": "msg_1"}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Trimming"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1,
                   "content_block": {"type": "tool_use", "id": "toolu_1", "name": "foo", "input": {}}}),
        ];
        for fragment in fragments {
            events.push(json!({"type": "content_block_delta", "index": 1,
                               "delta": {"type": "input_json_delta", "partial_json": fragment}}));
        }
        events.push(json!({"type": "content_block_stop", "index": 1}));
        events.push(json!({"type": "content_block_start", "index": 2, "content_block": {"type": "text", "text": ""}}));
        events.push(json!({"type": "content_block_delta", "index": 2, "delta": {"type": "text_delta", "text": " done"}}));
        events.push(json!({"type": "content_block_stop", "index": 2}));
        events.push(json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}));
        events.push(json!({"type": "message_stop"}));
        events
    }

    fn event_stream(events: &[Value]) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(sse_body(events))
    }

    #[tokio::test]
    async fn test_chat_basic() {
        let response_body = json!({
            "id": "msg_123",
            "type": "message",
            "role": "assistant",
            "content": [{
                "type": "text",
                "text": "Hello! How can I assist you today?"
            }],
            "model": "claude-3-5-sonnet-latest",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 15}
        });
        let (server, provider) =
            setup_mock_server(ResponseTemplate::new(200).set_body_json(response_body)).await;

        let messages = vec![Message::system("You are a video editor."), Message::user("Hello?")];
        let reply = provider
            .chat(&messages, &[], None, &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(reply.content, "Hello! How can I assist you today?");
        assert!(!reply.has_tool_calls());

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["system"], "You are a video editor.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], 4096);
        assert!(body.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_chat_with_tools() {
        let response_body = json!({
            "content": [
                {"type": "text", "text": "Let me calculate."},
                {"type": "tool_use", "id": "tool_1", "name": "calculator", "input": {"expression": "2 + 2"}}
            ],
            "usage": {"input_tokens": 15, "output_tokens": 20}
        });
        let (server, provider) =
            setup_mock_server(ResponseTemplate::new(200).set_body_json(response_body)).await;

        let tool = Tool::new(
            "calculator",
            "Calculate mathematical expressions",
            json!({
                "type": "object",
                "properties": {"expression": {"type": "string"}}
            }),
        );
        let reply = provider
            .chat(
                &[Message::user("What is 2 + 2?")],
                &[tool],
                None,
                &ChatOptions::with_model("claude-3-opus-20240229"),
            )
            .await
            .unwrap();

        assert_eq!(reply.content, "Let me calculate.");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].tool_name, "calculator");
        assert_eq!(reply.tool_calls[0].tool_call_id, "tool_1");
        assert_eq!(reply.tool_calls[0].args, json!({"expression": "2 + 2"}));

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["model"], "claude-3-opus-20240229");
        assert_eq!(body["tools"][0]["name"], "calculator");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[tokio::test]
    async fn test_chat_auth_error_propagates() {
        let (_server, provider) =
            setup_mock_server(ResponseTemplate::new(401).set_body_string("bad key")).await;
        let err = provider
            .chat(&[Message::user("hi")], &[], None, &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_stream_assembles_fragmented_tool_input() {
        let (_server, provider) =
            setup_mock_server(event_stream(&tool_stream(&["{\"a", "\":1", "}"]))).await;

        let chunks: Vec<StreamChunk> = provider
            .stream_chat(&[Message::user("go")], &[], None, &ChatOptions::default())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            chunks,
            vec![
                StreamChunk::Content("Trimming".into()),
                StreamChunk::ToolCall(crate::message::ToolCall::new("foo", "toolu_1", json!({"a": 1}))),
                StreamChunk::Content(" done".into()),
                StreamChunk::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_drops_malformed_tool_input() {
        let (_server, provider) =
            setup_mock_server(event_stream(&tool_stream(&["{\"a", "\":"]))).await;

        let chunks: Vec<StreamChunk> = provider
            .stream_chat(&[Message::user("go")], &[], None, &ChatOptions::default())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            chunks,
            vec![
                StreamChunk::Content("Trimming".into()),
                StreamChunk::Content(" done".into()),
                StreamChunk::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_stream_yields_single_done() {
        let events = vec![
            json!({"type": "message_start", "message": {"id": "msg_1"}}),
            json!({"type": "message_stop"}),
        ];
        let (_server, provider) = setup_mock_server(event_stream(&events)).await;

        let chunks: Vec<StreamChunk> = provider
            .stream_chat(&[Message::user("go")], &[], None, &ChatOptions::default())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks, vec![StreamChunk::Done]);
    }

    #[tokio::test]
    async fn test_stream_error_event_ends_stream() {
        let events = vec![
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}}),
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        ];
        let (_server, provider) = setup_mock_server(event_stream(&events)).await;

        let mut stream = provider
            .stream_chat(&[Message::user("go")], &[], None, &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), StreamChunk::Content("Hi".into()));
        assert!(matches!(stream.next().await, Some(Err(ProviderError::ServerError(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_establishing_error_is_returned_directly() {
        let (_server, provider) = setup_mock_server(ResponseTemplate::new(429)).await;
        let result = provider
            .stream_chat(&[Message::user("go")], &[], None, &ChatOptions::default())
            .await;
        assert!(matches!(result, Err(ProviderError::RateLimitExceeded(_))));
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "claude-3-5-sonnet-20241022"}, {"id": "claude-3-opus-20240229"}]
            })))
            .mount(&server)
            .await;
        let provider = provider_for(&server);
        assert_eq!(
            provider.list_models().await,
            vec!["claude-3-5-sonnet-20241022", "claude-3-opus-20240229"]
        );
    }

    #[tokio::test]
    async fn test_list_models_failure_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        assert!(provider_for(&server).list_models().await.is_empty());
    }
}
