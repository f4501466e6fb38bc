use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

use super::base::{ChunkStream, Provider, ProviderKind, ToolExecutor};
use super::configs::{GoogleProviderConfig, ProviderModelConfig};
use super::errors::ProviderError;
use super::sse;
use super::tool_mapper::ToolFormat;
use super::utils::{emit_debug_trace, ensure_success, handle_response, insert_field, usage_from};
use crate::message::{split_system, ChatOptions, ChatResponse, Message, Role, StreamChunk, ToolCall};
use crate::model::ModelConfig;
use mcp_core::tool::Tool;

pub struct GoogleProvider {
    client: Client,
    config: GoogleProviderConfig,
}

impl GoogleProvider {
    pub fn new(config: GoogleProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn messages_to_google_spec(messages: &[&Message]) -> Vec<Value> {
        messages
            .iter()
            .filter(|message| !message.content.is_empty())
            .map(|message| {
                let role = match message.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                json!({"role": role, "parts": [{"text": message.content}]})
            })
            .collect()
    }

    fn create_payload(&self, messages: &[Message], tools: &[Tool]) -> Value {
        let (system, conversation) = split_system(messages);
        let mut payload = json!({
            "contents": Self::messages_to_google_spec(&conversation),
        });

        if let Some(system) = system {
            insert_field(
                &mut payload,
                "systemInstruction",
                json!({"parts": [{"text": system}]}),
            );
        }

        let declarations = ToolFormat::Google.tool_specs(tools);
        if !declarations.is_empty() {
            insert_field(
                &mut payload,
                "tools",
                json!([{"functionDeclarations": declarations}]),
            );
        }

        let model = &self.config.model;
        let mut generation_config = serde_json::Map::new();
        if let Some(temp) = model.temperature {
            generation_config.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = model.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(tokens));
        }
        if !generation_config.is_empty() {
            insert_field(&mut payload, "generationConfig", Value::Object(generation_config));
        }

        payload
    }

    /// Text and function calls from the first candidate of one response (or stream chunk).
    fn parse_candidate(response: &Value) -> Result<(String, Vec<ToolCall>), ProviderError> {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        let parts = response["candidates"][0]["content"]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for part in &parts {
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                text.push_str(t);
            }
            if let Some(call) = part.get("functionCall") {
                tool_calls.push(ToolFormat::Google.parse_tool_call(call)?);
            }
        }

        Ok((text, tool_calls))
    }

    fn url(&self, method: &str, model: &str, extra: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let model = model.trim_start_matches("models/");
        let mut url = Url::parse(&format!(
            "{}/v1beta/models/{}:{}",
            self.config.host.trim_end_matches('/'),
            model,
            method
        ))
        .map_err(|e| ProviderError::Configuration(format!("Invalid Google host: {e}")))?;
        url.query_pairs_mut()
            .extend_pairs(extra)
            .append_pair("key", &self.config.api_key);
        Ok(url)
    }

    async fn post(&self, url: Url, payload: &Value) -> Result<Response, ProviderError> {
        let response = self.client.post(url).json(payload).send().await?;
        Ok(response)
    }

    /// Each SSE event is a complete `GenerateContentResponse`; function calls are
    /// never fragmented so they are yielded as soon as they appear.
    fn chunks(response: Response) -> impl Stream<Item = Result<StreamChunk, ProviderError>> + Send {
        try_stream! {
            let mut events = Box::pin(sse::data_events(response));

            while let Some(data) = events.next().await {
                let data = data?;
                let event: Value = match serde_json::from_str(&data) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "skipping undecodable google chunk");
                        continue;
                    }
                };
                if let Some(error) = event.get("error") {
                    let message = error["message"].as_str().unwrap_or("stream error");
                    Err::<(), _>(ProviderError::ServerError(message.to_string()))?;
                }

                let (text, tool_calls) = match Self::parse_candidate(&event) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed google function call");
                        continue;
                    }
                };
                if !text.is_empty() {
                    yield StreamChunk::Content(text);
                }
                for call in tool_calls {
                    yield StreamChunk::ToolCall(call);
                }
            }

            yield StreamChunk::Done;
        }
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn get_model_config(&self) -> &ModelConfig {
        self.config.model_config()
    }

    #[tracing::instrument(skip_all, fields(provider = "google"))]
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        _executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let payload = self.create_payload(messages, tools);
        let model = options.model_or(&self.config.model.model_name);
        let url = self.url("generateContent", model, &[])?;

        let response = self.post(url, &payload).await?;
        let response = handle_response(&payload, response).await?;

        let (content, tool_calls) = Self::parse_candidate(&response)?;
        let usage = usage_from(
            &response,
            "usageMetadata",
            "promptTokenCount",
            "candidatesTokenCount",
        );
        emit_debug_trace(&self.config.model, &payload, &response, &usage);
        Ok(ChatResponse::text(content).with_tool_calls(tool_calls))
    }

    #[tracing::instrument(skip_all, fields(provider = "google"))]
    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[Tool],
        _executor: Option<ToolExecutor>,
        options: &ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let payload = self.create_payload(messages, tools);
        let model = options.model_or(&self.config.model.model_name);
        let url = self.url("streamGenerateContent", model, &[("alt", "sse")])?;

        let response = self.post(url, &payload).await?;
        let response = ensure_success(&payload, response).await?;
        Ok(Box::pin(Self::chunks(response)))
    }

    async fn list_models(&self) -> Vec<String> {
        let result = async {
            let mut url = Url::parse(&format!(
                "{}/v1beta/models",
                self.config.host.trim_end_matches('/')
            ))
            .map_err(|e| ProviderError::Configuration(format!("Invalid Google host: {e}")))?;
            url.query_pairs_mut().append_pair("key", &self.config.api_key);
            let response = self.client.get(url).send().await?;
            handle_response(&json!({}), response).await
        }
        .await;

        match result {
            Ok(body) => body["models"]
                .as_array()
                .map(|models| {
                    models
                        .iter()
                        .filter(|m| {
                            m["supportedGenerationMethods"]
                                .as_array()
                                .map(|methods| methods.iter().any(|v| v == "generateContent"))
                                .unwrap_or(true)
                        })
                        .filter_map(|m| m["name"].as_str())
                        .map(|name| name.trim_start_matches("models/").to_string())
                        .collect()
                })
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "failed to list google models");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> GoogleProvider {
        GoogleProvider::new(GoogleProviderConfig {
            host: server.uri(),
            api_key: "test_api_key".to_string(),
            model: ModelConfig::new("gemini-1.5-pro").with_temperature(Some(0.3)),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_chat_text_and_function_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
            .and(query_param("key", "test_api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [
                            {"text": "Extracting frames."},
                            {"functionCall": {"name": "extract_frames", "args": {"fps": 1}}}
                        ]
                    },
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 4}
            })))
            .mount(&server)
            .await;
        let provider = provider_for(&server);

        let tool = Tool::new("extract_frames", "Extract frames", json!({"type": "object"}));
        let messages = vec![
            Message::system("You edit video."),
            Message::user("frames please"),
            Message::assistant(""),
            Message::assistant("Sure"),
        ];
        let reply = provider
            .chat(&messages, &[tool], None, &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(reply.content, "Extracting frames.");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].tool_name, "extract_frames");
        assert_eq!(reply.tool_calls[0].args, json!({"fps": 1}));
        assert!(!reply.tool_calls[0].tool_call_id.is_empty());

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You edit video.");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            "extract_frames"
        );
        let temperature = body["generationConfig"]["temperature"].as_f64().unwrap();
        assert!((temperature - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_chat_model_override_in_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "ok"}]}}]
            })))
            .mount(&server)
            .await;
        let provider = provider_for(&server);

        let reply = provider
            .chat(&[Message::user("hi")], &[], None, &ChatOptions::with_model("models/gemini-2.0-flash"))
            .await
            .unwrap();
        assert_eq!(reply.content, "ok");

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_stream() {
        let server = MockServer::start().await;
        let body = [
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Cutting"}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"name": "cut", "args": {"at": 3}}}
            ]}}]}),
        ]
        .iter()
        .map(|c| format!("data: {c}\r\n\r\n"))
        .collect::<String>();
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-pro:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;
        let provider = provider_for(&server);

        let chunks: Vec<StreamChunk> = provider
            .stream_chat(&[Message::user("cut at 3")], &[], None, &ChatOptions::default())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], StreamChunk::Content("Cutting".into()));
        match &chunks[1] {
            StreamChunk::ToolCall(call) => {
                assert_eq!(call.tool_name, "cut");
                assert_eq!(call.args, json!({"at": 3}));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert_eq!(chunks[2], StreamChunk::Done);
    }

    #[tokio::test]
    async fn test_list_models_strips_prefix_and_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models"))
            .and(query_param("key", "test_api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [
                    {"name": "models/gemini-1.5-pro", "supportedGenerationMethods": ["generateContent"]},
                    {"name": "models/embedding-001", "supportedGenerationMethods": ["embedContent"]}
                ]
            })))
            .mount(&server)
            .await;
        assert_eq!(provider_for(&server).list_models().await, vec!["gemini-1.5-pro"]);
    }

    #[tokio::test]
    async fn test_server_error_maps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let err = provider_for(&server)
            .chat(&[Message::user("hi")], &[], None, &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ServerError(_)));
    }
}
