//! The bounded multi-round conversation driver.
//!
//! Each round sends the conversation to the model, appends its reply, and runs every
//! requested tool in order before asking again. Tool failures are folded into the
//! transcript; a failed model call ends the whole run.
use std::sync::Arc;

use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use mcp_core::tool::Tool;
use tracing::{debug, info, instrument, warn};

use super::tool_execution::{execute_tool_call, registry_executor};
use crate::message::{ChatOptions, ChatResponse, Message, StreamChunk, ToolCall, ToolResult};
use crate::orchestrator::Orchestrator;
use crate::providers::{ProviderError, ToolExecutor};
use crate::tool_servers::{ToolInvoker, ToolServerRegistry};

pub const DEFAULT_MAX_ROUNDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingModel,
    ExecutingTools,
    Done,
}

/// The outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    /// Content of the last assistant message.
    pub content: String,
    /// Tool rounds executed.
    pub rounds: usize,
    /// The round bound was hit while the model still wanted tools.
    pub truncated: bool,
    /// The full transcript, including the messages passed in.
    pub messages: Vec<Message>,
}

/// What a streaming run reports as it goes.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Content(String),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    Done(AgentReply),
}

#[derive(Clone)]
pub struct AgentLoop {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<ToolServerRegistry>,
    invoker: ToolInvoker,
    max_rounds: usize,
}

impl AgentLoop {
    pub fn new(orchestrator: Arc<Orchestrator>, registry: Arc<ToolServerRegistry>) -> Self {
        let invoker = ToolInvoker::new(Arc::clone(&registry));
        Self {
            orchestrator,
            registry,
            invoker,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn registry(&self) -> &Arc<ToolServerRegistry> {
        &self.registry
    }

    async fn tools(&self) -> Vec<Tool> {
        self.registry.get_tools().await.tools().to_vec()
    }

    fn executor(&self) -> ToolExecutor {
        registry_executor(Arc::clone(&self.registry), self.invoker.clone())
    }

    /// Whether the loop should stop after the model's reply in this round.
    fn next_state(&self, response: &ChatResponse, rounds: usize) -> LoopState {
        if !response.has_tool_calls() {
            LoopState::Done
        } else if rounds >= self.max_rounds {
            warn!(rounds, "round limit reached, returning last reply as-is");
            LoopState::Done
        } else {
            LoopState::ExecutingTools
        }
    }

    /// Run the conversation to completion. At most `max_rounds + 1` model calls are made.
    #[instrument(skip_all, fields(max_rounds = self.max_rounds))]
    pub async fn run(
        &self,
        mut messages: Vec<Message>,
        options: &ChatOptions,
    ) -> Result<AgentReply, ProviderError> {
        let tools = self.tools().await;
        let mut rounds = 0;

        loop {
            debug!(round = rounds, state = ?LoopState::AwaitingModel);
            let response = self
                .orchestrator
                .chat(&messages, &tools, Some(self.executor()), options)
                .await?;
            let state = self.next_state(&response, rounds);
            messages.push(
                Message::assistant(response.content.clone())
                    .with_tool_calls(response.tool_calls.clone()),
            );

            if state == LoopState::Done {
                info!(rounds, "agent loop done");
                let truncated = response.has_tool_calls();
                return Ok(AgentReply {
                    content: response.content,
                    rounds,
                    truncated,
                    messages,
                });
            }

            rounds += 1;
            for call in &response.tool_calls {
                debug!(tool = %call.tool_name, id = %call.tool_call_id, "executing tool");
                messages.push(execute_tool_call(&self.registry, &self.invoker, call).await);
            }
        }
    }

    /// Like [`AgentLoop::run`], but streams each round's reply. Every round's tool
    /// calls run after its stream has finished, in the order they arrived.
    pub fn run_streaming(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> BoxStream<'static, Result<AgentEvent, ProviderError>> {
        let this = self.clone();
        let stream = try_stream! {
            let mut messages = messages;
            let tools = this.tools().await;
            let mut rounds = 0;

            loop {
                let mut chunks = this
                    .orchestrator
                    .stream_chat(&messages, &tools, Some(this.executor()), &options)
                    .await?;

                let mut response = ChatResponse::default();
                while let Some(chunk) = chunks.next().await {
                    match chunk? {
                        StreamChunk::Content(text) => {
                            response.content.push_str(&text);
                            yield AgentEvent::Content(text);
                        }
                        StreamChunk::ToolCall(call) => {
                            response.tool_calls.push(call.clone());
                            yield AgentEvent::ToolCall(call);
                        }
                        StreamChunk::Done => break,
                    }
                }
                // Release the backend stream before running tools
                drop(chunks);

                let state = this.next_state(&response, rounds);
                messages.push(
                    Message::assistant(response.content.clone())
                        .with_tool_calls(response.tool_calls.clone()),
                );

                if state == LoopState::Done {
                    let truncated = response.has_tool_calls();
                    yield AgentEvent::Done(AgentReply {
                        truncated,
                        content: response.content,
                        rounds,
                        messages,
                    });
                    break;
                }

                rounds += 1;
                for call in &response.tool_calls {
                    let message = execute_tool_call(&this.registry, &this.invoker, call).await;
                    let results = message.tool_results.clone();
                    messages.push(message);
                    for result in results {
                        yield AgentEvent::ToolResult(result);
                    }
                }
            }
        };
        stream.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{MockProvider, MockReply};
    use crate::tool_servers::mock::{MockMcpClient, MockToolOutcome};
    use mcp_core::Content;
    use serde_json::json;

    fn echo_call(n: usize) -> ChatResponse {
        ChatResponse::text(format!("round {n}")).with_tool_calls(vec![ToolCall::new(
            "echo",
            format!("call_{n}"),
            json!({"n": n}),
        )])
    }

    async fn agent(replies: Vec<MockReply>) -> (AgentLoop, Arc<MockProvider>, Arc<MockMcpClient>) {
        let provider = Arc::new(MockProvider::new(replies));
        let client = Arc::new(
            MockMcpClient::new(vec![Tool::new("echo", "Echo", json!({"type": "object"}))])
                .with_outcome("echo", MockToolOutcome::Content(vec![Content::text("echoed")])),
        );
        let registry = Arc::new(ToolServerRegistry::new());
        registry.add_client("utility", client.clone()).await;

        let orchestrator = Arc::new(Orchestrator::with_provider(provider.clone()));
        (AgentLoop::new(orchestrator, registry), provider, client)
    }

    #[tokio::test]
    async fn test_plain_reply_finishes_in_one_call() {
        let (agent, provider, _) = agent(vec![ChatResponse::text("Hello").into()]).await;
        let reply = agent
            .run(vec![Message::user("hi")], &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(reply.content, "Hello");
        assert_eq!(reply.rounds, 0);
        assert!(!reply.truncated);
        assert_eq!(reply.messages.len(), 2);
        assert_eq!(provider.calls().len(), 1);
        assert!(provider.calls()[0].had_executor);
        assert_eq!(provider.calls()[0].tools[0].name, "echo");
    }

    #[tokio::test]
    async fn test_round_limit_truncates() {
        let replies: Vec<MockReply> = (1..=10).map(|n| echo_call(n).into()).collect();
        let (agent, provider, client) = agent(replies).await;

        let reply = agent
            .run(vec![Message::user("loop forever")], &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(provider.calls().len(), DEFAULT_MAX_ROUNDS + 1);
        assert_eq!(client.calls().len(), DEFAULT_MAX_ROUNDS);
        assert_eq!(reply.rounds, DEFAULT_MAX_ROUNDS);
        assert!(reply.truncated);
        assert_eq!(reply.content, "round 6");
        let last = reply.messages.last().unwrap();
        assert_eq!(last.tool_calls.len(), 1);
        assert_eq!(last.content, "round 6");
    }

    #[tokio::test]
    async fn test_custom_bound() {
        let replies: Vec<MockReply> = (1..=10).map(|n| echo_call(n).into()).collect();
        let (agent, provider, _) = agent(replies).await;
        let reply = agent
            .with_max_rounds(2)
            .run(vec![Message::user("go")], &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(provider.calls().len(), 3);
        assert_eq!(reply.rounds, 2);
        assert!(reply.truncated);
    }

    #[tokio::test]
    async fn test_unknown_then_known_tool_in_one_round() {
        let first = ChatResponse::text("").with_tool_calls(vec![
            ToolCall::new("missing_tool", "call_a", json!({})),
            ToolCall::new("echo", "call_b", json!({"text": "hi"})),
        ]);
        let (agent, provider, client) =
            agent(vec![first.into(), ChatResponse::text("All done").into()]).await;

        let reply = agent
            .run(vec![Message::user("do things")], &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(reply.content, "All done");
        assert_eq!(reply.rounds, 1);
        // user, assistant(2 calls), result a, result b, assistant
        assert_eq!(reply.messages.len(), 5);

        let results: Vec<&ToolResult> = reply.messages[2..4]
            .iter()
            .flat_map(|m| m.tool_results.iter())
            .collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id, "call_a");
        assert!(results[0].is_error);
        assert_eq!(results[1].tool_call_id, "call_b");
        assert!(!results[1].is_error);
        assert_eq!(reply.messages[2].content, "Tool 'missing_tool' not found.");

        assert_eq!(client.calls(), vec![("echo".to_string(), json!({"text": "hi"}))]);
        // The second model call saw both results
        assert_eq!(provider.calls()[1].messages.len(), 4);
    }

    #[tokio::test]
    async fn test_provider_error_aborts_run() {
        let (agent, _, client) = agent(vec![
            echo_call(1).into(),
            MockReply::Error("backend down".into()),
        ])
        .await;

        let err = agent
            .run(vec![Message::user("hi")], &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ServerError(m) if m == "backend down"));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_events() {
        let (agent, provider, _) = agent(vec![
            MockReply::Chunks(vec!["Let me ".into(), "check.".into()], echo_call(1)),
            MockReply::Chunks(vec!["Done.".into()], ChatResponse::text("Done.")),
        ])
        .await;

        let events: Vec<AgentEvent> = agent
            .run_streaming(vec![Message::user("hi")], ChatOptions::default())
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events[0], AgentEvent::Content("Let me ".into()));
        assert_eq!(events[1], AgentEvent::Content("check.".into()));
        assert!(matches!(&events[2], AgentEvent::ToolCall(c) if c.tool_name == "echo"));
        assert!(matches!(&events[3], AgentEvent::ToolResult(r) if !r.is_error));
        assert_eq!(events[4], AgentEvent::Content("Done.".into()));
        match &events[5] {
            AgentEvent::Done(reply) => {
                assert_eq!(reply.content, "Done.");
                assert_eq!(reply.rounds, 1);
                assert_eq!(reply.messages.len(), 4);
                assert_eq!(reply.messages[1].content, "Let me check.");
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert_eq!(events.len(), 6);
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_streaming_respects_round_bound() {
        let replies: Vec<MockReply> = (1..=10).map(|n| echo_call(n).into()).collect();
        let (agent, provider, _) = agent(replies).await;

        let events: Vec<AgentEvent> = agent
            .with_max_rounds(1)
            .run_streaming(vec![Message::user("hi")], ChatOptions::default())
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(provider.calls().len(), 2);
        match events.last() {
            Some(AgentEvent::Done(reply)) => assert!(reply.truncated),
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_streaming_provider_error() {
        let (agent, _, _) = agent(vec![MockReply::Error("nope".into())]).await;
        let events: Vec<_> = agent
            .run_streaming(vec![Message::user("hi")], ChatOptions::default())
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Err(ProviderError::ServerError(m)) if m == "nope"));
    }
}
