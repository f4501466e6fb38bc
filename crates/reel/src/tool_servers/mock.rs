//! In-memory MCP client for tests.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use mcp_client::client::{ClientCapabilities, ClientInfo, Error, McpClient};
use mcp_core::protocol::{
    CallToolResult, Implementation, InitializeResult, ListToolsResult, ServerCapabilities,
    PROTOCOL_VERSION,
};
use mcp_core::{Content, Tool};
use serde_json::Value;

/// What a scripted tool does when called.
#[derive(Debug, Clone)]
pub enum MockToolOutcome {
    /// Respond with this content.
    Content(Vec<Content>),
    /// Respond with `isError: true` and this text.
    ToolError(String),
    /// Fail the RPC itself.
    RpcError(String),
}

pub struct MockMcpClient {
    tools: Mutex<Vec<Tool>>,
    outcomes: Mutex<HashMap<String, MockToolOutcome>>,
    calls: Mutex<Vec<(String, Value)>>,
    list_calls: AtomicUsize,
    page_size: Option<usize>,
    fail_list: bool,
    list_delay: Option<Duration>,
}

impl MockMcpClient {
    /// Publishes `tools`. Calls to a tool without a scripted outcome echo their arguments.
    pub fn new(tools: Vec<Tool>) -> Self {
        Self {
            tools: Mutex::new(tools),
            outcomes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            page_size: None,
            fail_list: false,
            list_delay: None,
        }
    }

    pub fn failing_list() -> Self {
        Self {
            fail_list: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Stall every `list_tools` page, to keep a discovery pass in flight.
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub fn with_outcome<S: Into<String>>(self, tool: S, outcome: MockToolOutcome) -> Self {
        self.outcomes.lock().unwrap().insert(tool.into(), outcome);
        self
    }

    pub fn set_tools(&self, tools: Vec<Tool>) {
        *self.tools.lock().unwrap() = tools;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Every `(tool, arguments)` pair received, oldest first.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl McpClient for MockMcpClient {
    async fn initialize(
        &self,
        _info: ClientInfo,
        _capabilities: ClientCapabilities,
    ) -> Result<InitializeResult, Error> {
        Ok(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: Implementation {
                name: "mock".to_string(),
                version: "0.0.0".to_string(),
            },
            instructions: None,
        })
    }

    async fn list_tools(&self, next_cursor: Option<String>) -> Result<ListToolsResult, Error> {
        if self.fail_list {
            return Err(Error::RpcError {
                code: -32603,
                message: "listing failed".to_string(),
            });
        }
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        if next_cursor.is_none() {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
        }

        let tools = self.tools.lock().unwrap().clone();
        let start: usize = next_cursor
            .as_deref()
            .map(|c| c.parse().unwrap_or(0))
            .unwrap_or(0);
        let Some(page_size) = self.page_size else {
            return Ok(ListToolsResult {
                tools,
                next_cursor: None,
            });
        };
        let end = (start + page_size).min(tools.len());
        Ok(ListToolsResult {
            tools: tools[start..end].to_vec(),
            next_cursor: (end < tools.len()).then(|| end.to_string()),
        })
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));

        let outcome = self.outcomes.lock().unwrap().get(name).cloned();
        match outcome {
            Some(MockToolOutcome::Content(content)) => Ok(CallToolResult::success(content)),
            Some(MockToolOutcome::ToolError(text)) => {
                Ok(CallToolResult::error(vec![Content::text(text)]))
            }
            Some(MockToolOutcome::RpcError(message)) => Err(Error::RpcError {
                code: -32000,
                message,
            }),
            None => Ok(CallToolResult::success(vec![Content::text(
                arguments.to_string(),
            )])),
        }
    }
}
