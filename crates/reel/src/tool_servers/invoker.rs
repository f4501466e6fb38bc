use std::sync::Arc;

use mcp_core::protocol::CallToolResult;
use serde_json::Value;
use tracing::debug;

use super::errors::{ToolServerError, ToolServerResult};
use super::registry::ToolServerRegistry;

/// Forwards tool calls to the server that owns them. Imposes no locking or timeout;
/// calls to one server serialize only if its transport does.
#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolServerRegistry>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolServerRegistry>) -> Self {
        Self { registry }
    }

    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        args: Value,
    ) -> ToolServerResult<CallToolResult> {
        let client = self
            .registry
            .client(server)
            .await
            .ok_or_else(|| ToolServerError::NotConnected(server.to_string()))?;

        debug!(server, tool, "calling tool");
        client
            .call_tool(tool, args)
            .await
            .map_err(|source| ToolServerError::ToolExecution {
                tool: tool.to_string(),
                source,
            })
    }
}
