use std::sync::Arc;

use futures::FutureExt;
use mcp_core::protocol::CallToolResult;
use serde_json::Value;
use tracing::warn;

use crate::message::{Message, ToolCall, ToolResult};
use crate::providers::ToolExecutor;
use crate::tool_servers::{ToolInvoker, ToolServerError, ToolServerRegistry};

/// Resolve and run one tool call, producing its transcript entry: a user message whose
/// text renders the outcome and which carries exactly one [`ToolResult`]. Never fails;
/// an unknown tool or a failed invocation becomes an error result the model can see.
pub(crate) async fn execute_tool_call(
    registry: &ToolServerRegistry,
    invoker: &ToolInvoker,
    call: &ToolCall,
) -> Message {
    let name = &call.tool_name;
    let Some(server) = registry.get_server_for_tool(name).await else {
        warn!(tool = %name, "no server routes this tool");
        let error = ToolServerError::ToolNotFound(name.clone()).to_string();
        return Message::user(format!("Tool '{name}' not found."))
            .with_tool_result(ToolResult::error(call, error));
    };

    match invoker.call_tool(&server, name, call.args.clone()).await {
        Ok(result) if result.is_error => {
            warn!(tool = %name, server = %server, "tool reported an error");
            let value = call_result_value(&result);
            let mut tool_result = ToolResult::success(call, value);
            tool_result.is_error = true;
            Message::user(format!("Tool '{name}' failed: {}", error_text(&tool_result.result)))
                .with_tool_result(tool_result)
        }
        Ok(result) => {
            let value = call_result_value(&result);
            Message::user(format!("Tool '{name}' result: {value}"))
                .with_tool_result(ToolResult::success(call, value))
        }
        Err(e) => {
            warn!(tool = %name, server = %server, error = %e, "tool call failed");
            let message = match e {
                ToolServerError::ToolExecution { source, .. } => source.to_string(),
                other => other.to_string(),
            };
            Message::user(format!("Tool '{name}' failed: {message}"))
                .with_tool_result(ToolResult::error(call, message))
        }
    }
}

fn call_result_value(result: &CallToolResult) -> Value {
    serde_json::to_value(result).unwrap_or(Value::Null)
}

/// Text of an `isError` result from a tool server, falling back to its JSON.
fn error_text(result: &Value) -> String {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|content| {
            content
                .iter()
                .filter_map(|c| c.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if texts.is_empty() {
        result.to_string()
    } else {
        texts.join("\n")
    }
}

/// Lets a provider that runs tools itself reach the tool servers.
pub(crate) fn registry_executor(
    registry: Arc<ToolServerRegistry>,
    invoker: ToolInvoker,
) -> ToolExecutor {
    Arc::new(move |name: String, args: Value| {
        let registry = Arc::clone(&registry);
        let invoker = invoker.clone();
        async move {
            let server = registry
                .get_server_for_tool(&name)
                .await
                .ok_or_else(|| ToolServerError::ToolNotFound(name.clone()))?;
            let result = invoker.call_tool(&server, &name, args).await?;
            if result.is_error {
                anyhow::bail!(error_text(&call_result_value(&result)));
            }
            Ok::<_, anyhow::Error>(call_result_value(&result))
        }
        .boxed()
    })
}
