use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use mcp_core::protocol::CallToolResult;
use mcp_core::Tool;
use serde_json::Value;

use crate::error::Error;
use crate::state::AppState;

async fn list_tools(State(state): State<AppState>) -> Json<Vec<Tool>> {
    Json(state.registry.get_tools().await.tools().to_vec())
}

/// Calls a tool directly, bypassing the model. A tool that reports `isError` still
/// answers 200; only a failed call is a 500.
async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(args): Json<Value>,
) -> Result<Json<CallToolResult>, Error> {
    let server = state
        .registry
        .get_server_for_tool(&name)
        .await
        .ok_or_else(|| Error::ToolNotFound(name.clone()))?;

    let result = state.invoker.call_tool(&server, &name, args).await?;
    Ok(Json(result))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(call_tool))
        .with_state(state)
}
