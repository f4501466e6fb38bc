use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use reel::message::{ChatOptions, Message};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::system_message;
use crate::error::Error;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub content: String,
}

/// Runs one full agent loop before answering.
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, Error> {
    if request.content.trim().is_empty() {
        return Err(Error::BadRequest("content must not be empty".to_string()));
    }

    let messages = vec![
        system_message(&state, request.project_id.as_deref()).await?,
        Message::user(request.content),
    ];
    let options = ChatOptions {
        model: request.model,
    };

    let reply = state.agent.run(messages, &options).await?;
    info!(rounds = reply.rounds, truncated = reply.truncated, "chat finished");
    Ok(Json(ChatReply {
        content: reply.content,
    }))
}

async fn list_models(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.orchestrator.list_models().await)
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/models", get(list_models))
        .with_state(state)
}
