pub mod chat;
pub mod tools;
pub mod websocket;

use axum::Router;
use reel::message::Message;
use reel::prompt::build_system_prompt;

use crate::error::Error;
use crate::state::AppState;

pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(chat::routes(state.clone()))
        .merge(tools::routes(state.clone()))
        .merge(websocket::routes(state))
}

/// The system message that opens every conversation, listing the current tool catalog.
pub(crate) async fn system_message(
    state: &AppState,
    project_id: Option<&str>,
) -> Result<Message, Error> {
    let catalog = state.registry.get_tools().await;
    let prompt = build_system_prompt(catalog.tools(), project_id).map_err(anyhow::Error::from)?;
    Ok(Message::system(prompt))
}
