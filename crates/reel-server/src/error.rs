use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reel::providers::ProviderError;
use reel::tool_servers::ToolServerError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Tool {0} not found")]
    ToolNotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    ToolServer(#[from] ToolServerError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ToolNotFound(_) | Self::ToolServer(ToolServerError::ToolNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Provider(_) | Self::ToolServer(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

// Fields reported without a section belong to the provider table
pub(crate) fn to_env_var(field_path: &str) -> String {
    let normalized_path = if field_path == "type" || field_path == "provider" {
        "provider.type".to_string()
    } else if field_path.contains('.') {
        field_path.to_string()
    } else {
        format!("provider.{}", field_path)
    };

    format!("REEL_{}", normalized_path.replace('.', "__").to_uppercase())
}
