use reqwest::{Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use super::base::Usage;
use crate::providers::errors::ProviderError;

// Maps a non-ok response status to a ProviderError
pub async fn non_ok_response_to_provider_error(
    payload: &Value,
    response: Response,
) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Authentication(format!("Authentication failed. Please ensure your API keys are valid and have the required permissions. \
                Status: {}. Response: {:?}", status, body))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::RateLimitExceeded(format!("Rate limit exceeded. Please retry after some time. Status: {}", status))
        }
        StatusCode::BAD_REQUEST if is_context_length_error(&body) => {
            ProviderError::ContextLengthExceeded(body)
        }
        status if status.is_server_error() => {
            ProviderError::ServerError(format!("Server error occurred. Status: {}", status))
        }
        _ => {
            debug!(
                "{}", format!("Provider request failed with status: {}. Body: {:?}. Payload: {}", status, body, payload)
            );
            ProviderError::RequestFailed(format!("Request failed with status: {}. {}", status, error_message(&body)))
        }
    }
}

fn is_context_length_error(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("context_length_exceeded")
        || lower.contains("prompt is too long")
        || lower.contains("exceeds the maximum number of tokens")
}

/// Pull `error.message` out of a vendor error body when there is one.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default()
}

/// Check the status and return the still-unread response so the caller can stream the body.
pub async fn ensure_success(payload: &Value, response: Response) -> Result<Response, ProviderError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(non_ok_response_to_provider_error(payload, response).await)
    }
}

pub async fn handle_response(payload: &Value, response: Response) -> Result<Value, ProviderError> {
    let response = ensure_success(payload, response).await?;
    Ok(response.json().await?)
}

/// Insert `key` into a JSON object payload. No-op for non-object payloads.
pub fn insert_field(payload: &mut Value, key: &str, value: Value) {
    if let Some(object) = payload.as_object_mut() {
        object.insert(key.to_string(), value);
    }
}

pub fn emit_debug_trace<T: serde::Serialize>(
    model_config: &T,
    payload: &Value,
    response: &Value,
    usage: &Usage,
) {
    debug!(
        model_config = %serde_json::to_string_pretty(model_config).unwrap_or_default(),
        input = %serde_json::to_string_pretty(payload).unwrap_or_default(),
        output = %serde_json::to_string_pretty(response).unwrap_or_default(),
        input_tokens = ?usage.input_tokens.unwrap_or_default(),
        output_tokens = ?usage.output_tokens.unwrap_or_default(),
        total_tokens = ?usage.total_tokens.unwrap_or_default(),
    );
}

/// Read `usage` counters from a response object under the given key names.
pub fn usage_from(data: &Value, key: &str, input: &str, output: &str) -> Usage {
    let Some(usage) = data.get(key) else {
        return Usage::default();
    };
    let read = |name: &str| usage.get(name).and_then(Value::as_u64).map(|v| v as i32);
    let input_tokens = read(input);
    let output_tokens = read(output);
    let total_tokens = match (input_tokens, output_tokens) {
        (Some(i), Some(o)) => Some(i + o),
        _ => None,
    };
    Usage::new(input_tokens, output_tokens, total_tokens)
}

/// A JSON object wrapping an error message, as handed back to models for failed tools.
pub fn error_value(message: impl std::fmt::Display) -> Value {
    json!({ "error": message.to_string() })
}
