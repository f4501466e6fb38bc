use mcp_client::client::Error as ClientError;
use thiserror::Error;

/// Errors from tool-server operations
#[derive(Error, Debug)]
pub enum ToolServerError {
    #[error("Failed to connect to tool server '{name}': {reason}")]
    Connection { name: String, reason: String },

    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    #[error("Tool '{tool}' failed: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: ClientError,
    },

    #[error("Tool server '{0}' is not connected")]
    NotConnected(String),
}

pub type ToolServerResult<T> = Result<T, ToolServerError>;
