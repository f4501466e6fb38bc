use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use mcp_core::protocol::JsonRpcMessage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tower::Service;

/// A generic error type for transport operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport was not connected or is already closed")]
    NotConnected,

    #[error("Failed to send message")]
    SendFailed,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Unexpected transport error: {0}")]
    Other(String),
}

/// A message that can be sent through the transport
#[derive(Debug)]
pub struct TransportMessage {
    /// The JSON-RPC message to send
    pub message: JsonRpcMessage,
    /// Channel to receive the response on (None for notifications and responses)
    pub response_tx: Option<oneshot::Sender<Result<JsonRpcMessage, Error>>>,
}

/// A generic asynchronous transport trait with channel-based communication
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start the transport and establish the underlying connection.
    /// Returns the transport handle for sending messages.
    async fn start(&self) -> Result<TransportHandle, Error>;

    /// Close the transport and free any resources.
    async fn close(&self) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct TransportHandle {
    sender: mpsc::Sender<TransportMessage>,
}

impl TransportHandle {
    pub fn new(sender: mpsc::Sender<TransportMessage>) -> Self {
        Self { sender }
    }

    /// Send a message. Requests wait for the matching response; notifications and
    /// responses to peer-initiated requests resolve to `Nil` once written.
    pub async fn send(&self, message: JsonRpcMessage) -> Result<JsonRpcMessage, Error> {
        match message {
            JsonRpcMessage::Request(request) => {
                let (respond_to, response) = oneshot::channel();
                let msg = TransportMessage {
                    message: JsonRpcMessage::Request(request),
                    response_tx: Some(respond_to),
                };
                self.sender
                    .send(msg)
                    .await
                    .map_err(|_| Error::ChannelClosed)?;
                response.await.map_err(|_| Error::ChannelClosed)?
            }
            message @ (JsonRpcMessage::Notification(_) | JsonRpcMessage::Response(_)) => {
                let msg = TransportMessage {
                    message,
                    response_tx: None,
                };
                self.sender
                    .send(msg)
                    .await
                    .map_err(|_| Error::ChannelClosed)?;
                Ok(JsonRpcMessage::Nil)
            }
            JsonRpcMessage::Nil => Err(Error::Other("Unsupported message type".to_string())),
        }
    }
}

impl Service<JsonRpcMessage> for TransportHandle {
    type Response = JsonRpcMessage;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.sender.is_closed() {
            Poll::Ready(Err(Error::NotConnected))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn call(&mut self, message: JsonRpcMessage) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.send(message).await })
    }
}

/// Requests written to the peer and still waiting for a response, keyed by JSON-RPC id.
pub struct PendingRequests {
    requests: RwLock<HashMap<String, oneshot::Sender<Result<JsonRpcMessage, Error>>>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, id: String, sender: oneshot::Sender<Result<JsonRpcMessage, Error>>) {
        self.requests.write().await.insert(id, sender);
    }

    pub async fn respond(&self, id: &str, response: Result<JsonRpcMessage, Error>) {
        if let Some(tx) = self.requests.write().await.remove(id) {
            let _ = tx.send(response);
        }
    }

    /// Fail every outstanding request, e.g. when the peer goes away.
    pub async fn fail_all<F>(&self, error: F)
    where
        F: Fn() -> Error,
    {
        for (_, tx) in self.requests.write().await.drain() {
            let _ = tx.send(Err(error()));
        }
    }

}

pub mod stdio;
pub use stdio::{InboundHandler, StdioTransport};
