use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use mcp_core::protocol::JsonRpcMessage;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{Error, PendingRequests, Transport, TransportHandle, TransportMessage};

/// Receives every request and notification the child initiates, in stdout order.
pub type InboundHandler = Arc<dyn Fn(JsonRpcMessage) + Send + Sync>;

/// A `StdioTransport` uses a child process's stdin/stdout as a communication channel.
///
/// Messages are newline-delimited JSON. Responses are matched to pending requests by
/// id; requests and notifications initiated by the child are handed to the inbound
/// handler when one is configured and dropped otherwise.
///
/// The handler runs on the reader task before any later line is read, so everything
/// the child wrote ahead of a response has been handed over by the time that
/// response resolves its request.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    inbound: Option<InboundHandler>,
    process: Arc<Mutex<Option<Child>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    pending_requests: Arc<PendingRequests>,
}

impl StdioTransport {
    /// Create a new `StdioTransport` configured to run the given command with arguments.
    /// `env` is layered on top of the parent environment.
    pub fn new<S: Into<String>>(command: S, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            inbound: None,
            process: Arc::new(Mutex::new(None)),
            tasks: Arc::new(Mutex::new(Vec::new())),
            pending_requests: Arc::new(PendingRequests::new()),
        }
    }

    /// Hand peer-initiated requests and notifications to `handler`. It must not block.
    pub fn with_inbound<F>(mut self, handler: F) -> Self
    where
        F: Fn(JsonRpcMessage) + Send + Sync + 'static,
    {
        self.inbound = Some(Arc::new(handler));
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    async fn spawn_process(&self) -> Result<(ChildStdin, ChildStdout), Error> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or(Error::Other("Failed to get stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(Error::Other("Failed to get stdout".into()))?;

        *self.process.lock().await = Some(child);

        Ok((stdin, stdout))
    }

    async fn read_messages(
        stdout: ChildStdout,
        pending_requests: Arc<PendingRequests>,
        inbound: Option<InboundHandler>,
    ) {
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                        Ok(JsonRpcMessage::Response(response)) => match response.id {
                            Some(id) => {
                                pending_requests
                                    .respond(&id.to_string(), Ok(JsonRpcMessage::Response(response)))
                                    .await
                            }
                            None => tracing::debug!(?response, "dropping response without id"),
                        },
                        Ok(JsonRpcMessage::Nil) => {}
                        Ok(message) => match &inbound {
                            Some(handler) => handler(message),
                            None => tracing::debug!(?message, "ignoring peer-initiated message"),
                        },
                        Err(e) => tracing::debug!(error = %e, line = trimmed, "skipping non JSON-RPC output"),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "error reading from child stdout");
                    break;
                }
            }
        }

        pending_requests.fail_all(|| Error::ConnectionClosed).await;
    }

    async fn write_messages(
        mut message_rx: mpsc::Receiver<TransportMessage>,
        mut stdin: ChildStdin,
        pending_requests: Arc<PendingRequests>,
    ) {
        while let Some(transport_msg) = message_rx.recv().await {
            let message_str = match serde_json::to_string(&transport_msg.message) {
                Ok(s) => s,
                Err(e) => {
                    if let Some(tx) = transport_msg.response_tx {
                        let _ = tx.send(Err(Error::Serialization(e)));
                    }
                    continue;
                }
            };

            // Register before writing so a fast reply can't race the insert
            let request_id = match (&transport_msg.message, transport_msg.response_tx) {
                (JsonRpcMessage::Request(request), Some(tx)) => {
                    let id = request.id.to_string();
                    pending_requests.insert(id.clone(), tx).await;
                    Some(id)
                }
                _ => None,
            };

            let written = async {
                stdin.write_all(format!("{message_str}\n").as_bytes()).await?;
                stdin.flush().await
            }
            .await;

            if let Err(e) = written {
                tracing::warn!(error = %e, "failed to write to child stdin");
                if let Some(id) = request_id {
                    pending_requests.respond(&id, Err(Error::SendFailed)).await;
                }
                break;
            }
        }

        pending_requests.fail_all(|| Error::ChannelClosed).await;
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<TransportHandle, Error> {
        let (stdin, stdout) = self.spawn_process().await?;
        let (message_tx, message_rx) = mpsc::channel(32);

        let reader = tokio::spawn(Self::read_messages(
            stdout,
            Arc::clone(&self.pending_requests),
            self.inbound.clone(),
        ));
        let writer = tokio::spawn(Self::write_messages(
            message_rx,
            stdin,
            Arc::clone(&self.pending_requests),
        ));

        let mut tasks = self.tasks.lock().await;
        tasks.push(reader);
        tasks.push(writer);

        Ok(TransportHandle::new(message_tx))
    }

    async fn close(&self) -> Result<(), Error> {
        if let Some(mut child) = self.process.lock().await.take() {
            if let Err(e) = child.kill().await {
                // Already exited is fine
                tracing::debug!(error = %e, command = %self.command, "kill failed");
            }
        }

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        self.pending_requests
            .fail_all(|| Error::ConnectionClosed)
            .await;
        Ok(())
    }
}
