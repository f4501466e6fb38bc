//! Server-sent events decoding over a `reqwest` byte stream.
use async_stream::stream;
use futures::{Stream, StreamExt};
use reqwest::Response;

use super::errors::ProviderError;

/// Incremental SSE decoder. Feed it raw bytes as they arrive and it hands back the
/// `data` payload of every completed event. Bytes may split anywhere, including
/// inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.push_line(line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
            if let Some(event) = self.push_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn push_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None; // comment
        }
        if let Some(data) = line.strip_prefix("data:") {
            self.data
                .push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        // event:, id: and retry: carry nothing we route on
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data).join("\n"))
        }
    }
}

/// Turn a successful streaming response into a stream of event payloads.
pub fn data_events(response: Response) -> impl Stream<Item = Result<String, ProviderError>> + Send {
    let mut bytes = response.bytes_stream();
    stream! {
        let mut decoder = SseDecoder::new();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in decoder.feed(&chunk) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(ProviderError::RequestFailed(format!("Stream interrupted: {e}")));
                    return;
                }
            }
        }
        if let Some(event) = decoder.finish() {
            yield Ok(event);
        }
    }
}
