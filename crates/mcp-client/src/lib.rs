pub mod client;
pub mod transport;

pub use client::{ClientCapabilities, ClientInfo, Error, McpClient, McpClientImpl};
pub use transport::{StdioTransport, Transport, TransportHandle};
