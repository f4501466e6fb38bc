pub mod anthropic;
pub mod base;
pub mod configs;
pub mod copilot;
pub mod custom;
pub mod errors;
pub mod factory;
pub mod google;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod openai;
pub mod sse;
pub mod streaming;
pub mod tool_mapper;
pub mod utils;

pub use base::{ChunkStream, Provider, ProviderKind, ToolExecutor};
pub use configs::ProviderConfig;
pub use errors::ProviderError;
pub use factory::create;
