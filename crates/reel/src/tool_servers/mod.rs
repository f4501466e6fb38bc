pub mod config;
pub mod errors;
pub mod invoker;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod registry;

pub use config::ToolServerConfig;
pub use errors::{ToolServerError, ToolServerResult};
pub use invoker::ToolInvoker;
pub use registry::{ToolCatalog, ToolServerRegistry};
