pub mod agents;
pub mod message;
pub mod model;
pub mod multiplexer;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod tool_servers;
