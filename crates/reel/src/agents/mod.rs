mod agent_loop;
mod tool_execution;

pub use agent_loop::{AgentEvent, AgentLoop, AgentReply, LoopState, DEFAULT_MAX_ROUNDS};

