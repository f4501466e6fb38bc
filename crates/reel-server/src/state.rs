use anyhow::Result;
use reel::agents::AgentLoop;
use reel::orchestrator::Orchestrator;
use reel::providers::ProviderConfig;
use reel::tool_servers::{ToolInvoker, ToolServerConfig, ToolServerRegistry};
use std::sync::Arc;
use tracing::info;

/// Shared application state. Everything in it is built once at startup and shared
/// read-mostly by every request and socket.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ToolServerRegistry>,
    pub invoker: ToolInvoker,
    pub agent: AgentLoop,
}

impl AppState {
    /// Connect the configured tool servers and build the provider. Servers that fail
    /// to start are logged and left out.
    pub async fn new(
        provider: ProviderConfig,
        tool_servers: &[ToolServerConfig],
        max_rounds: usize,
    ) -> Result<Self> {
        let orchestrator = Arc::new(Orchestrator::new(provider)?);
        let registry = Arc::new(ToolServerRegistry::new());

        let connected = registry.connect_all(tool_servers).await;
        info!(
            connected = connected.len(),
            configured = tool_servers.len(),
            "tool servers ready"
        );
        let catalog = registry.get_tools().await;
        info!(tools = catalog.len(), "tool catalog discovered");

        Ok(Self::from_parts(orchestrator, registry, max_rounds))
    }

    pub fn from_parts(
        orchestrator: Arc<Orchestrator>,
        registry: Arc<ToolServerRegistry>,
        max_rounds: usize,
    ) -> Self {
        let invoker = ToolInvoker::new(Arc::clone(&registry));
        let agent = AgentLoop::new(Arc::clone(&orchestrator), Arc::clone(&registry))
            .with_max_rounds(max_rounds);
        Self {
            orchestrator,
            registry,
            invoker,
            agent,
        }
    }

    /// Disconnect every tool server.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
