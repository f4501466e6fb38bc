//! Connections to external tool servers and the tool-name routing table built from
//! what they publish.
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as SyncRwLock};

use futures::future::join_all;
use mcp_client::client::{ClientCapabilities, ClientInfo, McpClient, McpClientImpl};
use mcp_client::transport::{StdioTransport, Transport};
use mcp_core::tool::Tool;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use super::config::ToolServerConfig;
use super::errors::{ToolServerError, ToolServerResult};

/// A live tool server: its client, the process behind it, and the tools it last published.
pub struct ToolServerConnection {
    name: String,
    client: Arc<dyn McpClient>,
    transport: Option<Box<dyn Transport>>,
    tools: Vec<Tool>,
}

impl ToolServerConnection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn close(self) {
        if let Some(transport) = self.transport {
            if let Err(e) = transport.close().await {
                warn!(server = %self.name, error = %e, "error closing tool server");
            }
        }
    }
}

/// One discovery pass: every routed tool plus the server that owns it.
#[derive(Debug, Default, PartialEq)]
pub struct ToolCatalog {
    tools: Vec<Tool>,
    routes: HashMap<String, String>,
}

impl ToolCatalog {
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn server_for(&self, tool_name: &str) -> Option<&str> {
        self.routes.get(tool_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Merge per-server lists in order. The first server to publish a name owns it.
    fn build(published: Vec<(String, Vec<Tool>)>) -> Self {
        let mut catalog = ToolCatalog::default();
        for (server, tools) in published {
            for tool in tools {
                if let Some(owner) = catalog.routes.get(&tool.name) {
                    warn!(
                        tool = %tool.name,
                        owner = %owner,
                        duplicate = %server,
                        "tool name already routed, ignoring duplicate"
                    );
                    continue;
                }
                catalog.routes.insert(tool.name.clone(), server.clone());
                catalog.tools.push(tool);
            }
        }
        catalog
    }
}

/// Owns every tool-server connection. Shared read-mostly across conversations; the
/// routing table is replaced wholesale by each discovery pass.
#[derive(Default)]
pub struct ToolServerRegistry {
    connections: RwLock<Vec<ToolServerConnection>>,
    catalog: SyncRwLock<Option<Arc<ToolCatalog>>>,
    discovery: Mutex<()>,
}

impl ToolServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch a tool server and complete the MCP handshake. A server already
    /// connected under the same name is replaced.
    pub async fn connect(&self, config: &ToolServerConfig) -> ToolServerResult<()> {
        let connection = match Self::establish(config).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(server = %config.name, error = %e, "tool server connection failed");
                return Err(e);
            }
        };
        self.insert(connection).await;
        Ok(())
    }

    /// Connect a set of servers concurrently. Failures are logged and skipped; returns
    /// the names that connected, in configuration order.
    pub async fn connect_all(&self, configs: &[ToolServerConfig]) -> Vec<String> {
        let results = join_all(configs.iter().map(|config| Self::establish(config))).await;

        let mut connected = Vec::new();
        for (config, result) in configs.iter().zip(results) {
            match result {
                Ok(connection) => {
                    connected.push(connection.name.clone());
                    self.insert(connection).await;
                }
                Err(e) => error!(server = %config.name, error = %e, "tool server connection failed"),
            }
        }
        info!(
            connected = connected.len(),
            configured = configs.len(),
            "tool servers connected"
        );
        connected
    }

    /// Register an already-initialized client, e.g. one served in-process.
    pub async fn add_client(&self, name: impl Into<String>, client: Arc<dyn McpClient>) {
        self.insert(ToolServerConnection {
            name: name.into(),
            client,
            transport: None,
            tools: Vec::new(),
        })
        .await;
    }

    #[instrument(skip_all, fields(server = %config.name))]
    async fn establish(config: &ToolServerConfig) -> ToolServerResult<ToolServerConnection> {
        let connection_error = |reason: String| ToolServerError::Connection {
            name: config.name.clone(),
            reason,
        };

        debug!(command = %config, "starting tool server");
        let transport =
            StdioTransport::new(&config.command, config.args.clone(), config.env.clone());
        let handle = transport
            .start()
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        let client = McpClientImpl::new(handle);

        let info = ClientInfo {
            name: "reel".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        if let Err(e) = client.initialize(info, ClientCapabilities::default()).await {
            if let Err(close_err) = transport.close().await {
                debug!(error = %close_err, "closing failed tool server");
            }
            return Err(connection_error(e.to_string()));
        }

        Ok(ToolServerConnection {
            name: config.name.clone(),
            client: Arc::new(client),
            transport: Some(Box::new(transport)),
            tools: Vec::new(),
        })
    }

    /// Mutations hold the discovery lock so an in-flight pass cannot publish a
    /// catalog built from the connection set they replaced.
    async fn insert(&self, connection: ToolServerConnection) {
        let _pass = self.discovery.lock().await;
        let replaced = {
            let mut connections = self.connections.write().await;
            match connections.iter().position(|c| c.name == connection.name) {
                Some(index) => Some(std::mem::replace(&mut connections[index], connection)),
                None => {
                    connections.push(connection);
                    None
                }
            }
        };
        if let Some(old) = replaced {
            info!(server = %old.name, "replacing tool server connection");
            old.close().await;
        }
        self.invalidate();
    }

    /// Ask every connected server for its tools and rebuild the routing table. A
    /// server that fails to list contributes nothing to this pass.
    pub async fn discover(&self) -> Arc<ToolCatalog> {
        let _pass = self.discovery.lock().await;
        self.discover_locked().await
    }

    async fn discover_locked(&self) -> Arc<ToolCatalog> {
        let clients: Vec<(String, Arc<dyn McpClient>)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|c| (c.name.clone(), Arc::clone(&c.client)))
            .collect();

        let mut published = Vec::with_capacity(clients.len());
        for (name, client) in clients {
            match list_all_tools(client.as_ref()).await {
                Ok(tools) => published.push((name, tools)),
                Err(e) => {
                    warn!(server = %name, error = %e, "failed to list tools");
                    published.push((name, Vec::new()));
                }
            }
        }

        {
            let mut connections = self.connections.write().await;
            for (name, tools) in &published {
                if let Some(connection) = connections.iter_mut().find(|c| &c.name == name) {
                    connection.tools = tools.clone();
                }
            }
        }

        let catalog = Arc::new(ToolCatalog::build(published));
        info!(tools = catalog.len(), "tool catalog refreshed");
        *self
            .catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&catalog));
        catalog
    }

    fn cached(&self) -> Option<Arc<ToolCatalog>> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn invalidate(&self) {
        *self
            .catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// The cached catalog, running discovery the first time.
    pub async fn get_tools(&self) -> Arc<ToolCatalog> {
        if let Some(catalog) = self.cached() {
            return catalog;
        }
        let _pass = self.discovery.lock().await;
        match self.cached() {
            Some(catalog) => catalog,
            None => self.discover_locked().await,
        }
    }

    pub async fn refresh(&self) -> Arc<ToolCatalog> {
        self.discover().await
    }

    /// Which server owns `tool_name`, if any.
    pub async fn get_server_for_tool(&self, tool_name: &str) -> Option<String> {
        self.get_tools()
            .await
            .server_for(tool_name)
            .map(str::to_string)
    }

    pub async fn client(&self, server: &str) -> Option<Arc<dyn McpClient>> {
        self.connections
            .read()
            .await
            .iter()
            .find(|c| c.name == server)
            .map(|c| Arc::clone(&c.client))
    }

    pub async fn server_names(&self) -> Vec<String> {
        self.connections
            .read()
            .await
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Close a server's connection. Unknown names are ignored.
    pub async fn disconnect(&self, name: &str) {
        let _pass = self.discovery.lock().await;
        let removed = {
            let mut connections = self.connections.write().await;
            connections
                .iter()
                .position(|c| c.name == name)
                .map(|index| connections.remove(index))
        };
        if let Some(connection) = removed {
            connection.close().await;
            self.invalidate();
            info!(server = name, "tool server disconnected");
        }
    }

    /// Disconnect everything.
    pub async fn shutdown(&self) {
        let _pass = self.discovery.lock().await;
        let connections = std::mem::take(&mut *self.connections.write().await);
        for connection in connections {
            connection.close().await;
        }
        self.invalidate();
    }
}

async fn list_all_tools(client: &dyn McpClient) -> Result<Vec<Tool>, mcp_client::Error> {
    let mut tools = Vec::new();
    let mut cursor = None;
    loop {
        let page = client.list_tools(cursor).await?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(tools),
        }
    }
}
