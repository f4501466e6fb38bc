//! Where tool servers come from: the built-in set shipped next to the server and an
//! optional `mcp.config.json` of user-defined entries.
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How to launch one tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ToolServerConfig {
    pub fn stdio<N: Into<String>, C: Into<String>>(name: N, command: C, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }

    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ToolServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} {})", self.name, self.command, self.args.join(" "))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpConfigFile {
    #[serde(default)]
    mcp_servers: BTreeMap<String, McpServerEntry>,
}

#[derive(Debug, Deserialize)]
struct McpServerEntry {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    disabled: bool,
}

/// Name and directory (under the servers dir) of each bundled tool server.
const BUILTIN_SERVERS: [(&str, &str); 5] = [
    ("ffmpeg", "ffmpeg-server"),
    ("whisper", "whisper-server"),
    ("vision", "vision-server"),
    ("asset", "asset-server"),
    ("codeRunner", "code-runner-server"),
];

/// The bundled servers, each run as `node <servers_dir>/<dir>/dist/index.js`.
pub fn builtin_servers(servers_dir: &Path) -> Vec<ToolServerConfig> {
    BUILTIN_SERVERS
        .iter()
        .map(|(name, dir)| {
            let entry = servers_dir.join(dir).join("dist").join("index.js");
            ToolServerConfig::stdio(*name, "node", vec![entry.to_string_lossy().into_owned()])
        })
        .collect()
}

/// Read user-defined servers from an `mcp.config.json` file. Disabled entries are
/// skipped; a missing or unreadable file yields no servers.
pub fn load_config_file(path: &Path) -> Vec<ToolServerConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read tool server config");
            return Vec::new();
        }
    };
    let file: McpConfigFile = match serde_json::from_str(&raw) {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed tool server config");
            return Vec::new();
        }
    };

    let servers: Vec<ToolServerConfig> = file
        .mcp_servers
        .into_iter()
        .filter(|(_, entry)| !entry.disabled)
        .map(|(name, entry)| ToolServerConfig {
            name,
            command: entry.command,
            args: entry.args,
            env: entry.env,
        })
        .collect();
    info!(count = servers.len(), path = %path.display(), "loaded custom tool servers");
    servers
}

/// Built-ins first, then custom entries. A custom entry replaces the built-in of the
/// same name in place.
pub fn resolve_servers(
    config_path: Option<&Path>,
    servers_dir: Option<&Path>,
) -> Vec<ToolServerConfig> {
    let mut servers = servers_dir.map(builtin_servers).unwrap_or_default();
    for custom in config_path.map(load_config_file).unwrap_or_default() {
        match servers.iter_mut().find(|s| s.name == custom.name) {
            Some(existing) => *existing = custom,
            None => servers.push(custom),
        }
    }
    servers
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_skips_disabled_entries() {
        let file = config_file(indoc! {r#"
            {
              "mcpServers": {
                "stock": {"command": "npx", "args": ["stock-mcp"], "env": {"API_KEY": "k"}},
                "old": {"command": "node", "args": ["old.js"], "disabled": true}
              }
            }
        "#});

        let servers = load_config_file(file.path());
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "stock");
        assert_eq!(servers[0].args, vec!["stock-mcp"]);
        assert_eq!(servers[0].env.get("API_KEY").map(String::as_str), Some("k"));
    }

    #[test]
    fn test_missing_or_malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config_file(&dir.path().join("mcp.config.json")).is_empty());

        let file = config_file("{ not json");
        assert!(load_config_file(file.path()).is_empty());

        let file = config_file("{}");
        assert!(load_config_file(file.path()).is_empty());
    }

    #[test]
    fn test_builtin_layout() {
        let servers = builtin_servers(Path::new("/opt/reel/mcp-servers"));
        let names: Vec<_> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["ffmpeg", "whisper", "vision", "asset", "codeRunner"]);
        assert_eq!(servers[4].command, "node");
        assert_eq!(
            servers[4].args,
            vec!["/opt/reel/mcp-servers/code-runner-server/dist/index.js"]
        );
    }

    #[test]
    fn test_custom_entries_override_builtins() {
        let file = config_file(indoc! {r#"
            {
              "mcpServers": {
                "whisper": {"command": "python", "args": ["-m", "whisper_mcp"]},
                "extra": {"command": "extra-mcp"}
              }
            }
        "#});

        let servers = resolve_servers(Some(file.path()), Some(Path::new("/srv")));
        let names: Vec<_> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["ffmpeg", "whisper", "vision", "asset", "codeRunner", "extra"]
        );
        assert_eq!(servers[1].command, "python");
        assert!(servers[5].args.is_empty());
    }

    #[test]
    fn test_nothing_configured() {
        assert!(resolve_servers(None, None).is_empty());
    }
}
