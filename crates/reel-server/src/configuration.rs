use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use reel::agents::DEFAULT_MAX_ROUNDS;
use reel::model::ModelConfig;
use reel::providers::configs::{
    default_copilot_args, AnthropicProviderConfig, CopilotProviderConfig, GoogleProviderConfig,
    OpenAiProviderConfig, ProviderConfig, ANTHROPIC_DEFAULT_HOST, ANTHROPIC_DEFAULT_MODEL,
    COPILOT_DEFAULT_CLI, COPILOT_DEFAULT_MODEL, GOOGLE_DEFAULT_HOST, GOOGLE_DEFAULT_MODEL,
    OPENAI_DEFAULT_HOST, OPENAI_DEFAULT_MODEL,
};
use reel::tool_servers::config::resolve_servers;
use reel::tool_servers::ToolServerConfig;
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;

pub const CONFIG_PATH_ENV: &str = "REEL_CONFIG";
pub const COPILOT_CLI_PATH_ENV: &str = "COPILOT_CLI_PATH";
const DEFAULT_CONFIG_FILE: &str = "reel.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    Anthropic {
        #[serde(default = "default_anthropic_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_anthropic_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Google {
        #[serde(default = "default_google_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_google_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Copilot {
        #[serde(default = "default_copilot_cli")]
        cli_path: String,
        #[serde(default = "default_copilot_args")]
        cli_args: Vec<String>,
        #[serde(default = "default_copilot_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    /// Any OpenAI-compatible endpoint; both host and model must be given.
    Custom {
        host: String,
        #[serde(default)]
        api_key: String,
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::Anthropic {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Anthropic(AnthropicProviderConfig {
                host,
                api_key,
                model: model_config(model, temperature, max_tokens),
            }),
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model: model_config(model, temperature, max_tokens),
            }),
            ProviderSettings::Google {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Google(GoogleProviderConfig {
                host,
                api_key,
                model: model_config(model, temperature, max_tokens),
            }),
            ProviderSettings::Copilot {
                cli_path,
                cli_args,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Copilot(CopilotProviderConfig {
                cli_path,
                cli_args,
                model: model_config(model, temperature, max_tokens),
            }),
            ProviderSettings::Custom {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Custom(OpenAiProviderConfig {
                host,
                api_key,
                model: model_config(model, temperature, max_tokens),
            }),
        }
    }
}

fn model_config(model: String, temperature: Option<f32>, max_tokens: Option<i32>) -> ModelConfig {
    ModelConfig::new(model)
        .with_temperature(temperature)
        .with_max_tokens(max_tokens)
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ToolServerSettings {
    /// JSON file in the `mcpServers` format.
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Directory holding the built-in servers. Unset means no built-ins.
    #[serde(default)]
    pub servers_dir: Option<PathBuf>,
}

impl ToolServerSettings {
    pub fn servers(&self) -> Vec<ToolServerConfig> {
        resolve_servers(self.config_path.as_deref(), self.servers_dir.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub tool_servers: ToolServerSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config_file = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("agent.max_rounds", default_max_rounds() as u64)?
            .add_source(File::from(config_file).required(false))
            .add_source(
                Environment::with_prefix("REEL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // "missing field `type`" names the field but not its table
                let error_str = err.to_string();
                let missing = error_str
                    .starts_with("missing field")
                    .then(|| error_str.split('`').nth(1))
                    .flatten();
                if let Some(field) = missing {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

fn default_anthropic_host() -> String {
    ANTHROPIC_DEFAULT_HOST.to_string()
}

fn default_anthropic_model() -> String {
    ANTHROPIC_DEFAULT_MODEL.to_string()
}

fn default_openai_host() -> String {
    OPENAI_DEFAULT_HOST.to_string()
}

fn default_openai_model() -> String {
    OPENAI_DEFAULT_MODEL.to_string()
}

fn default_google_host() -> String {
    GOOGLE_DEFAULT_HOST.to_string()
}

fn default_google_model() -> String {
    GOOGLE_DEFAULT_MODEL.to_string()
}

fn default_copilot_cli() -> String {
    std::env::var(COPILOT_CLI_PATH_ENV).unwrap_or_else(|_| COPILOT_DEFAULT_CLI.to_string())
}

fn default_copilot_model() -> String {
    COPILOT_DEFAULT_MODEL.to_string()
}
