use serde::{Deserialize, Serialize};

use super::base::ProviderKind;
use crate::model::ModelConfig;

pub const ANTHROPIC_DEFAULT_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const OPENAI_DEFAULT_HOST: &str = "https://api.openai.com";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";
pub const GOOGLE_DEFAULT_HOST: &str = "https://generativelanguage.googleapis.com";
pub const GOOGLE_DEFAULT_MODEL: &str = "gemini-1.5-pro";
pub const COPILOT_DEFAULT_CLI: &str = "copilot";
pub const COPILOT_DEFAULT_MODEL: &str = "gpt-4";

/// Which provider to talk to, with everything needed to build it.
///
/// This is the only place a provider is chosen; [`super::factory::create`]
/// matches on it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProviderConfig {
    Anthropic(AnthropicProviderConfig),
    OpenAi(OpenAiProviderConfig),
    Google(GoogleProviderConfig),
    Copilot(CopilotProviderConfig),
    /// Any OpenAI-compatible endpoint at a caller-supplied host.
    Custom(OpenAiProviderConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::Anthropic(_) => ProviderKind::Anthropic,
            ProviderConfig::OpenAi(_) => ProviderKind::OpenAi,
            ProviderConfig::Google(_) => ProviderKind::Google,
            ProviderConfig::Copilot(_) => ProviderKind::Copilot,
            ProviderConfig::Custom(_) => ProviderKind::Custom,
        }
    }

    pub fn model_config(&self) -> &ModelConfig {
        match self {
            ProviderConfig::Anthropic(c) => c.model_config(),
            ProviderConfig::OpenAi(c) | ProviderConfig::Custom(c) => c.model_config(),
            ProviderConfig::Google(c) => c.model_config(),
            ProviderConfig::Copilot(c) => c.model_config(),
        }
    }
}

/// Base trait for provider configurations
pub trait ProviderModelConfig {
    /// Get the model configuration
    fn model_config(&self) -> &ModelConfig;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: ModelConfig,
}

impl AnthropicProviderConfig {
    pub fn new(api_key: String, model: ModelConfig) -> Self {
        Self {
            host: ANTHROPIC_DEFAULT_HOST.to_string(),
            api_key,
            model,
        }
    }
}

impl ProviderModelConfig for AnthropicProviderConfig {
    fn model_config(&self) -> &ModelConfig {
        &self.model
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: ModelConfig,
}

impl OpenAiProviderConfig {
    pub fn new(host: String, api_key: String, model: ModelConfig) -> Self {
        Self {
            host,
            api_key,
            model,
        }
    }
}

impl ProviderModelConfig for OpenAiProviderConfig {
    fn model_config(&self) -> &ModelConfig {
        &self.model
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: ModelConfig,
}

impl GoogleProviderConfig {
    pub fn new(api_key: String, model: ModelConfig) -> Self {
        Self {
            host: GOOGLE_DEFAULT_HOST.to_string(),
            api_key,
            model,
        }
    }
}

impl ProviderModelConfig for GoogleProviderConfig {
    fn model_config(&self) -> &ModelConfig {
        &self.model
    }
}

/// The Copilot CLI is spawned as a child process speaking JSON-RPC on stdio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopilotProviderConfig {
    pub cli_path: String,
    #[serde(default = "default_copilot_args")]
    pub cli_args: Vec<String>,
    pub model: ModelConfig,
}

pub fn default_copilot_args() -> Vec<String> {
    vec!["--server".to_string(), "--stdio".to_string()]
}

impl CopilotProviderConfig {
    pub fn new(cli_path: String, model: ModelConfig) -> Self {
        Self {
            cli_path,
            cli_args: default_copilot_args(),
            model,
        }
    }
}

impl ProviderModelConfig for CopilotProviderConfig {
    fn model_config(&self) -> &ModelConfig {
        &self.model
    }
}
