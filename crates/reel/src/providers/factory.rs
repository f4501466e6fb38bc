use super::{
    anthropic::AnthropicProvider, base::Provider, configs::ProviderConfig,
    copilot::CopilotProvider, custom::CustomProvider, errors::ProviderError,
    google::GoogleProvider, openai::OpenAiProvider,
};

/// Build the adapter for a configured provider kind.
pub fn create(config: ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    let provider: Box<dyn Provider> = match config {
        ProviderConfig::Anthropic(c) => Box::new(AnthropicProvider::new(c)?),
        ProviderConfig::OpenAi(c) => Box::new(OpenAiProvider::new(c)?),
        ProviderConfig::Google(c) => Box::new(GoogleProvider::new(c)?),
        ProviderConfig::Copilot(c) => Box::new(CopilotProvider::new(c)),
        ProviderConfig::Custom(c) => Box::new(CustomProvider::new(c)?),
    };
    tracing::debug!(provider = %provider.kind(), model = %provider.get_model_config().model_name, "provider created");
    Ok(provider)
}
