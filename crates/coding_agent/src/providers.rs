//! Startup selection of the completion backend.

use std::sync::Arc;

use agent_provider::{CompletionService, ProviderInitError};
use agent_provider_mock::{ScriptedCompletionService, MOCK_PROVIDER_ID};
use agent_provider_openai::{OpenAiProvider, OpenAiProviderConfig, OPENAI_PROVIDER_ID};

use crate::config::AgentConfig;

pub const PROVIDER_ENV_VAR: &str = "CODING_AGENT_PROVIDER";

/// Builds the backend named by `config.provider`.
pub fn provider_for_config(
    config: &AgentConfig,
) -> Result<Arc<dyn CompletionService>, ProviderInitError> {
    match config.provider.trim() {
        MOCK_PROVIDER_ID => Ok(Arc::new(
            ScriptedCompletionService::default().with_model_id(&config.model),
        )),
        OPENAI_PROVIDER_ID => {
            let mut provider_config = OpenAiProviderConfig::new(
                config.api_key.clone().unwrap_or_default(),
                &config.model,
            )
            .with_base_url(&config.api_url);
            if let Some(timeout) = config.request_timeout() {
                provider_config = provider_config.with_timeout(timeout);
            }
            Ok(Arc::new(OpenAiProvider::new(provider_config)?))
        }
        unknown => Err(ProviderInitError::new(format!(
            "Unsupported provider '{unknown}'. Available providers: {OPENAI_PROVIDER_ID}, {MOCK_PROVIDER_ID}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_reports_configured_model() {
        let mut config = AgentConfig::default();
        config.provider = "mock".to_string();
        config.model = "offline".to_string();

        let provider = provider_for_config(&config).expect("mock provider should resolve");
        let profile = provider.profile();
        assert_eq!(profile.provider_id, "mock");
        assert_eq!(profile.model_id, "offline");
    }

    #[test]
    fn openai_provider_requires_api_key() {
        let config = AgentConfig::default();
        let error = match provider_for_config(&config) {
            Ok(_) => panic!("missing key should fail"),
            Err(error) => error,
        };
        assert!(error.message().contains("OPENAI_KEY"), "{error}");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut config = AgentConfig::default();
        config.provider = "custom".to_string();
        let error = match provider_for_config(&config) {
            Ok(_) => panic!("unknown providers should fail"),
            Err(error) => error,
        };

        assert!(error.message().contains("Unsupported provider 'custom'"));
    }
}
