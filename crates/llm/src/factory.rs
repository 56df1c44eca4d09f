//! LLM client factory.
//!
//! Resolves a provider name from configuration into a shared client.

use crate::client::LlmClient;
use crate::providers::OllamaClient;
use crate::types::ProviderType;
use mentor_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

/// Create an LLM client for a provider name.
///
/// # Arguments
/// * `provider` - Provider identifier ("ollama")
/// * `endpoint` - Optional custom endpoint URL
/// * `timeout` - Optional transport timeout
///
/// # Errors
/// Returns `AppError::Config` for unknown providers; a deployment without a
/// usable generation backend must not start.
pub fn create_client(
    provider: &str,
    endpoint: Option<&str>,
    timeout: Option<Duration>,
) -> AppResult<Arc<dyn LlmClient>> {
    match ProviderType::parse(provider) {
        Some(ProviderType::Ollama) => {
            let base_url = endpoint.unwrap_or("http://localhost:11434");
            let client = match timeout {
                Some(timeout) => OllamaClient::with_timeout(base_url, timeout)?,
                None => OllamaClient::with_base_url(base_url),
            };
            tracing::debug!("Created Ollama generation client for {}", base_url);
            Ok(Arc::new(client))
        }
        None => Err(AppError::Config(format!(
            "Unknown generation provider: {}",
            provider
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_ollama_client() {
        let client = create_client("ollama", None, None).unwrap();
        assert_eq!(client.provider_name(), "ollama");
    }

    #[test]
    fn test_create_ollama_with_custom_endpoint_and_timeout() {
        let client = create_client(
            "ollama",
            Some("http://localhost:8080"),
            Some(Duration::from_secs(5)),
        );
        assert!(client.is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        match create_client("unknown", None, None) {
            Err(AppError::Config(msg)) => assert!(msg.contains("Unknown generation provider")),
            Err(other) => panic!("Unexpected error: {}", other),
            Ok(_) => panic!("Expected error for unknown provider"),
        }
    }
}
