//! Provider and generation parameter types.

use serde::{Deserialize, Serialize};

/// Generation parameters, fixed per deployment rather than per request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Upper bound on generated tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature; 0 keeps answers deterministic
    #[serde(default)]
    pub temperature: f32,

    /// Optional sampling seed
    #[serde(default = "default_seed")]
    pub seed: Option<u64>,
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_seed() -> Option<u64> {
    Some(42)
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            seed: default_seed(),
        }
    }
}

/// Provider type enum for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Ollama,
}

impl ProviderType {
    /// Parse provider type from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    /// Get the canonical provider name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
        }
    }
}
