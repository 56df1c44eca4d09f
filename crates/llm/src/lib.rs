//! Generative model boundary for Mentor.
//!
//! The chatbot engine only ever talks to a `dyn LlmClient`; swapping the
//! model runtime means adding a provider here, nothing upstream changes.
//!
//! # Providers
//! - **Ollama**: locally hosted model runtime (default)
//!
//! # Example
//! ```no_run
//! use mentor_llm::{LlmClient, LlmRequest, providers::OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new();
//! let request = LlmRequest::new("When are exams scheduled?", "llama3.2");
//! let response = client.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod types;

pub use client::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
pub use factory::create_client;
pub use providers::OllamaClient;
pub use types::{GenerationParams, ProviderType};
