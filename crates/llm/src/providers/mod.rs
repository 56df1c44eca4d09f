//! Concrete generative model clients.

pub mod ollama;

pub use ollama::OllamaClient;
