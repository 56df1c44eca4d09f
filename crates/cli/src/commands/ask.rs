//! Ask command handler.
//!
//! Answers one question from the persisted store. Run `mentor sync` first to
//! pick up storage changes.

use super::{open_engine, to_json};
use clap::Args;
use mentor_core::{config::AppConfig, AppResult};
use mentor_knowledge::ChatRequest;

/// Answer a single question
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub query: String,

    /// Knowledge base name (default: the workspace's default base)
    #[arg(short, long)]
    pub base: Option<String>,

    /// Session identifier recorded in logs
    #[arg(long, default_value = "cli")]
    pub session: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let engine = open_engine(config, self.base.as_deref())?;

        if let Err(e) = engine.warm_start().await {
            tracing::warn!("Answering without an index: {}", e);
        }

        let response = engine
            .ask(&ChatRequest::new(self.query.clone(), self.session.clone()))
            .await;

        if self.json {
            println!("{}", to_json(&response)?);
        } else {
            println!("{}", response.answer);
            tracing::debug!(
                "Answered from {} with confidence {:.2}",
                response.source.as_str(),
                response.confidence
            );
            if !response.citations.is_empty() {
                println!("\nSources: {}", response.citations.join(", "));
            }
        }

        Ok(())
    }
}
