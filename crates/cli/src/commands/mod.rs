//! Command handlers for the Mentor CLI.

pub mod ask;
pub mod chat;
pub mod stats;
pub mod sync;

pub use ask::AskCommand;
pub use chat::ChatCommand;
pub use stats::StatsCommand;
pub use sync::SyncCommand;

use mentor_core::{config::AppConfig, AppError, AppResult};
use mentor_knowledge::ChatbotEngine;
use serde::Serialize;

/// Open the named base, or the configured default one.
pub(crate) fn open_engine(config: &AppConfig, base: Option<&str>) -> AppResult<ChatbotEngine> {
    let base = base.unwrap_or(&config.default_base);
    let endpoint = config.provider_endpoint(&config.provider);
    ChatbotEngine::open(&config.workspace, base, endpoint.as_deref())
}

/// Serialize a value as pretty JSON for stdout.
pub(crate) fn to_json<T: Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| AppError::Serialization(e.to_string()))
}
