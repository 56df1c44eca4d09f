//! Sync command handler.

use super::{open_engine, to_json};
use clap::Args;
use mentor_core::{config::AppConfig, AppResult};

/// Mirror a knowledge base from storage and rebuild its index
#[derive(Args, Debug)]
pub struct SyncCommand {
    /// Knowledge base name (default: the workspace's default base)
    pub base: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl SyncCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let engine = open_engine(config, self.base.as_deref())?;
        tracing::info!("Synchronizing knowledge base '{}'", engine.config().name);

        let cycle = engine.sync_and_refresh().await?;

        if self.json {
            println!("{}", to_json(&cycle)?);
            return Ok(());
        }

        let sync = &cycle.sync;
        println!(
            "Synced '{}': {} added, {} updated, {} removed, {} unchanged",
            engine.config().name,
            sync.added.len(),
            sync.updated.len(),
            sync.removed.len(),
            sync.unchanged
        );
        for issue in &sync.errors {
            println!("  skipped {}: {}", issue.key, issue.message);
        }

        match &cycle.refresh {
            Some(refresh) => {
                println!(
                    "Index generation {}: {} documents ({} reused, {} cached, {} embedded)",
                    refresh.generation,
                    refresh.indexed,
                    refresh.reused,
                    refresh.cached,
                    refresh.embedded
                );
                if !refresh.failed.is_empty() {
                    println!("  not indexed: {}", refresh.failed.join(", "));
                }
            }
            None => println!("Index unchanged"),
        }

        Ok(())
    }
}
