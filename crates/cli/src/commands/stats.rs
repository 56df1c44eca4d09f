//! Stats command handler.

use super::{open_engine, to_json};
use clap::Args;
use mentor_core::{config::AppConfig, AppResult};

/// Show knowledge base and engine statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Knowledge base name (default: the workspace's default base)
    pub base: Option<String>,

    /// Build the index from the persisted store before reporting
    #[arg(long)]
    pub load_index: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let engine = open_engine(config, self.base.as_deref())?;

        if self.load_index {
            engine.warm_start().await?;
        }

        let status = engine.status()?;

        if self.json {
            println!("{}", to_json(&status)?);
            return Ok(());
        }

        println!("Knowledge base: {}", status.base);
        println!(
            "Documents: {} active, {} removed",
            status.active_documents, status.removed_documents
        );
        println!("Persisted embeddings: {}", status.persisted_embeddings);

        match status.index.generation {
            Some(generation) => println!(
                "Index: generation {} ({} documents, {}, model {})",
                generation,
                status.index.documents,
                status.index.ann,
                status.index.model_version
            ),
            None => println!("Index: not built"),
        }
        if status.index.stale {
            println!("  stale: storage was unreachable on the last sync");
        }
        if !status.index.degraded.is_empty() {
            println!("  not indexed: {}", status.index.degraded.join(", "));
        }

        println!(
            "Response cache: {} entries, hit rate {:.1}%",
            status.cache.responses.entries,
            status.cache.responses.hit_rate() * 100.0
        );
        println!(
            "Embedding cache: {} entries, hit rate {:.1}%",
            status.cache.embeddings.entries,
            status.cache.embeddings.hit_rate() * 100.0
        );
        println!("Workers: {}", status.workers);

        if let Some(last_sync) = status.last_sync {
            println!("Last sync: {}", last_sync.to_rfc3339());
        }

        Ok(())
    }
}
