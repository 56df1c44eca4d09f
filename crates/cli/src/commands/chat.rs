//! Chat command handler.
//!
//! Reads one JSON `ChatRequest` per line on stdin and writes one JSON reply
//! per line on stdout. Requests are answered concurrently, so replies come
//! back in completion order; each carries the request's `session_id`. A
//! background task keeps the knowledge base in sync while the loop runs.

use super::open_engine;
use clap::Args;
use mentor_core::{config::AppConfig, AppError, AppResult};
use mentor_knowledge::{ChatRequest, ChatResponse, ChatbotEngine};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Serve JSON-lines chat requests on stdin
#[derive(Args, Debug)]
pub struct ChatCommand {
    /// Knowledge base name (default: the workspace's default base)
    pub base: Option<String>,

    /// Seconds between background syncs (default: the base's setting)
    #[arg(long)]
    pub sync_interval: Option<u64>,
}

impl ChatCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let engine = Arc::new(open_engine(config, self.base.as_deref())?);

        match engine.warm_start().await {
            Ok(report) => tracing::info!(
                "Warm start: generation {} with {} documents",
                report.generation,
                report.indexed
            ),
            Err(e) => tracing::warn!("Warm start failed, serving FAQ only until sync: {}", e),
        }

        let interval = Duration::from_secs(
            self.sync_interval
                .unwrap_or(engine.config().sync_interval_secs)
                .max(1),
        );
        let background = engine.spawn_background_sync(interval);

        let result = serve(
            Arc::clone(&engine),
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
        .await;

        background.shutdown().await;
        result
    }
}

/// One output line.
#[derive(Serialize)]
struct Reply<'a> {
    session_id: &'a str,

    #[serde(flatten)]
    response: &'a ChatResponse,
}

/// Answer every request line from `input` on its own task and write the
/// replies to `output` as they finish. Returns once input is exhausted and
/// every reply has been written.
async fn serve<R, W>(engine: Arc<ChatbotEngine>, input: R, output: W) -> AppResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (replies, mut outbox) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(reply) = outbox.recv().await {
            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<ChatRequest>(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Rejected malformed request: {}", e);
                let reply = serde_json::json!({ "error": e.to_string() }).to_string();
                let _ = replies.send(reply);
                continue;
            }
        };

        let engine = Arc::clone(&engine);
        let replies = replies.clone();
        tokio::spawn(async move {
            let response = engine.ask(&request).await;
            let reply = Reply {
                session_id: &request.session_id,
                response: &response,
            };
            match serde_json::to_string(&reply) {
                Ok(line) => {
                    let _ = replies.send(line);
                }
                Err(e) => tracing::error!("Failed to encode reply: {}", e),
            }
        });
    }

    tracing::debug!("stdin closed, waiting for in-flight requests");
    drop(replies);

    writer
        .await
        .map_err(|e| AppError::Other(format!("reply writer failed: {}", e)))??;
    Ok(())
}
