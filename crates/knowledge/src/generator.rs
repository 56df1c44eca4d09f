//! Response generation.
//!
//! Assembles a prompt from the retrieved excerpts and recent conversation,
//! then makes exactly one bounded model call. Any failure (error, timeout,
//! empty output) yields a fixed fallback answer instead of an error.

use crate::config::GenerationConfig;
use crate::pool::WorkerPool;
use crate::types::{GeneratedAnswer, Role, Turn};
use mentor_core::{AppError, AppResult};
use mentor_llm::{GenerationParams, LlmClient, LlmRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Below this top score the model is told the context may not answer the question.
const CONFIDENCE_THRESHOLD: f32 = 0.30;

/// Returned whenever the model cannot produce an answer.
pub const FALLBACK_ANSWER: &str =
    "I'm sorry, I can't answer that right now. Please try again in a moment or contact support.";

/// One retrieved document passed to the model as context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextExcerpt {
    pub document_id: String,
    pub text: String,
    pub score: f32,
}

pub struct ResponseGenerator {
    client: Arc<dyn LlmClient>,
    pool: WorkerPool,
    params: GenerationParams,
    timeout: Duration,
    max_context_chars: usize,
    history_turns: usize,
    invocations: AtomicU64,
}

impl ResponseGenerator {
    pub fn new(client: Arc<dyn LlmClient>, pool: WorkerPool, config: &GenerationConfig) -> Self {
        Self {
            client,
            pool,
            params: config.params.clone(),
            timeout: config.timeout(),
            max_context_chars: config.max_context_chars,
            history_turns: config.history_turns,
            invocations: AtomicU64::new(0),
        }
    }

    /// Number of model calls made so far.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Answer `query` from `context`. Never fails.
    ///
    /// `used_context` is false when the fallback answer was substituted.
    /// `cited` lists the excerpts that fit the context budget.
    pub async fn generate(
        &self,
        query: &str,
        context: &[ContextExcerpt],
        history: &[Turn],
    ) -> GeneratedAnswer {
        match self.call_model(query, context, history).await {
            Ok((text, cited)) => GeneratedAnswer {
                text,
                used_context: true,
                cited,
            },
            Err(e) => {
                tracing::warn!("Generation fell back to canned answer: {}", e);
                GeneratedAnswer {
                    text: FALLBACK_ANSWER.to_string(),
                    used_context: false,
                    cited: Vec::new(),
                }
            }
        }
    }

    async fn call_model(
        &self,
        query: &str,
        context: &[ContextExcerpt],
        history: &[Turn],
    ) -> AppResult<(String, Vec<String>)> {
        let top_score = context.first().map(|c| c.score).unwrap_or(0.0);
        let (context_text, cited) = build_context(context, self.max_context_chars);
        let request = LlmRequest::with_params(
            build_user_prompt(
                query,
                &context_text,
                &format_history(history, self.history_turns),
            ),
            &self.params,
        )
        .with_system(build_system_prompt(top_score < CONFIDENCE_THRESHOLD));

        let client = Arc::clone(&self.client);
        let timeout = self.timeout;
        self.invocations.fetch_add(1, Ordering::Relaxed);

        // The deadline runs inside the pooled task so an expired call is
        // dropped there and its permit released.
        let response = self
            .pool
            .run(async move {
                match tokio::time::timeout(timeout, client.complete(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::GenerationTimeout(timeout.as_millis() as u64)),
                }
            })
            .await?;

        let text = response.content.trim().to_string();
        if text.is_empty() {
            return Err(AppError::Generation("model returned an empty answer".to_string()));
        }

        tracing::debug!(
            "Generated {} chars with {} ({} of {} excerpts)",
            text.len(),
            self.client.provider_name(),
            cited.len(),
            context.len()
        );
        Ok((text, cited))
    }
}

/// Concatenate excerpts in retrieval order, keeping the total excerpt text
/// within `max_chars`. Later excerpts are cut first; the last one included
/// may be partial. Also returns the ids of the excerpts that made it in.
fn build_context(excerpts: &[ContextExcerpt], max_chars: usize) -> (String, Vec<String>) {
    let mut remaining = max_chars;
    let mut parts = Vec::new();
    let mut included = Vec::new();

    for (i, excerpt) in excerpts.iter().enumerate() {
        if remaining == 0 {
            break;
        }

        let text = truncate_chars(excerpt.text.trim(), remaining);
        remaining -= text.chars().count();
        parts.push(format!("[Document {}]\n{}", i + 1, text));
        included.push(excerpt.document_id.clone());
    }

    (parts.join("\n\n---\n\n"), included)
}

/// Longest prefix of `text` with at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn format_history(history: &[Turn], turns: usize) -> String {
    let start = history.len().saturating_sub(turns);
    history[start..]
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                Role::User => "Student",
                Role::Assistant => "Assistant",
            };
            format!("{}: {}", speaker, turn.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_user_prompt(query: &str, context: &str, history: &str) -> String {
    let mut prompt = String::new();
    if !history.is_empty() {
        prompt.push_str(&format!("Conversation so far:\n{}\n\n", history));
    }
    prompt.push_str(&format!(
        "Student question:\n{}\n\nRelevant course material:\n{}",
        query.trim(),
        context
    ));
    prompt
}

fn build_system_prompt(low_confidence: bool) -> String {
    let mut prompt = String::from(
        "You are the support assistant for an online course. You answer students' questions \
         using the course material provided with each question.\n\n",
    );

    if low_confidence {
        prompt.push_str(
            "Note: The retrieved material may not directly answer this question. \
             Be cautious and clear about what it does and does not state.\n\n",
        );
    }

    prompt.push_str(
        "Instructions:\n\
         - Provide a clear, direct answer based only on the material provided\n\
         - Do not mention \"documents\", \"context\", \"Document 1\" or similar labels\n\
         - Do not invent dates, prices or policies that the material does not state\n\
         - If the material does not contain the answer, say so and suggest contacting support\n\
         - Keep your response concise and friendly\n",
    );

    prompt
}
