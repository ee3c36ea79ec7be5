//! Completion-service workers
//!
//! The extraction, response, and reflection workers are remote calls to an
//! OpenAI-compatible chat-completions endpoint. They are the only suspending
//! operations in the engine besides the long-term store. Structured JSON
//! coming back is validated item by item; malformed items are dropped with a
//! per-item diagnostic, never failing the whole call.
//!
//! Retry discipline: exponential backoff with ±25% jitter, applied only to
//! rate-limit failures, up to a fixed attempt cap. Every attempt runs under
//! the caller's deadline; a deadline miss is that stage's failure and is not
//! retried.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::constants::{INITIAL_RETRY_DELAY_MS, MAX_RETRY_DELAY_MS, TAG_BEHAVIOR_DEVIATION};
use crate::reflection::HistoricalBundle;
use crate::types::{Fact, Insight};
use crate::validation::{validate_fact, validate_insight};

/// How a worker call failed; only rate limits are retryable
#[derive(Debug)]
pub enum WorkerError {
    /// 429 from the service; carries the server's Retry-After if present
    RateLimited { retry_after_secs: Option<u64> },

    /// Non-success HTTP status other than 429
    Http { status: u16, body: String },

    /// Connection-level failure before any response
    Transport(String),

    /// Response arrived but its payload was unusable
    Malformed(String),

    /// Deadline elapsed before the call settled
    DeadlineExceeded,

    /// Client constructed without credentials
    Unconfigured,
}

impl WorkerError {
    /// Only rate-limit conditions warrant another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { retry_after_secs } => match retry_after_secs {
                Some(secs) => write!(f, "rate limited (retry after {secs}s)"),
                None => write!(f, "rate limited"),
            },
            Self::Http { status, body } => {
                write!(f, "http {status}: {}", body.chars().take(200).collect::<String>())
            }
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Malformed(msg) => write!(f, "malformed payload: {msg}"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Unconfigured => write!(f, "client not configured"),
        }
    }
}

impl std::error::Error for WorkerError {}

/// The external language-completion collaborator, at its interface boundary
///
/// Implementations perform network calls and may suspend; everything else in
/// the engine is synchronous pure-data code.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Turn one raw conversational turn into structured facts
    async fn extract(
        &self,
        text: &str,
        owner_id: &str,
        turn_id: Uuid,
    ) -> Result<Vec<Fact>, WorkerError>;

    /// Synthesize insights from this turn's facts plus historical context
    async fn reflect(
        &self,
        facts: &[Fact],
        historical_context: &HistoricalBundle,
        owner_id: &str,
    ) -> Result<Vec<Insight>, WorkerError>;

    /// Generate the conversational reply
    async fn respond(&self, text: &str, owner_id: &str) -> Result<String, WorkerError>;
}

/// Run `call` with rate-limit-only exponential-backoff retry
///
/// `call` receives the zero-based attempt number. Non-retryable failures
/// report immediately; retryable ones sleep through a jittered backoff until
/// the attempt cap.
pub(crate) async fn call_with_retry<T, F, Fut>(
    stage: &str,
    max_attempts: u32,
    call: F,
) -> Result<T, WorkerError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, WorkerError>>,
{
    let mut attempt = 0;
    loop {
        match call(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let delay = backoff_delay(attempt, err.retry_after_secs());
                tracing::warn!(
                    stage,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited; backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Exponential backoff with ±25% jitter, respecting Retry-After
fn backoff_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS.saturating_mul(2u64.saturating_pow(attempt));
    let capped_ms = base_ms.min(MAX_RETRY_DELAY_MS);
    let delay_ms = match retry_after_secs {
        // Server-specified delay, capped at 60s, floored at our own backoff
        Some(secs) => (secs.min(60) * 1000).max(capped_ms),
        None => capped_ms,
    };
    let jitter_range = delay_ms / 4;
    let jittered = if jitter_range == 0 {
        delay_ms
    } else {
        let offset = rand::thread_rng().gen_range(0..=2 * jitter_range) as i64 - jitter_range as i64;
        (delay_ms as i64 + offset).max(100) as u64
    };
    Duration::from_millis(jittered)
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

const EXTRACT_SYSTEM_PROMPT: &str = "You extract structured facts from one \
conversational turn. Reply with a JSON array only. Each element: \
{\"entity\": string, \"attribute\": string, \"value\": string, \
\"context_tags\": [string], \"confidence\": number in [0,1]}. \
No prose, no markdown.";

const REFLECT_SYSTEM_PROMPT: &str = "You derive higher-order insights from \
recent facts about a person, checking recent behavior against their known \
long-term goals and plans. Reply with a JSON array only. Each element: \
{\"insight\": string, \"tag\": string or null, \"related_goals\": [string]}. \
When recent behavior conflicts with a recorded goal or plan, set tag to \
\"behavior_deviation\". No prose, no markdown.";

const RESPOND_SYSTEM_PROMPT: &str =
    "You are a warm, concise conversational companion. Reply to the user's message directly.";

/// Chat-completions response shape (the fields this client reads)
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// Wire shape of one extracted fact
#[derive(Debug, Deserialize)]
struct WireFact {
    #[serde(default)]
    entity: String,
    #[serde(default)]
    attribute: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    context_tags: Vec<String>,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

/// Wire shape of one insight; accepts either `insight` or `text`
#[derive(Debug, Deserialize)]
struct WireInsight {
    #[serde(default)]
    insight: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    related_goals: Vec<String>,
}

/// HTTP implementation of [`CompletionService`] against an OpenAI-compatible
/// chat-completions endpoint
pub struct CompletionClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: usize,
    client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            base_url: config.completion_base_url.trim_end_matches('/').to_string(),
            api_key: config.completion_api_key.clone(),
            model: config.completion_model.clone(),
            max_tokens: config.completion_max_tokens,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false)
    }

    /// One chat-completions round trip, classified into [`WorkerError`]
    async fn chat(&self, system: &str, user: &str) -> Result<String, WorkerError> {
        let Some(api_key) = self.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Err(WorkerError::Unconfigured);
        };

        let payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WorkerError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(WorkerError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::Malformed(format!("response body: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(WorkerError::Malformed("empty completion content".to_string()));
        }
        Ok(content)
    }
}

#[async_trait]
impl CompletionService for CompletionClient {
    async fn extract(
        &self,
        text: &str,
        owner_id: &str,
        turn_id: Uuid,
    ) -> Result<Vec<Fact>, WorkerError> {
        let raw = self.chat(EXTRACT_SYSTEM_PROMPT, text).await?;
        let stripped = strip_code_fences(&raw);
        let wire: Vec<WireFact> = serde_json::from_str(stripped)
            .map_err(|e| WorkerError::Malformed(format!("fact array: {e}")))?;

        let now = Utc::now();
        let mut facts = Vec::with_capacity(wire.len());
        for (index, w) in wire.into_iter().enumerate() {
            let fact = Fact {
                owner_id: owner_id.to_string(),
                entity: w.entity.trim().to_string(),
                attribute: w.attribute.trim().to_string(),
                value: w.value.trim().to_string(),
                context_tags: w
                    .context_tags
                    .into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect(),
                confidence: w.confidence,
                source_turn_id: turn_id,
                timestamp: now,
            };
            match validate_fact(&fact) {
                Ok(()) => facts.push(fact),
                Err(e) => {
                    tracing::warn!(owner_id, index, error = %e, "dropping malformed fact");
                }
            }
        }
        Ok(facts)
    }

    async fn reflect(
        &self,
        facts: &[Fact],
        historical_context: &HistoricalBundle,
        owner_id: &str,
    ) -> Result<Vec<Insight>, WorkerError> {
        let facts_text = if facts.is_empty() {
            "(no recent facts)".to_string()
        } else {
            facts.iter().map(|f| f.render()).collect::<Vec<_>>().join("\n")
        };
        let user = if historical_context.is_empty() {
            format!("Recent facts:\n{facts_text}")
        } else {
            format!(
                "Known long-term goals and plans:\n---\n{}\n---\n\nRecent facts:\n{}",
                historical_context.render(),
                facts_text
            )
        };

        let raw = self.chat(REFLECT_SYSTEM_PROMPT, &user).await?;
        let stripped = strip_code_fences(&raw);
        let wire: Vec<WireInsight> = serde_json::from_str(stripped)
            .map_err(|e| WorkerError::Malformed(format!("insight array: {e}")))?;

        let now = Utc::now();
        let source_fact_ids: Vec<_> = facts.iter().map(|f| f.id()).collect();
        let mut insights = Vec::with_capacity(wire.len());
        for (index, w) in wire.into_iter().enumerate() {
            let text = if w.insight.trim().is_empty() {
                w.text.trim().to_string()
            } else {
                w.insight.trim().to_string()
            };
            let insight = Insight {
                id: Uuid::new_v4(),
                owner_id: owner_id.to_string(),
                text,
                tag: w
                    .tag
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty()),
                related_goals: w
                    .related_goals
                    .into_iter()
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty())
                    .collect(),
                source_fact_ids: source_fact_ids.clone(),
                timestamp: now,
            };
            match validate_insight(&insight) {
                Ok(()) => insights.push(insight),
                Err(e) => {
                    tracing::warn!(owner_id, index, error = %e, "dropping malformed insight");
                }
            }
        }

        let deviations = insights.iter().filter(|i| i.is_deviation()).count();
        if deviations > 0 {
            tracing::info!(
                owner_id,
                deviations,
                tag = TAG_BEHAVIOR_DEVIATION,
                "consistency check flagged behavior deviation"
            );
        }
        Ok(insights)
    }

    async fn respond(&self, text: &str, _owner_id: &str) -> Result<String, WorkerError> {
        let reply = self.chat(RESPOND_SYSTEM_PROMPT, text).await?;
        Ok(reply.trim().to_string())
    }
}

/// Strip a surrounding markdown code fence (``` or ```json), if any
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", etc.) up to the first newline
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("[1, 2]"), "[1, 2]");
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  [1]  "), "[1]");
    }

    #[test]
    fn test_only_rate_limit_is_retryable() {
        assert!(WorkerError::RateLimited {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(!WorkerError::DeadlineExceeded.is_retryable());
        assert!(!WorkerError::Http {
            status: 500,
            body: String::new()
        }
        .is_retryable());
        assert!(!WorkerError::Transport("reset".to_string()).is_retryable());
    }

    #[test]
    fn test_backoff_respects_retry_after_floor_and_cap() {
        // Server asking for 2s while our backoff is already 1s: take the max
        let d = backoff_delay(0, Some(2));
        assert!(d.as_millis() >= 1_500 && d.as_millis() <= 2_500);
        // Server asking for an hour: capped at 60s (±25% jitter)
        let d = backoff_delay(0, Some(3_600));
        assert!(d.as_millis() <= 75_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_cap() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), _> = call_with_retry("test", 3, |_| {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async {
                Err(WorkerError::RateLimited {
                    retry_after_secs: None,
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), _> = call_with_retry("test", 3, |_| {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(WorkerError::Transport("reset".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
