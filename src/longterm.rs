//! Long-term cloud store client
//!
//! Secondary persistence/retrieval backend for extracted facts. Best-effort
//! and asynchronous: write failures are logged and swallowed, search
//! failures fall back to the reflection policy's local cache. Some
//! deployments don't expose a search endpoint at all; 404/501 there means
//! "no history", not an error.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::types::Fact;
use crate::workers::WorkerError;

/// The external long-term store, at its interface boundary
#[async_trait]
pub trait LongTermStore: Send + Sync {
    /// Whether credentials are present; unconfigured stores are skipped
    /// without logging noise
    fn is_configured(&self) -> bool {
        true
    }

    /// Retrieve fact-shaped records for an owner, filtered by query text and
    /// context tags
    async fn search(
        &self,
        owner_id: &str,
        query: &str,
        tags: &[String],
        limit: usize,
    ) -> Result<Vec<Fact>, WorkerError>;

    /// Persist a batch of facts; returns how many the store accepted
    async fn write(&self, facts: &[Fact], owner_id: &str) -> Result<usize, WorkerError>;
}

/// One record in a search response; tolerant of several backend shapes
#[derive(Debug, Deserialize)]
struct WireMemory {
    #[serde(default)]
    entity: Option<String>,
    #[serde(default)]
    attribute: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    context_tags: Vec<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    metadata: Option<WireMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireMetadata {
    #[serde(default)]
    entity: Option<String>,
    #[serde(default)]
    attribute: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Search response envelope; accepts a bare array or a wrapped list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Bare(Vec<WireMemory>),
    Wrapped {
        #[serde(default, alias = "results", alias = "data")]
        memories: Vec<WireMemory>,
    },
}

/// HTTP implementation of [`LongTermStore`]
pub struct MemoryCloudClient {
    base_url: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl MemoryCloudClient {
    pub fn new(config: &EngineConfig) -> Self {
        let base_url = config
            .longterm_base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        let api_key = config.longterm_api_key.clone().filter(|k| !k.is_empty());
        if base_url.is_none() || api_key.is_none() {
            tracing::warn!("long-term store not configured; local fallback cache only");
        }
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.base_url.as_deref()?, self.api_key.as_deref()?))
    }

    /// Reconstruct a fact-shaped record from whatever the backend returned
    fn to_fact(&self, wire: WireMemory, owner_id: &str) -> Option<Fact> {
        let meta = wire.metadata;
        let entity = wire
            .entity
            .or_else(|| meta.as_ref().and_then(|m| m.entity.clone()))
            .unwrap_or_default();
        let attribute = wire
            .attribute
            .or_else(|| meta.as_ref().and_then(|m| m.attribute.clone()))
            .unwrap_or_default();
        let value = wire
            .value
            .or_else(|| meta.as_ref().and_then(|m| m.value.clone()))
            .or_else(|| wire.content.as_ref().map(|c| c.chars().take(200).collect()))
            .unwrap_or_default();
        let confidence = wire
            .confidence
            .or_else(|| meta.as_ref().and_then(|m| m.confidence))
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        if entity.is_empty() && attribute.is_empty() && value.is_empty() {
            return None;
        }
        let context_tags = if wire.context_tags.is_empty() {
            wire.tags
        } else {
            wire.context_tags
        };
        Some(Fact {
            owner_id: owner_id.to_string(),
            // Pure-text records carry no structure; keep them queryable
            entity: if entity.is_empty() { "member".to_string() } else { entity },
            attribute: if attribute.is_empty() { "recorded_memory".to_string() } else { attribute },
            value,
            context_tags,
            confidence,
            source_turn_id: Uuid::nil(),
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl LongTermStore for MemoryCloudClient {
    fn is_configured(&self) -> bool {
        self.credentials().is_some()
    }

    async fn search(
        &self,
        owner_id: &str,
        query: &str,
        tags: &[String],
        limit: usize,
    ) -> Result<Vec<Fact>, WorkerError> {
        let Some((base_url, api_key)) = self.credentials() else {
            return Err(WorkerError::Unconfigured);
        };

        let mut payload = json!({
            "user_id": owner_id,
            "limit": limit,
        });
        if !query.is_empty() {
            payload["query"] = json!(query);
        }
        if !tags.is_empty() {
            payload["tags"] = json!(tags);
        }

        let response = self
            .client
            .post(format!("{base_url}/search"))
            .header("Authorization", format!("Token {api_key}"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| WorkerError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 || status.as_u16() == 501 {
            tracing::debug!("long-term store has no search endpoint; treating as no history");
            return Ok(Vec::new());
        }
        if status.as_u16() == 429 {
            return Err(WorkerError::RateLimited {
                retry_after_secs: None,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::Malformed(format!("search response: {e}")))?;
        let records = match parsed {
            SearchResponse::Bare(records) => records,
            SearchResponse::Wrapped { memories } => memories,
        };
        Ok(records
            .into_iter()
            .take(limit)
            .filter_map(|w| self.to_fact(w, owner_id))
            .collect())
    }

    async fn write(&self, facts: &[Fact], owner_id: &str) -> Result<usize, WorkerError> {
        let Some((base_url, api_key)) = self.credentials() else {
            return Err(WorkerError::Unconfigured);
        };
        if facts.is_empty() {
            return Ok(0);
        }

        let mut accepted = 0;
        for fact in facts {
            let payload = json!({
                "user_id": owner_id,
                "messages": [{"role": "user", "content": fact.render()}],
                "metadata": {
                    "entity": fact.entity,
                    "attribute": fact.attribute,
                    "value": fact.value,
                    "confidence": fact.confidence,
                },
                "tags": fact.context_tags,
            });
            let result = self
                .client
                .post(format!("{base_url}/add/message"))
                .header("Authorization", format!("Token {api_key}"))
                .json(&payload)
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => accepted += 1,
                Ok(response) => {
                    tracing::warn!(
                        owner_id,
                        status = response.status().as_u16(),
                        entity = %fact.entity,
                        "long-term store rejected fact"
                    );
                }
                Err(e) => {
                    tracing::warn!(owner_id, error = %e, "long-term store write failed");
                }
            }
        }
        Ok(accepted)
    }
}
