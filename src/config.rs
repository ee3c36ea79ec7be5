//! Configuration management for the memory engine
//!
//! All configurable parameters in one place with environment variable
//! overrides. Follows the principle: sensible defaults, configurable in
//! production.

use std::env;
use std::path::PathBuf;
use tracing::info;

use crate::constants::{
    GOAL_LIKE_ATTRIBUTES, GOAL_PLAN_CACHE_MAX, HISTORICAL_BUNDLE_LIMIT,
    RECENCY_HALF_LIFE_HOURS, REFLECTION_CONFIDENCE_THRESHOLD, WORKER_DEADLINE_SECS,
    WORKER_MAX_ATTEMPTS,
};
use crate::retrieval::ScorerWeights;

/// Engine configuration loaded from environment with defaults
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Completion service base URL (OpenAI-compatible chat completions)
    pub completion_base_url: String,

    /// Completion service API key; unset leaves the client unconfigured
    pub completion_api_key: Option<String>,

    /// Model id passed to the completion service
    pub completion_model: String,

    /// Max tokens per completion call
    pub completion_max_tokens: usize,

    /// Long-term store base URL; unset disables the external store
    pub longterm_base_url: Option<String>,

    /// Long-term store API key
    pub longterm_api_key: Option<String>,

    /// Per-worker deadline in seconds; a miss counts as that stage failing
    pub worker_deadline_secs: u64,

    /// Attempt cap for rate-limited worker calls
    pub worker_max_attempts: u32,

    /// Retrieval scorer blend weights (normalized on use)
    pub scorer_weights: ScorerWeights,

    /// Recency half-life in hours for the retrieval scorer
    pub recency_half_life_hours: f64,

    /// Confidence threshold (strictly greater) that triggers reflection
    pub reflection_threshold: f32,

    /// Attribute labels treated as goal/plan-like for the fallback cache
    pub goal_attributes: Vec<String>,

    /// Per-owner bound on the goal/plan fallback cache
    pub goal_plan_cache_max: usize,

    /// Max items assembled into a historical bundle
    pub historical_bundle_limit: usize,

    /// Whether `process` awaits reflection before returning (default) or
    /// completes reflection and the graph update in a background task
    pub synchronous_reflection: bool,

    /// Directory for graph checkpoints (default: ./smriti_data)
    pub graph_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            completion_base_url: "https://openrouter.ai/api/v1".to_string(),
            completion_api_key: None,
            completion_model: "anthropic/claude-3.5-sonnet".to_string(),
            completion_max_tokens: 2048,
            longterm_base_url: None,
            longterm_api_key: None,
            worker_deadline_secs: WORKER_DEADLINE_SECS,
            worker_max_attempts: WORKER_MAX_ATTEMPTS,
            scorer_weights: ScorerWeights::default(),
            recency_half_life_hours: RECENCY_HALF_LIFE_HOURS,
            reflection_threshold: REFLECTION_CONFIDENCE_THRESHOLD,
            goal_attributes: GOAL_LIKE_ATTRIBUTES.iter().map(|s| s.to_string()).collect(),
            goal_plan_cache_max: GOAL_PLAN_CACHE_MAX,
            historical_bundle_limit: HISTORICAL_BUNDLE_LIMIT,
            synchronous_reflection: true,
            graph_path: PathBuf::from("./smriti_data"),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)] // Environment overrides require mutable config
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("SMRITI_COMPLETION_URL") {
            config.completion_base_url = val;
        }
        if let Ok(val) = env::var("SMRITI_COMPLETION_API_KEY") {
            if !val.trim().is_empty() {
                config.completion_api_key = Some(val.trim().to_string());
            }
        }
        if let Ok(val) = env::var("SMRITI_COMPLETION_MODEL") {
            config.completion_model = val;
        }
        if let Ok(val) = env::var("SMRITI_COMPLETION_MAX_TOKENS") {
            if let Ok(n) = val.parse() {
                config.completion_max_tokens = n;
            }
        }

        if let Ok(val) = env::var("SMRITI_LONGTERM_URL") {
            if !val.trim().is_empty() {
                config.longterm_base_url = Some(val.trim().to_string());
            }
        }
        if let Ok(val) = env::var("SMRITI_LONGTERM_API_KEY") {
            if !val.trim().is_empty() {
                config.longterm_api_key = Some(val.trim().to_string());
            }
        }

        if let Ok(val) = env::var("SMRITI_WORKER_DEADLINE") {
            if let Ok(n) = val.parse() {
                config.worker_deadline_secs = n;
            }
        }
        if let Ok(val) = env::var("SMRITI_WORKER_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse::<u32>() {
                config.worker_max_attempts = n.clamp(1, 10);
            }
        }

        if let Ok(val) = env::var("SMRITI_WEIGHT_SIMILARITY") {
            if let Ok(n) = val.parse() {
                config.scorer_weights.similarity = n;
            }
        }
        if let Ok(val) = env::var("SMRITI_WEIGHT_IMPORTANCE") {
            if let Ok(n) = val.parse() {
                config.scorer_weights.importance = n;
            }
        }
        if let Ok(val) = env::var("SMRITI_WEIGHT_RECENCY") {
            if let Ok(n) = val.parse() {
                config.scorer_weights.recency = n;
            }
        }
        if let Ok(val) = env::var("SMRITI_RECENCY_HALF_LIFE_HOURS") {
            if let Ok(n) = val.parse::<f64>() {
                if n > 0.0 {
                    config.recency_half_life_hours = n;
                }
            }
        }

        if let Ok(val) = env::var("SMRITI_REFLECTION_THRESHOLD") {
            if let Ok(n) = val.parse::<f32>() {
                config.reflection_threshold = n.clamp(0.0, 1.0);
            }
        }
        if let Ok(val) = env::var("SMRITI_GOAL_ATTRIBUTES") {
            let attrs: Vec<String> = val
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !attrs.is_empty() {
                config.goal_attributes = attrs;
            }
        }
        if let Ok(val) = env::var("SMRITI_GOAL_CACHE_MAX") {
            if let Ok(n) = val.parse::<usize>() {
                config.goal_plan_cache_max = n.max(1);
            }
        }
        if let Ok(val) = env::var("SMRITI_BUNDLE_LIMIT") {
            if let Ok(n) = val.parse::<usize>() {
                config.historical_bundle_limit = n.max(1);
            }
        }

        if let Ok(val) = env::var("SMRITI_SYNC_REFLECTION") {
            config.synchronous_reflection = val.to_lowercase() != "false" && val != "0";
        }
        if let Ok(val) = env::var("SMRITI_GRAPH_PATH") {
            config.graph_path = PathBuf::from(val);
        }

        config
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("Configuration:");
        info!("   Completion endpoint: {}", self.completion_base_url);
        info!("   Completion model: {}", self.completion_model);
        info!(
            "   Completion key: {}",
            if self.completion_api_key.is_some() { "set" } else { "NOT SET" }
        );
        info!(
            "   Long-term store: {}",
            match &self.longterm_base_url {
                Some(url) => url.as_str(),
                None => "disabled",
            }
        );
        info!(
            "   Worker deadline: {}s (max attempts: {})",
            self.worker_deadline_secs, self.worker_max_attempts
        );
        info!(
            "   Scorer weights: sim={:.2} imp={:.2} rec={:.2} (half-life {}h)",
            self.scorer_weights.similarity,
            self.scorer_weights.importance,
            self.scorer_weights.recency,
            self.recency_half_life_hours
        );
        info!(
            "   Reflection: threshold {:.2}, {} mode",
            self.reflection_threshold,
            if self.synchronous_reflection { "synchronous" } else { "detached" }
        );
        info!("   Goal attributes: {:?}", self.goal_attributes);
        info!("   Graph path: {:?}", self.graph_path);
    }
}

/// Environment variable documentation
#[allow(unused)] // Public API - available for CLI help output
pub fn print_env_help() {
    println!("Smriti Configuration Environment Variables:");
    println!();
    println!("  SMRITI_COMPLETION_URL         - Chat-completions base URL (default: https://openrouter.ai/api/v1)");
    println!("  SMRITI_COMPLETION_API_KEY     - Completion service API key");
    println!("  SMRITI_COMPLETION_MODEL       - Model id (default: anthropic/claude-3.5-sonnet)");
    println!("  SMRITI_COMPLETION_MAX_TOKENS  - Max tokens per call (default: 2048)");
    println!("  SMRITI_LONGTERM_URL           - Long-term store base URL (unset = disabled)");
    println!("  SMRITI_LONGTERM_API_KEY       - Long-term store API key");
    println!("  SMRITI_WORKER_DEADLINE        - Per-worker deadline seconds (default: 60)");
    println!("  SMRITI_WORKER_MAX_ATTEMPTS    - Rate-limit retry cap (default: 3)");
    println!("  SMRITI_WEIGHT_SIMILARITY      - Scorer similarity weight (default: 1/3)");
    println!("  SMRITI_WEIGHT_IMPORTANCE      - Scorer importance weight (default: 1/3)");
    println!("  SMRITI_WEIGHT_RECENCY         - Scorer recency weight (default: 1/3)");
    println!("  SMRITI_RECENCY_HALF_LIFE_HOURS - Recency half-life (default: 72)");
    println!("  SMRITI_REFLECTION_THRESHOLD   - Reflection trigger threshold (default: 0.8)");
    println!("  SMRITI_GOAL_ATTRIBUTES        - Comma-separated goal-like attributes");
    println!("  SMRITI_GOAL_CACHE_MAX         - Fallback cache bound per owner (default: 20)");
    println!("  SMRITI_BUNDLE_LIMIT           - Historical bundle size (default: 15)");
    println!("  SMRITI_SYNC_REFLECTION        - false/0 for detached reflection (default: true)");
    println!("  SMRITI_GRAPH_PATH             - Graph checkpoint directory (default: ./smriti_data)");
    println!();
    println!("  RUST_LOG                      - Log level (e.g., info, debug, trace)");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_deadline_secs, WORKER_DEADLINE_SECS);
        assert_eq!(config.worker_max_attempts, WORKER_MAX_ATTEMPTS);
        assert!(config.synchronous_reflection);
        assert!(config.completion_api_key.is_none());
        assert_eq!(config.reflection_threshold, 0.8);
    }

    #[test]
    fn test_env_override() {
        env::set_var("SMRITI_WORKER_DEADLINE", "5");
        env::set_var("SMRITI_REFLECTION_THRESHOLD", "0.9");
        env::set_var("SMRITI_GOAL_ATTRIBUTES", "Goal, Aspiration");

        let config = EngineConfig::from_env();
        assert_eq!(config.worker_deadline_secs, 5);
        assert!((config.reflection_threshold - 0.9).abs() < 1e-6);
        assert_eq!(config.goal_attributes, vec!["goal", "aspiration"]);

        env::remove_var("SMRITI_WORKER_DEADLINE");
        env::remove_var("SMRITI_REFLECTION_THRESHOLD");
        env::remove_var("SMRITI_GOAL_ATTRIBUTES");
    }

    #[test]
    fn test_sync_reflection_flag() {
        env::set_var("SMRITI_SYNC_REFLECTION", "false");
        let config = EngineConfig::from_env();
        assert!(!config.synchronous_reflection);
        env::remove_var("SMRITI_SYNC_REFLECTION");
    }
}
