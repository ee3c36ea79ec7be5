//! Reflection Policy Tests
//!
//! Trigger boundary behavior, historical-bundle assembly from the external
//! store and the local fallback cache, and the cache's additive-only
//! retention.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use smriti::config::EngineConfig;
use smriti::longterm::LongTermStore;
use smriti::reflection::{should_reflect, ReflectionDecision, ReflectionPolicy};
use smriti::types::Fact;
use smriti::uuid::Uuid;
use smriti::workers::WorkerError;

const OWNER: &str = "user_health";

fn fact(attribute: &str, value: &str, confidence: f32) -> Fact {
    Fact {
        owner_id: OWNER.to_string(),
        entity: "I".to_string(),
        attribute: attribute.to_string(),
        value: value.to_string(),
        context_tags: vec!["health".to_string()],
        confidence,
        source_turn_id: Uuid::new_v4(),
        timestamp: Utc::now(),
    }
}

/// Scripted long-term store: either a canned result or a failure
struct ScriptedStore {
    result: Mutex<Option<Result<Vec<Fact>, WorkerError>>>,
    configured: bool,
    search_calls: Mutex<u32>,
}

impl ScriptedStore {
    fn returning(facts: Vec<Fact>) -> Self {
        Self {
            result: Mutex::new(Some(Ok(facts))),
            configured: true,
            search_calls: Mutex::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            result: Mutex::new(Some(Err(WorkerError::Transport(
                "connection refused".to_string(),
            )))),
            configured: true,
            search_calls: Mutex::new(0),
        }
    }

    fn unconfigured() -> Self {
        Self {
            result: Mutex::new(None),
            configured: false,
            search_calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl LongTermStore for ScriptedStore {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn search(
        &self,
        _owner_id: &str,
        _query: &str,
        _tags: &[String],
        _limit: usize,
    ) -> Result<Vec<Fact>, WorkerError> {
        *self.search_calls.lock() += 1;
        self.result
            .lock()
            .take()
            .unwrap_or(Ok(Vec::new()))
    }

    async fn write(&self, facts: &[Fact], _owner_id: &str) -> Result<usize, WorkerError> {
        Ok(facts.len())
    }
}

#[test]
fn test_trigger_boundary() {
    assert!(!should_reflect(&[]));
    assert!(!should_reflect(&[fact("behavior", "slept in", 0.79)]));
    // Exactly at the threshold: no trigger
    assert!(!should_reflect(&[fact("goal", "lose weight", 0.8)]));
    assert!(should_reflect(&[fact("goal", "lose weight", 0.801)]));
}

#[tokio::test]
async fn test_decide_skip_carries_no_bundle() {
    let policy = ReflectionPolicy::new(&EngineConfig::default());
    let decision = policy
        .decide(None, OWNER, &[fact("behavior", "slept in", 0.5)])
        .await;
    assert!(matches!(decision, ReflectionDecision::Skip));
}

#[tokio::test]
async fn test_bundle_prefers_external_hits() {
    let policy = ReflectionPolicy::new(&EngineConfig::default());
    // Local cache already holds a goal from an earlier turn
    policy.refresh_cache(OWNER, &[fact("goal", "cached goal", 0.9)]);

    let store = ScriptedStore::returning(vec![fact("goal", "external goal", 0.9)]);
    let bundle = policy
        .gather_historical_context(Some(&store), OWNER, &[fact("goal", "today", 0.9)])
        .await;

    assert_eq!(bundle.len(), 1);
    assert_eq!(bundle.facts[0].value, "external goal");
}

#[tokio::test]
async fn test_cache_survives_external_success() {
    let policy = ReflectionPolicy::new(&EngineConfig::default());
    policy.refresh_cache(OWNER, &[fact("goal", "cached goal", 0.9)]);

    let store = ScriptedStore::returning(vec![fact("goal", "external goal", 0.9)]);
    let _ = policy
        .gather_historical_context(Some(&store), OWNER, &[])
        .await;

    // The cache is the resilience layer: refreshed, never invalidated by a
    // successful external retrieval
    let cached = policy.cached_goal_plans(OWNER);
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].value, "cached goal");
}

#[tokio::test]
async fn test_fallback_to_cache_when_store_fails() {
    let policy = ReflectionPolicy::new(&EngineConfig::default());
    policy.refresh_cache(OWNER, &[fact("goal", "cached goal", 0.9)]);

    let store = ScriptedStore::failing();
    let bundle = policy
        .gather_historical_context(Some(&store), OWNER, &[])
        .await;

    assert_eq!(bundle.len(), 1);
    assert_eq!(bundle.facts[0].value, "cached goal");
}

#[tokio::test]
async fn test_fallback_to_cache_when_store_returns_nothing() {
    let policy = ReflectionPolicy::new(&EngineConfig::default());
    policy.refresh_cache(OWNER, &[fact("goal", "cached goal", 0.9)]);

    let store = ScriptedStore::returning(Vec::new());
    let bundle = policy
        .gather_historical_context(Some(&store), OWNER, &[])
        .await;

    assert_eq!(bundle.len(), 1);
    assert_eq!(bundle.facts[0].value, "cached goal");
}

#[tokio::test]
async fn test_unconfigured_store_is_never_queried() {
    let policy = ReflectionPolicy::new(&EngineConfig::default());
    policy.refresh_cache(OWNER, &[fact("goal", "cached goal", 0.9)]);

    let store = ScriptedStore::unconfigured();
    let bundle = policy
        .gather_historical_context(Some(&store), OWNER, &[])
        .await;

    assert_eq!(*store.search_calls.lock(), 0);
    assert_eq!(bundle.len(), 1);
}

#[tokio::test]
async fn test_bundle_deduplicates_by_identity() {
    let policy = ReflectionPolicy::new(&EngineConfig::default());
    let goal = fact("goal", "lose weight", 0.9);
    let store = ScriptedStore::returning(vec![goal.clone(), goal.clone()]);

    let bundle = policy
        .gather_historical_context(Some(&store), OWNER, &[])
        .await;
    assert_eq!(bundle.len(), 1);
}

#[tokio::test]
async fn test_bundle_respects_limit() {
    let mut config = EngineConfig::default();
    config.historical_bundle_limit = 2;
    let policy = ReflectionPolicy::new(&config);

    let hits: Vec<Fact> = (0..5)
        .map(|i| fact("goal", &format!("goal {i}"), 0.9))
        .collect();
    let store = ScriptedStore::returning(hits);

    let bundle = policy
        .gather_historical_context(Some(&store), OWNER, &[])
        .await;
    assert_eq!(bundle.len(), 2);
}

#[tokio::test]
async fn test_decide_run_carries_historical_bundle() {
    let policy = ReflectionPolicy::new(&EngineConfig::default());
    policy.refresh_cache(OWNER, &[fact("goal", "lose weight", 0.9)]);

    let decision = policy
        .decide(None, OWNER, &[fact("behavior", "skipped run", 0.85)])
        .await;
    match decision {
        ReflectionDecision::Run(bundle) => {
            assert_eq!(bundle.len(), 1);
            assert_eq!(bundle.facts[0].value, "lose weight");
        }
        ReflectionDecision::Skip => panic!("high-confidence fact must trigger reflection"),
    }
}
