//! Reflection trigger policy
//!
//! Pure decision function over a turn's extracted facts, plus the assembly
//! of the historical-context bundle a reflective pass needs. The decision is
//! a tagged result (`Skip` | `Run(bundle)`) handed to the coordinator, not a
//! dynamic dispatch point.
//!
//! The local goal/plan cache is the resilience layer under the external
//! long-term store: purely additive per-owner memory of goal-like facts,
//! refreshed every turn, never invalidated by a successful external
//! retrieval.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::config::EngineConfig;
use crate::constants::REFLECTION_CONFIDENCE_THRESHOLD;
use crate::longterm::LongTermStore;
use crate::retrieval::{MemoryItem, RetrievalScorer};
use crate::types::{Fact, FactId};

/// Whether this turn's facts warrant a deeper reflective pass
///
/// True iff at least one fact's confidence strictly exceeds the threshold;
/// a fact at exactly the threshold does not trigger. Pure function, no side
/// effects.
pub fn should_reflect(facts: &[Fact]) -> bool {
    should_reflect_at(facts, REFLECTION_CONFIDENCE_THRESHOLD)
}

/// [`should_reflect`] with an explicit threshold
pub fn should_reflect_at(facts: &[Fact], threshold: f32) -> bool {
    facts.iter().any(|f| f.confidence > threshold)
}

/// The per-turn reflection decision, communicated explicitly between the
/// policy and the coordinator
#[derive(Debug, Clone)]
pub enum ReflectionDecision {
    Skip,
    Run(HistoricalBundle),
}

/// Ranked, deduplicated historical context for the reflection worker
///
/// Combines external long-term store hits with local fallback-cache hits,
/// ranked by the retrieval scorer and truncated to the configured limit.
#[derive(Debug, Clone, Default)]
pub struct HistoricalBundle {
    pub facts: Vec<Fact>,
}

impl HistoricalBundle {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Readable rendering for the reflection prompt
    pub fn render(&self) -> String {
        self.facts
            .iter()
            .map(|f| f.render())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Reflection trigger policy with its per-owner fallback cache
pub struct ReflectionPolicy {
    threshold: f32,
    goal_attributes: Vec<String>,
    cache_max: usize,
    bundle_limit: usize,
    scorer: RetrievalScorer,

    /// owner_id -> goal/plan facts, oldest first, bounded FIFO
    goal_plan_cache: DashMap<String, Vec<Fact>>,
}

impl ReflectionPolicy {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            threshold: config.reflection_threshold,
            goal_attributes: config.goal_attributes.clone(),
            cache_max: config.goal_plan_cache_max,
            bundle_limit: config.historical_bundle_limit,
            scorer: RetrievalScorer::new(config.scorer_weights, config.recency_half_life_hours),
            goal_plan_cache: DashMap::new(),
        }
    }

    /// Decide whether to reflect, assembling the historical bundle if so
    pub async fn decide(
        &self,
        store: Option<&dyn LongTermStore>,
        owner_id: &str,
        facts: &[Fact],
    ) -> ReflectionDecision {
        if !should_reflect_at(facts, self.threshold) {
            return ReflectionDecision::Skip;
        }
        ReflectionDecision::Run(self.gather_historical_context(store, owner_id, facts).await)
    }

    /// Assemble the historical-context bundle for one owner
    ///
    /// External store hits are filtered by owner and by the union of this
    /// turn's context tags; the local goal/plan cache fills in only when the
    /// store is unavailable, unconfigured, or returns nothing.
    pub async fn gather_historical_context(
        &self,
        store: Option<&dyn LongTermStore>,
        owner_id: &str,
        facts: &[Fact],
    ) -> HistoricalBundle {
        let tags: Vec<String> = facts
            .iter()
            .flat_map(|f| f.context_tags.iter())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let query = self.goal_attributes.join(" ");

        let mut pool: Vec<Fact> = Vec::new();
        if let Some(store) = store {
            if store.is_configured() {
                match store
                    .search(owner_id, &query, &tags, self.bundle_limit)
                    .await
                {
                    Ok(hits) => pool.extend(hits),
                    Err(e) => {
                        tracing::debug!(owner_id, error = %e, "long-term search failed; using local cache");
                    }
                }
            }
        }

        if pool.is_empty() {
            if let Some(cached) = self.goal_plan_cache.get(owner_id) {
                pool.extend(cached.value().iter().cloned());
            }
        }

        // Dedup by identity, keeping first occurrence (external hits win)
        let mut seen: HashSet<FactId> = HashSet::new();
        pool.retain(|f| seen.insert(f.id()));

        let candidates: Vec<MemoryItem> = pool.into_iter().map(MemoryItem::Fact).collect();
        let ranked = self
            .scorer
            .rank(owner_id, &query, &candidates, self.bundle_limit);
        let facts = ranked
            .into_iter()
            .filter_map(|item| match item {
                MemoryItem::Fact(f) => Some(f),
                _ => None,
            })
            .collect();
        HistoricalBundle { facts }
    }

    /// Fold this turn's goal-like facts into the owner's fallback cache
    ///
    /// Additive only: entries age out at the FIFO bound, never because the
    /// external store answered.
    pub fn refresh_cache(&self, owner_id: &str, facts: &[Fact]) {
        let goal_like: Vec<Fact> = facts
            .iter()
            .filter(|f| f.is_goal_like(&self.goal_attributes))
            .cloned()
            .collect();
        if goal_like.is_empty() {
            return;
        }
        let mut entry = self.goal_plan_cache.entry(owner_id.to_string()).or_default();
        entry.extend(goal_like);
        let len = entry.len();
        if len > self.cache_max {
            entry.drain(..len - self.cache_max);
        }
    }

    /// Snapshot of an owner's cached goal/plan facts, oldest first
    pub fn cached_goal_plans(&self, owner_id: &str) -> Vec<Fact> {
        self.goal_plan_cache
            .get(owner_id)
            .map(|v| v.value().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn fact(confidence: f32) -> Fact {
        Fact {
            owner_id: "owner".to_string(),
            entity: "I".to_string(),
            attribute: "goal".to_string(),
            value: "lose weight".to_string(),
            context_tags: vec!["health".to_string()],
            confidence,
            source_turn_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_trigger_requires_strictly_greater() {
        assert!(!should_reflect(&[]));
        assert!(!should_reflect(&[fact(0.5)]));
        // Boundary: exactly at the threshold does not trigger
        assert!(!should_reflect(&[fact(0.8)]));
        assert!(should_reflect(&[fact(0.81)]));
        assert!(should_reflect(&[fact(0.5), fact(0.9)]));
    }

    #[test]
    fn test_cache_is_bounded_fifo() {
        let mut config = crate::config::EngineConfig::default();
        config.goal_plan_cache_max = 3;
        let policy = ReflectionPolicy::new(&config);

        for i in 0..5 {
            let mut f = fact(0.9);
            f.value = format!("goal-{i}");
            policy.refresh_cache("owner", &[f]);
        }
        let cached = policy.cached_goal_plans("owner");
        assert_eq!(cached.len(), 3);
        assert_eq!(cached[0].value, "goal-2");
        assert_eq!(cached[2].value, "goal-4");
    }

    #[test]
    fn test_non_goal_facts_not_cached() {
        let policy = ReflectionPolicy::new(&crate::config::EngineConfig::default());
        let mut f = fact(0.9);
        f.attribute = "behavior".to_string();
        policy.refresh_cache("owner", &[f]);
        assert!(policy.cached_goal_plans("owner").is_empty());
    }
}
