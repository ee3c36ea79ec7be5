//! Weighted retrieval scoring
//!
//! Ranks stored memory items against a query with a similarity/importance/
//! recency blend. Used both over the graph store's traversal results and
//! over records returned by the external long-term store.
//!
//! Determinism contract: identical candidates, query, and evaluation instant
//! produce the same ordered sequence. Ties break by most-recent timestamp,
//! then lexical identity; items equal on all three keep their input order.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::constants::{
    INSIGHT_IMPORTANCE_BASELINE, NODE_IMPORTANCE_NEUTRAL, RECENCY_HALF_LIFE_HOURS,
};
use crate::decay::recency_score_with_half_life;
use crate::graph::Node;
use crate::similarity::text_similarity;
use crate::types::{Fact, Insight};

/// A candidate for retrieval: a stored fact, a derived insight, or a graph
/// node reached via traversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryItem {
    Fact(Fact),
    Insight(Insight),
    Node(Node),
}

impl MemoryItem {
    pub fn owner_id(&self) -> &str {
        match self {
            Self::Fact(f) => &f.owner_id,
            Self::Insight(i) => &i.owner_id,
            Self::Node(n) => &n.owner_id,
        }
    }

    /// Text the similarity sub-score matches against
    pub fn text(&self) -> String {
        match self {
            Self::Fact(f) => format!("{} {} {}", f.entity, f.attribute, f.value),
            Self::Insight(i) => i.text.clone(),
            Self::Node(n) => n.label.clone(),
        }
    }

    /// Bare nodes carry no timestamp of their own
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Fact(f) => Some(f.timestamp),
            Self::Insight(i) => Some(i.timestamp),
            Self::Node(_) => None,
        }
    }

    /// Importance sub-score: stored confidence for facts, a fixed higher
    /// baseline for insights (already-synthesized judgment outranks raw
    /// facts at equal similarity), neutral for bare nodes
    pub fn importance(&self) -> f32 {
        match self {
            Self::Fact(f) => f.confidence.clamp(0.0, 1.0),
            Self::Insight(_) => INSIGHT_IMPORTANCE_BASELINE,
            Self::Node(_) => NODE_IMPORTANCE_NEUTRAL,
        }
    }

    /// Lexical identity string, the final deterministic tie-break
    pub fn identity(&self) -> String {
        match self {
            Self::Fact(f) => format!("fact:{}", f.id()),
            Self::Insight(i) => format!("insight:{}", i.id),
            Self::Node(n) => format!("node:{}:{}", n.owner_id, n.label),
        }
    }
}

/// Blend weights for the three sub-scores; defaults equal-weighted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScorerWeights {
    pub similarity: f32,
    pub importance: f32,
    pub recency: f32,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        Self {
            similarity: 1.0 / 3.0,
            importance: 1.0 / 3.0,
            recency: 1.0 / 3.0,
        }
    }
}

impl ScorerWeights {
    /// Normalize weights to sum to 1.0; all-zero weights fall back to the
    /// equal-weighted default
    pub fn normalized(self) -> Self {
        let sum = self.similarity + self.importance + self.recency;
        if sum <= 0.0 {
            return Self::default();
        }
        Self {
            similarity: self.similarity / sum,
            importance: self.importance / sum,
            recency: self.recency / sum,
        }
    }
}

/// The retrieval scorer; cheap to construct, never mutates its inputs
#[derive(Debug, Clone)]
pub struct RetrievalScorer {
    weights: ScorerWeights,
    recency_half_life_hours: f64,
}

impl Default for RetrievalScorer {
    fn default() -> Self {
        Self::new(ScorerWeights::default(), RECENCY_HALF_LIFE_HOURS)
    }
}

impl RetrievalScorer {
    pub fn new(weights: ScorerWeights, recency_half_life_hours: f64) -> Self {
        Self {
            weights: weights.normalized(),
            recency_half_life_hours,
        }
    }

    /// Composite score for one item in [0, 1]
    pub fn score(&self, query: &str, item: &MemoryItem, now: DateTime<Utc>) -> f32 {
        let similarity = text_similarity(query, &item.text());
        let importance = item.importance();
        let recency = match item.timestamp() {
            Some(ts) => recency_score_with_half_life(ts, now, self.recency_half_life_hours),
            // No timestamp to decay from: score the neutral floor
            None => NODE_IMPORTANCE_NEUTRAL,
        };
        self.weights.similarity * similarity
            + self.weights.importance * importance
            + self.weights.recency * recency
    }

    /// Rank candidates for an owner against a query, best first
    ///
    /// Filters to the owner's items, scores, and returns the top `limit`
    /// clones. Evaluates recency at the moment of the call; use
    /// [`RetrievalScorer::rank_at`] when a fixed evaluation instant matters.
    pub fn rank(
        &self,
        owner_id: &str,
        query: &str,
        candidates: &[MemoryItem],
        limit: usize,
    ) -> Vec<MemoryItem> {
        self.rank_at(owner_id, query, candidates, limit, Utc::now())
    }

    /// [`RetrievalScorer::rank`] with an explicit evaluation instant
    pub fn rank_at(
        &self,
        owner_id: &str,
        query: &str,
        candidates: &[MemoryItem],
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<MemoryItem> {
        let mut scored: Vec<(OrderedFloat<f32>, &MemoryItem)> = candidates
            .iter()
            .filter(|item| item.owner_id() == owner_id)
            .map(|item| (OrderedFloat(self.score(query, item, now)), item))
            .collect();

        // Stable sort: equal-score equal-tie items keep input order
        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .cmp(score_a)
                .then_with(|| b.timestamp().cmp(&a.timestamp()))
                .then_with(|| a.identity().cmp(&b.identity()))
        });

        scored
            .into_iter()
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn fact(value: &str, confidence: f32, age_hours: i64) -> MemoryItem {
        MemoryItem::Fact(Fact {
            owner_id: "owner".to_string(),
            entity: "I".to_string(),
            attribute: "goal".to_string(),
            value: value.to_string(),
            context_tags: vec![],
            confidence,
            source_turn_id: Uuid::nil(),
            timestamp: Utc::now() - chrono::Duration::hours(age_hours),
        })
    }

    #[test]
    fn test_weights_normalize() {
        let w = ScorerWeights {
            similarity: 2.0,
            importance: 1.0,
            recency: 1.0,
        }
        .normalized();
        assert!((w.similarity - 0.5).abs() < 1e-6);
        assert!((w.similarity + w.importance + w.recency - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_weights_fall_back_to_default() {
        let w = ScorerWeights {
            similarity: 0.0,
            importance: 0.0,
            recency: 0.0,
        }
        .normalized();
        assert_eq!(w, ScorerWeights::default());
    }

    #[test]
    fn test_owner_filter() {
        let scorer = RetrievalScorer::default();
        let items = vec![fact("run", 0.9, 1)];
        assert!(scorer.rank("someone-else", "run", &items, 10).is_empty());
        assert_eq!(scorer.rank("owner", "run", &items, 10).len(), 1);
    }

    #[test]
    fn test_insight_outranks_fact_at_equal_similarity() {
        let scorer = RetrievalScorer::default();
        let now = Utc::now();
        let f = fact("exercise daily", 0.8, 0);
        let i = MemoryItem::Insight(Insight {
            id: Uuid::new_v4(),
            owner_id: "owner".to_string(),
            text: "exercise daily".to_string(),
            tag: None,
            related_goals: vec![],
            source_fact_ids: vec![],
            timestamp: now,
        });
        let ranked = scorer.rank_at("owner", "exercise daily", &[f, i.clone()], 2, now);
        assert_eq!(ranked[0], i);
    }
}
