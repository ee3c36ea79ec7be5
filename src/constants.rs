//! Documented constants for the memory engine
//!
//! This module contains all tunable parameters with justification for their
//! values. Centralizing constants prevents magic numbers and makes tuning
//! easier.

// =============================================================================
// GRAPH EDGE CONSTANTS
// =============================================================================

/// Initial weight for a newly created edge
///
/// Every fact's first appearance creates its edge at this weight.
///
/// Justification:
/// - Weight 1 makes edge weight directly interpretable as an observation count
/// - Re-applying an identical fact batch doubles every weight, which keeps
///   reinforcement commutative across concurrently arriving turns
pub const EDGE_INITIAL_WEIGHT: f64 = 1.0;

/// Weight added when an existing edge is reinforced
///
/// Must equal [`EDGE_INITIAL_WEIGHT`] so that N ingestions of the same fact
/// produce weight N regardless of batching.
pub const EDGE_REINFORCEMENT: f64 = 1.0;

/// Relation type used for co-occurrence edges
///
/// Two nodes that appear in the same turn and share at least one context tag
/// get this relation reinforced in both directions, independent of any direct
/// fact edge between them. Multi-hop association queries (person -> topic ->
/// related person) ride on these edges.
pub const CO_OCCURRENCE_RELATION: &str = "co_occurrence";

// =============================================================================
// REFLECTION POLICY CONSTANTS
// =============================================================================

/// Confidence threshold above which a turn warrants a reflective pass
///
/// Strictly-greater comparison: a fact at exactly 0.80 does not trigger.
///
/// Justification:
/// - 0.8 selects only facts the extractor itself is sure about; reflection is
///   the most expensive worker call and should not fire on noisy extractions
pub const REFLECTION_CONFIDENCE_THRESHOLD: f32 = 0.8;

/// Attribute labels treated as goal/plan-like for the local fallback cache
///
/// Facts whose attribute matches one of these are remembered locally so the
/// reflection worker still sees historical goals when the external long-term
/// store is unreachable.
pub const GOAL_LIKE_ATTRIBUTES: &[&str] = &["goal", "plan", "commitment", "intention"];

/// Maximum goal/plan facts retained per owner in the local fallback cache
pub const GOAL_PLAN_CACHE_MAX: usize = 20;

/// Maximum items assembled into a historical bundle
pub const HISTORICAL_BUNDLE_LIMIT: usize = 15;

/// Insight tag marking behavior that conflicts with a recorded goal or plan
pub const TAG_BEHAVIOR_DEVIATION: &str = "behavior_deviation";

// =============================================================================
// RETRIEVAL SCORING CONSTANTS
// =============================================================================

/// Baseline importance for insights in the retrieval scorer
///
/// Justification:
/// - Insights are already-synthesized judgment; at equal similarity they
///   should outrank raw facts, whose importance tops out at confidence 1.0
///   only for the extractor's most certain output
pub const INSIGHT_IMPORTANCE_BASELINE: f32 = 0.9;

/// Neutral importance for graph nodes reached via traversal
///
/// Nodes carry no confidence of their own; 0.5 keeps them competitive without
/// letting bare labels dominate scored facts.
pub const NODE_IMPORTANCE_NEUTRAL: f32 = 0.5;

/// Half-life in hours for the recency sub-score
///
/// A memory item three days old scores 0.5 on recency.
pub const RECENCY_HALF_LIFE_HOURS: f64 = 72.0;

// =============================================================================
// WORKER CALL CONSTANTS
// =============================================================================

/// Maximum attempts for a worker call that fails with a rate-limit condition
///
/// Non-rate-limit failures are never retried; they report immediately.
pub const WORKER_MAX_ATTEMPTS: u32 = 3;

/// Initial retry delay in milliseconds (doubles each attempt)
pub const INITIAL_RETRY_DELAY_MS: u64 = 1_000;

/// Maximum retry delay cap in milliseconds
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Default per-worker deadline in seconds
///
/// A worker exceeding its deadline is treated as that stage failing; the turn
/// proceeds with whatever stages succeeded.
pub const WORKER_DEADLINE_SECS: u64 = 60;

/// Response returned to the caller when the response worker itself fails
pub const FALLBACK_RESPONSE: &str = "Sorry, something went wrong while generating a reply.";
