//! Smriti
//!
//! Per-person long-term memory engine for conversational agents.
//!
//! Small structured statements ("facts") are extracted from each
//! conversational turn by an external completion service; higher-order
//! interpretive statements ("insights") are derived from them in reflective
//! passes; and a persistent multi-relationship graph links people, entities,
//! and attributes over time with co-occurrence weighting.
//!
//! # Architecture
//! - [`coordinator::TurnCoordinator`] fans each turn out to extraction and
//!   response workers concurrently, conditionally runs reflection, and
//!   applies the graph update exactly once per turn
//! - [`reflection`] decides when a deeper reflective pass is warranted and
//!   assembles its historical context, with a local fallback cache under the
//!   external long-term store
//! - [`retrieval::RetrievalScorer`] ranks stored memories by a
//!   similarity/importance/recency blend
//! - [`graph::GraphStore`] owns the persistent graph: reinforcement instead
//!   of duplication, per-owner isolation, and lossless node-link JSON /
//!   GraphML round trips

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod decay;
pub mod errors;
pub mod graph;
pub mod interchange;
pub mod longterm;
pub mod reflection;
pub mod retrieval;
pub mod similarity;
pub mod tracing_setup;
pub mod types;
pub mod validation;
pub mod workers;

pub use config::EngineConfig;
pub use coordinator::{Turn, TurnCoordinator, TurnOutcome};
pub use graph::{GraphDelta, GraphStore, SharedGraph};
pub use reflection::{should_reflect, HistoricalBundle, ReflectionDecision, ReflectionPolicy};
pub use retrieval::{MemoryItem, RetrievalScorer, ScorerWeights};
pub use types::{Fact, FactId, Insight};

// Re-export dependencies so tests and benches use the same versions
pub use chrono;
pub use parking_lot;
pub use uuid;

/// Convenience constructor for the shared single-writer graph handle
pub fn shared_graph(store: GraphStore) -> SharedGraph {
    std::sync::Arc::new(parking_lot::Mutex::new(store))
}
