//! Core data model: facts and insights
//!
//! Facts are atomic structured observations extracted from one conversational
//! turn. Insights are interpretive statements derived from a batch of facts.
//! Both are write-once inputs to the graph store; nothing in the engine
//! mutates them after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a fact: `(owner_id, source_turn_id, entity, attribute, value)`
///
/// Two extractions of the same statement in the same turn for the same owner
/// are the same fact. Ordering is lexical over the tuple, which gives the
/// retrieval scorer a deterministic final tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactId {
    pub owner_id: String,
    pub source_turn_id: Uuid,
    pub entity: String,
    pub attribute: String,
    pub value: String,
}

impl std::fmt::Display for FactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.owner_id, self.source_turn_id, self.entity, self.attribute, self.value
        )
    }
}

/// A single structured observation extracted from a conversational turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// The person this memory belongs to (isolation boundary)
    pub owner_id: String,

    /// Subject of the observation (e.g., "I", "Mom", "the gym")
    pub entity: String,

    /// Relation label (e.g., "goal", "behavior", "likes")
    pub attribute: String,

    /// Object of the observation (e.g., "lose weight")
    pub value: String,

    /// Category labels (e.g., "health", "family"); set semantics, order kept
    /// for display only
    #[serde(default)]
    pub context_tags: Vec<String>,

    /// Extractor confidence in [0, 1]
    pub confidence: f32,

    /// Turn that produced this fact
    pub source_turn_id: Uuid,

    /// When the fact was extracted
    pub timestamp: DateTime<Utc>,
}

impl Fact {
    /// Identity tuple for deduplication and insight attachment
    pub fn id(&self) -> FactId {
        FactId {
            owner_id: self.owner_id.clone(),
            source_turn_id: self.source_turn_id,
            entity: self.entity.clone(),
            attribute: self.attribute.clone(),
            value: self.value.clone(),
        }
    }

    /// Whether this fact's attribute matches any of the given goal-like labels
    /// (case-insensitive, substring match so "long_term_goal" counts)
    pub fn is_goal_like(&self, goal_attributes: &[String]) -> bool {
        let attr = self.attribute.to_lowercase();
        goal_attributes
            .iter()
            .any(|g| !g.is_empty() && attr.contains(&g.to_lowercase()))
    }

    /// Readable one-line rendering used in prompts and diagnostics
    pub fn render(&self) -> String {
        if self.context_tags.is_empty() {
            format!("{} {} {}", self.entity, self.attribute, self.value)
        } else {
            format!(
                "{} {} {} [{}]",
                self.entity,
                self.attribute,
                self.value,
                self.context_tags.join(", ")
            )
        }
    }
}

/// A derived interpretive statement produced from a batch of facts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Unique identifier
    pub id: Uuid,

    /// The person this insight belongs to
    pub owner_id: String,

    /// The interpretive statement itself
    pub text: String,

    /// Optional marker; `behavior_deviation` flags conflict with a recorded
    /// goal or plan
    #[serde(default)]
    pub tag: Option<String>,

    /// Goals this insight relates to, in the order the reflection worker
    /// reported them
    #[serde(default)]
    pub related_goals: Vec<String>,

    /// Facts this insight was synthesized from; the graph store attaches the
    /// insight only to nodes these facts reference
    #[serde(default)]
    pub source_fact_ids: Vec<FactId>,

    /// When the insight was produced
    pub timestamp: DateTime<Utc>,
}

impl Insight {
    /// Whether this insight carries the behavior-deviation marker
    pub fn is_deviation(&self) -> bool {
        self.tag
            .as_deref()
            .map(|t| t == crate::constants::TAG_BEHAVIOR_DEVIATION)
            .unwrap_or(false)
    }
}
