//! Input validation for facts, insights, and owner ids
//!
//! Malformed items coming back from the completion service are rejected
//! individually with a per-item diagnostic, never failing the whole batch.

use anyhow::{anyhow, Result};

use crate::types::{Fact, Insight};

/// Maximum lengths, matching what the extraction prompt is told to produce
pub const MAX_OWNER_ID_LENGTH: usize = 128;
pub const MAX_LABEL_LENGTH: usize = 256;
pub const MAX_INSIGHT_TEXT_LENGTH: usize = 4_000;
pub const MAX_TAGS_PER_FACT: usize = 16;

/// Validate owner_id
pub fn validate_owner_id(owner_id: &str) -> Result<()> {
    if owner_id.is_empty() {
        return Err(anyhow!("owner_id cannot be empty"));
    }

    if owner_id.len() > MAX_OWNER_ID_LENGTH {
        return Err(anyhow!(
            "owner_id too long: {} chars (max: {})",
            owner_id.len(),
            MAX_OWNER_ID_LENGTH
        ));
    }

    // Only allow alphanumeric, dash, underscore, @, .
    if !owner_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '@' || c == '.')
    {
        return Err(anyhow!(
            "owner_id contains invalid characters (allowed: alphanumeric, -, _, @, .)"
        ));
    }

    Ok(())
}

/// Validate a fact's shape
///
/// A fact with no entity or no attribute cannot be placed in the graph; a
/// confidence outside [0, 1] means the extractor returned garbage.
pub fn validate_fact(fact: &Fact) -> Result<()> {
    if fact.entity.trim().is_empty() {
        return Err(anyhow!("fact has empty entity"));
    }
    if fact.attribute.trim().is_empty() {
        return Err(anyhow!("fact has empty attribute"));
    }
    if fact.entity.len() > MAX_LABEL_LENGTH {
        return Err(anyhow!(
            "entity too long: {} chars (max: {})",
            fact.entity.len(),
            MAX_LABEL_LENGTH
        ));
    }
    if fact.attribute.len() > MAX_LABEL_LENGTH {
        return Err(anyhow!(
            "attribute too long: {} chars (max: {})",
            fact.attribute.len(),
            MAX_LABEL_LENGTH
        ));
    }
    if fact.value.len() > MAX_LABEL_LENGTH {
        return Err(anyhow!(
            "value too long: {} chars (max: {})",
            fact.value.len(),
            MAX_LABEL_LENGTH
        ));
    }
    if !(0.0..=1.0).contains(&fact.confidence) || !fact.confidence.is_finite() {
        return Err(anyhow!(
            "confidence out of range [0, 1]: {}",
            fact.confidence
        ));
    }
    if fact.context_tags.len() > MAX_TAGS_PER_FACT {
        return Err(anyhow!(
            "too many context tags: {} (max: {})",
            fact.context_tags.len(),
            MAX_TAGS_PER_FACT
        ));
    }
    validate_owner_id(&fact.owner_id)?;
    Ok(())
}

/// Validate an insight's shape
pub fn validate_insight(insight: &Insight) -> Result<()> {
    if insight.text.trim().is_empty() {
        return Err(anyhow!("insight has empty text"));
    }
    if insight.text.len() > MAX_INSIGHT_TEXT_LENGTH {
        return Err(anyhow!(
            "insight text too long: {} chars (max: {})",
            insight.text.len(),
            MAX_INSIGHT_TEXT_LENGTH
        ));
    }
    validate_owner_id(&insight.owner_id)?;
    Ok(())
}
