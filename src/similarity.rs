//! Text similarity for retrieval scoring
//!
//! Token-frequency cosine over lowercased alphanumeric tokens. The engine has
//! no embedding model of its own; lexical overlap is what the scorer blends
//! with importance and recency.

use std::collections::HashMap;

/// Split text into lowercased alphanumeric tokens
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Term-frequency vector for a text
fn term_frequencies(text: &str) -> HashMap<String, f32> {
    let mut counts: HashMap<String, f32> = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0.0) += 1.0;
    }
    counts
}

/// Cosine similarity between two texts over term-frequency vectors
///
/// Returns a value in [0, 1]; 0.0 when either text has no tokens.
pub fn text_similarity(a: &str, b: &str) -> f32 {
    let tf_a = term_frequencies(a);
    let tf_b = term_frequencies(b);

    if tf_a.is_empty() || tf_b.is_empty() {
        return 0.0;
    }

    let dot: f32 = tf_a
        .iter()
        .filter_map(|(token, count)| tf_b.get(token).map(|other| count * other))
        .sum();

    let norm_a: f32 = tf_a.values().map(|c| c * c).sum::<f32>().sqrt();
    let norm_b: f32 = tf_b.values().map(|c| c * c).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts() {
        assert!((text_similarity("lose weight", "lose weight") - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_disjoint_texts() {
        assert!(text_similarity("apple banana", "quantum tensor").abs() < 0.001);
    }

    #[test]
    fn test_partial_overlap_between_zero_and_one() {
        let s = text_similarity("I want to lose weight", "weight training plan");
        assert!(s > 0.0 && s < 1.0);
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let s = text_similarity("Lose Weight!", "lose weight");
        assert!((s - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_empty_text_scores_zero() {
        assert_eq!(text_similarity("", "anything"), 0.0);
        assert_eq!(text_similarity("anything", "   "), 0.0);
    }
}
