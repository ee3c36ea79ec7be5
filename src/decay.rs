//! Recency decay for retrieval scoring
//!
//! Exponential half-life decay: an item [`RECENCY_HALF_LIFE_HOURS`] old
//! scores 0.5, monotonically decreasing with age. The scorer clamps negative
//! ages (clock skew between the caller and the store) to full recency.

use chrono::{DateTime, Utc};

use crate::constants::RECENCY_HALF_LIFE_HOURS;

/// Recency sub-score in [0, 1] for an item with the given timestamp,
/// evaluated at `now`
#[inline]
pub fn recency_score(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    recency_score_with_half_life(timestamp, now, RECENCY_HALF_LIFE_HOURS)
}

/// Recency sub-score with a custom half-life in hours
#[inline]
pub fn recency_score_with_half_life(
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    half_life_hours: f64,
) -> f32 {
    let age_hours = (now - timestamp).num_seconds() as f64 / 3600.0;
    if age_hours <= 0.0 {
        return 1.0;
    }
    if half_life_hours <= 0.0 {
        return 0.0;
    }
    // 2^(-age / half_life)
    (-age_hours / half_life_hours).exp2() as f32
}
