//! Multi-signal scoring: relevance, recency and importance

use crate::config::ScoringConfig;
use crate::memory::MemoryItem;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// `decay ^ hours`, clamped to [0, 1]
pub fn recency(hours: f64, decay: f64) -> f32 {
    decay.powf(hours.max(0.0)).clamp(0.0, 1.0) as f32
}

/// A memory item with the signals that ranked it
#[derive(Debug, Clone, Serialize)]
pub struct ScoredItem {
    pub item: MemoryItem,
    pub relevance: f32,
    pub recency: f32,
    pub score: f32,
}

/// Weighted sum of the three signals
#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, item: MemoryItem, relevance: f32, now: DateTime<Utc>) -> ScoredItem {
        let recency = recency(item.hours_since_access(now), self.config.recency_decay);
        let score = self.config.alpha_relevance * relevance
            + self.config.alpha_recency * recency
            + self.config.alpha_importance * item.importance;
        ScoredItem {
            item,
            relevance,
            recency,
            score,
        }
    }
}

/// Final ordering: score desc, then most recently accessed, then id
pub fn rank_order(a: &ScoredItem, b: &ScoredItem) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(b.item.last_accessed.cmp(&a.item.last_accessed))
        .then(a.item.id.cmp(&b.item.id))
}
