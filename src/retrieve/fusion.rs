//! Reciprocal Rank Fusion
//!
//! For each item `d` the fused score is
//!
//! ```text
//! fused(d) = Σ 1 / (k + rank_i(d))
//! ```
//!
//! with 1-based ranks. An item missing from a channel gets no contribution
//! from it. The fused score only orders candidates; relevance also weighs
//! how good each hit was:
//!
//! ```text
//! relevance(d) = Σ score_i(d) · (k + 1) / (k + rank_i(d)) / channels
//! ```
//!
//! where `score_i` is the channel similarity clamped to [0, 1] and
//! `channels` counts the channels that returned anything. First place
//! with a perfect score in every such channel is 1.0, while a weak hit
//! deep in one list falls towards 0 and is cut by the relevance floor.

use crate::capability::ScoredId;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Search channel that ranked an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchChannel {
    Vector,
    Keyword,
}

/// An item after fusion, with its per-channel ranks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedCandidate {
    pub id: Uuid,
    pub fused: f32,
    /// `fused` normalized into [0, 1]
    pub relevance: f32,
    /// 1-based rank in each channel that returned the item
    pub ranks: Vec<(SearchChannel, usize)>,
}

/// Fuse ranked channel lists.
///
/// Output is ordered by fused score, then id. Callers with more context
/// (such as last access time) re-sort equal scores themselves.
pub fn reciprocal_rank_fusion(
    channels: &[(SearchChannel, &[ScoredId])],
    k: u32,
) -> Vec<FusedCandidate> {
    let k = k as f32;
    let mut fused: HashMap<Uuid, FusedCandidate> = HashMap::new();
    let mut evidence: HashMap<Uuid, f32> = HashMap::new();

    for (channel, hits) in channels {
        for (position, hit) in hits.iter().enumerate() {
            let rank = position + 1;
            let entry = fused.entry(hit.id).or_insert_with(|| FusedCandidate {
                id: hit.id,
                fused: 0.0,
                relevance: 0.0,
                ranks: Vec::new(),
            });
            entry.fused += 1.0 / (k + rank as f32);
            entry.ranks.push((*channel, rank));
            *evidence.entry(hit.id).or_default() +=
                hit.score.clamp(0.0, 1.0) * (k + 1.0) / (k + rank as f32);
        }
    }

    let answering = channels.iter().filter(|(_, hits)| !hits.is_empty()).count();
    let answering = answering.max(1) as f32;
    let mut out: Vec<FusedCandidate> = fused
        .into_values()
        .map(|mut c| {
            let weight = evidence.get(&c.id).copied().unwrap_or_default();
            c.relevance = (weight / answering).min(1.0);
            c
        })
        .collect();
    out.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    out
}
