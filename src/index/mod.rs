//! In-process vector and keyword index
//!
//! `InMemoryIndex` is the reference `VectorIndex`: brute-force cosine
//! nearest neighbours plus trigram keyword search. Trigrams follow the
//! pg_trgm convention: text is lowercased, split into alphanumeric words,
//! and each word is padded with two leading spaces and one trailing space
//! before taking every 3-character window. Similarity is the Jaccard
//! index of the two trigram sets.

use crate::capability::{IndexFilter, IndexPayload, ScoredId, VectorIndex};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trigram similarity below which keyword hits are dropped
pub const KEYWORD_MIN_SIMILARITY: f32 = 0.1;

/// Cosine similarity of two vectors.
///
/// Returns 0.0 for mismatched lengths, empty input or a zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// pg_trgm-style trigram set of `text`
pub fn trigrams(text: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    let lowered = text.to_lowercase();
    for word in lowered.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let padded: Vec<char> = format!("  {word} ").chars().collect();
        for window in padded.windows(3) {
            out.insert(window.iter().collect());
        }
    }
    out
}

/// Jaccard similarity of two trigram sets
pub fn trigram_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f32 / union as f32
}

struct IndexEntry {
    vector: Vec<f32>,
    payload: IndexPayload,
    trigrams: HashSet<String>,
}

impl IndexEntry {
    fn matches(&self, filter: &IndexFilter) -> bool {
        self.payload.scope == filter.scope && (!filter.active_only || self.payload.active)
    }
}

/// Brute-force in-memory index
pub struct InMemoryIndex {
    entries: Arc<RwLock<HashMap<Uuid, IndexEntry>>>,
    dimension: Option<usize>,
}

impl InMemoryIndex {
    /// Index accepting vectors of any length
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            dimension: None,
        }
    }

    /// Index rejecting vectors whose length is not `dimension`
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..Self::new()
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Payload stored for `id`
    pub async fn payload(&self, id: &Uuid) -> Option<IndexPayload> {
        self.entries.read().await.get(id).map(|e| e.payload.clone())
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn rank(mut hits: Vec<ScoredId>, k: usize) -> Vec<ScoredId> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert_vector(&self, id: Uuid, vector: Vec<f32>, payload: IndexPayload) -> Result<()> {
        if let Some(expected) = self.dimension {
            if vector.len() != expected {
                return Err(Error::Index(format!(
                    "vector for {id} has {} dimensions, expected {expected}",
                    vector.len()
                )));
            }
        }
        let entry = IndexEntry {
            trigrams: trigrams(&payload.text),
            vector,
            payload,
        };
        self.entries.write().await.insert(id, entry);
        Ok(())
    }

    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        k: usize,
        min_score: Option<f32>,
        filter: IndexFilter,
    ) -> Result<Vec<ScoredId>> {
        let floor = min_score.unwrap_or(f32::MIN);
        let entries = self.entries.read().await;
        let hits = entries
            .iter()
            .filter(|(_, e)| e.matches(&filter))
            .map(|(id, e)| ScoredId {
                id: *id,
                score: cosine_similarity(&e.vector, vector),
            })
            .filter(|hit| hit.score >= floor)
            .collect();
        Ok(rank(hits, k))
    }

    async fn keyword_search(
        &self,
        text: &str,
        k: usize,
        filter: IndexFilter,
    ) -> Result<Vec<ScoredId>> {
        let query = trigrams(text);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let entries = self.entries.read().await;
        let hits = entries
            .iter()
            .filter(|(_, e)| e.matches(&filter))
            .map(|(id, e)| ScoredId {
                id: *id,
                score: trigram_similarity(&query, &e.trigrams),
            })
            .filter(|hit| hit.score >= KEYWORD_MIN_SIMILARITY)
            .collect();
        Ok(rank(hits, k))
    }
}
