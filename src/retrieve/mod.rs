//! Hybrid retrieval engine
//!
//! ```text
//! query ──► (context?) rewrite ──► embed
//!                                    │
//!              ┌─────────────────────┴───────────────────┐
//!              ▼                                         ▼
//!     vector nearest neighbours                   trigram keyword search
//!              └──────────────► RRF fusion ◄─────────────┘
//!                                   │ relevance < threshold dropped
//!                                   ▼
//!              relevance + recency + importance ──► ranked items
//!                                   │
//!              (triples on) entity facts filter ──► precise statements
//!                                   │
//!                    deep mode: category summaries + items ──► reasoning
//! ```
//!
//! Only active items are ever returned. Every returned item has its
//! `last_accessed` bumped.
//!
//! With the triple layer enabled, triples similar to the query are quoted
//! as entity facts ahead of the items, and an item whose triples have all
//! been deactivated by a contradicting statement is dropped.

mod fusion;
mod scoring;

pub use fusion::{reciprocal_rank_fusion, FusedCandidate, SearchChannel};
pub use scoring::{rank_order, recency, ScoredItem, Scorer};

use crate::capability::{Contracts, Embeddings, IndexFilter, VectorIndex};
use crate::config::{RetrievalConfig, TriplesConfig};
use crate::error::{Error, Result};
use crate::memory::{CategoryPath, FactStore, MemoryItem};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const NO_MEMORIES: &str = "No relevant memories found.";

/// Retrieval mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Hybrid search and scoring only
    #[default]
    Fast,
    /// Wider recall plus a reasoning pass over category summaries
    Deep,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Fast => "fast",
            RetrievalMode::Deep => "deep",
        }
    }
}

/// A retrieval request
#[derive(Debug, Clone, Default)]
pub struct RetrievalQuery {
    pub text: String,
    pub mode: RetrievalMode,
    /// Recent conversation used to make the query self-contained
    pub context: Option<String>,
}

impl RetrievalQuery {
    pub fn fast(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: RetrievalMode::Fast,
            context: None,
        }
    }

    pub fn deep(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: RetrievalMode::Deep,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Ranked memories plus the context derived from them
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    /// Active items, best first
    pub items: Vec<ScoredItem>,
    /// Paths of the categories owning the returned items
    pub related_categories: Vec<String>,
    /// Quoted items in fast mode, the reasoned answer in deep mode
    pub suggested_context: String,
    pub original_query: String,
    /// Rewritten query, when it differs from the original
    pub evolved_query: Option<String>,
    pub mode: RetrievalMode,
    pub confidence: f32,
    /// Categories the deep-mode answer relied on
    pub cited_categories: Vec<String>,
    /// Statements from matching semantic triples
    pub entity_facts: Vec<String>,
}

impl RetrievalResult {
    /// The returned items without their scores
    pub fn memory_items(&self) -> Vec<&MemoryItem> {
        self.items.iter().map(|s| &s.item).collect()
    }
}

/// Hybrid search over the fact store and index
pub struct RetrievalEngine {
    store: Arc<FactStore>,
    index: Arc<dyn VectorIndex>,
    contracts: Arc<Contracts>,
    embeddings: Embeddings,
    scorer: Scorer,
    config: RetrievalConfig,
    triples: Option<TriplesConfig>,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<FactStore>,
        index: Arc<dyn VectorIndex>,
        contracts: Arc<Contracts>,
        embeddings: Embeddings,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            index,
            contracts,
            embeddings,
            scorer: Scorer::new(config.scoring.clone()),
            config,
            triples: None,
        }
    }

    /// Enable the entity facts filter when `config.enabled` is set
    pub fn with_triples(mut self, config: TriplesConfig) -> Self {
        self.triples = config.enabled.then_some(config);
        self
    }

    pub async fn retrieve(
        &self,
        query: &RetrievalQuery,
        cancel: Option<&CancellationToken>,
    ) -> Result<RetrievalResult> {
        let evolved = self.evolve(query, cancel).await?;
        let effective = evolved.as_deref().unwrap_or(&query.text);

        let mut result = match query.mode {
            RetrievalMode::Fast => self.fast(effective, cancel).await?,
            RetrievalMode::Deep => self.deep(effective, cancel).await?,
        };
        result.original_query = query.text.clone();
        result.evolved_query = evolved;

        let ids: Vec<Uuid> = result.items.iter().map(|s| s.item.id).collect();
        self.store.touch(&ids).await;
        let category_ids: Vec<Uuid> = result
            .items
            .iter()
            .map(|s| s.item.category_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.store.touch_categories(&category_ids).await;

        tracing::info!(
            mode = query.mode.as_str(),
            hits = result.items.len(),
            evolved = result.evolved_query.is_some(),
            "Retrieval complete"
        );
        Ok(result)
    }

    /// Rewrite the query against the conversation, if any was given.
    /// A failed rewrite falls back to the original query.
    async fn evolve(
        &self,
        query: &RetrievalQuery,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<String>> {
        let context = match query.context.as_deref().map(str::trim) {
            Some(context) if !context.is_empty() => context,
            _ => return Ok(None),
        };
        match self.contracts.rewrite(&query.text, context, cancel).await {
            Ok(rewritten) if rewritten.trim() != query.text.trim() => {
                tracing::debug!(original = %query.text, evolved = %rewritten, "Query evolved");
                Ok(Some(rewritten))
            }
            Ok(_) => Ok(None),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Query rewrite failed, using original query");
                Ok(None)
            }
        }
    }

    /// Vector and keyword search in parallel, fused and scored
    async fn search(
        &self,
        query: &str,
        vector: &[f32],
        limit: usize,
        min_relevance: f32,
    ) -> Result<Vec<ScoredItem>> {
        let depth = self.config.fused_candidates.max(limit);
        let (by_vector, by_keyword) = tokio::try_join!(
            self.index.nearest_neighbors(
                vector,
                depth,
                Some(self.config.vector_min_score),
                IndexFilter::active_items(),
            ),
            self.index.keyword_search(query, depth, IndexFilter::active_items()),
        )?;

        let fused = reciprocal_rank_fusion(
            &[
                (SearchChannel::Vector, &by_vector[..]),
                (SearchChannel::Keyword, &by_keyword[..]),
            ],
            self.config.rrf_k,
        );
        let relevance: HashMap<Uuid, f32> = fused
            .iter()
            .filter(|c| c.relevance >= min_relevance)
            .map(|c| (c.id, c.relevance))
            .collect();
        tracing::debug!(
            vector_hits = by_vector.len(),
            keyword_hits = by_keyword.len(),
            fused = fused.len(),
            kept = relevance.len(),
            "Hybrid search"
        );

        let ids: Vec<Uuid> = relevance.keys().copied().collect();
        let now = Utc::now();
        let mut scored: Vec<ScoredItem> = self
            .store
            .items(&ids)
            .await
            .into_iter()
            .filter(|item| item.active)
            .filter_map(|item| {
                let r = *relevance.get(&item.id)?;
                Some(self.scorer.score(item, r, now))
            })
            .collect();
        scored.sort_by(rank_order);
        scored.truncate(limit);
        Ok(scored)
    }

    /// Quote the triples nearest the query and drop items whose triples
    /// are all inactive. Items without triples pass through.
    async fn entity_filter(
        &self,
        vector: &[f32],
        items: Vec<ScoredItem>,
    ) -> Result<(Vec<ScoredItem>, Vec<String>)> {
        let Some(config) = &self.triples else {
            return Ok((items, Vec::new()));
        };
        let hits = self
            .index
            .nearest_neighbors(
                vector,
                config.search_limit,
                Some(config.min_score),
                IndexFilter::active_triples(),
            )
            .await?;
        if hits.is_empty() {
            return Ok((items, Vec::new()));
        }

        let ids: Vec<Uuid> = hits.iter().map(|h| h.id).collect();
        let triples: Vec<_> = self
            .store
            .triples(&ids)
            .await
            .into_iter()
            .filter(|t| t.active)
            .collect();
        let mut statements: Vec<String> = Vec::new();
        for triple in &triples {
            let statement = triple.to_natural_language();
            if !statements.contains(&statement) {
                statements.push(statement);
            }
        }
        statements.truncate(config.context_statements);
        let touched: Vec<Uuid> = triples.iter().map(|t| t.id).collect();
        self.store.touch_triples(&touched).await;

        let mut kept = Vec::with_capacity(items.len());
        for scored in items {
            let own = self.store.triples_for_item(&scored.item.id).await;
            if own.is_empty() || own.iter().any(|t| t.active) {
                kept.push(scored);
            } else {
                tracing::debug!(item_id = %scored.item.id, "Dropped item with only outdated triples");
            }
        }
        Ok((kept, statements))
    }

    async fn fast(&self, query: &str, cancel: Option<&CancellationToken>) -> Result<RetrievalResult> {
        let vector = self.embeddings.embed(query, cancel).await?;
        let items = self
            .search(query, &vector, self.config.fast_limit, self.config.min_relevance)
            .await?;
        let (items, entity_facts) = self.entity_filter(&vector, items).await?;
        let related_categories = self.category_paths(&items).await;
        let confidence = if items.is_empty() {
            0.0
        } else {
            let total: f32 = items.iter().map(|s| s.item.confidence).sum();
            (total / items.len() as f32).min(1.0)
        };
        Ok(RetrievalResult {
            suggested_context: quick_context(&items, &entity_facts, self.config.context_items),
            related_categories,
            items,
            original_query: query.to_string(),
            evolved_query: None,
            mode: RetrievalMode::Fast,
            confidence,
            cited_categories: Vec::new(),
            entity_facts,
        })
    }

    async fn deep(&self, query: &str, cancel: Option<&CancellationToken>) -> Result<RetrievalResult> {
        let threshold = self.config.min_relevance * self.config.deep_relevance_factor;
        let vector = self.embeddings.embed(query, cancel).await?;
        let items = self
            .search(query, &vector, self.config.deep_recall, threshold)
            .await?;
        let (items, entity_facts) = self.entity_filter(&vector, items).await?;
        let related_categories = self.category_paths(&items).await;

        let mut summaries = Vec::new();
        for path in &related_categories {
            let Some(parsed) = CategoryPath::parse(path) else {
                continue;
            };
            if let Some(summary) = self
                .store
                .category_by_path(&parsed)
                .await
                .and_then(|c| c.summary)
            {
                summaries.push((path.clone(), summary));
            }
        }
        let mut contents: Vec<String> = Vec::with_capacity(items.len() + 1);
        if !entity_facts.is_empty() {
            contents.push(format!("[High-precision entity facts]: {}", entity_facts.join("; ")));
        }
        contents.extend(items.iter().map(|s| s.item.content.clone()));
        let reasoning = self
            .contracts
            .reason(query, &summaries, &contents, cancel)
            .await?;

        let cited_categories = reasoning
            .cited_categories
            .into_iter()
            .filter_map(|c| CategoryPath::parse(&c).map(|p| p.to_string()))
            .collect();
        let confidence = if !entity_facts.is_empty() {
            0.85
        } else if !items.is_empty() {
            0.8
        } else {
            0.3
        };
        Ok(RetrievalResult {
            suggested_context: reasoning.answer,
            related_categories,
            confidence,
            items,
            original_query: query.to_string(),
            evolved_query: None,
            mode: RetrievalMode::Deep,
            cited_categories,
            entity_facts,
        })
    }

    /// Distinct category paths of `items`, sorted
    async fn category_paths(&self, items: &[ScoredItem]) -> Vec<String> {
        let ids: BTreeSet<Uuid> = items.iter().map(|s| s.item.category_id).collect();
        let mut paths = BTreeSet::new();
        for id in ids {
            if let Some(category) = self.store.category(&id).await {
                paths.insert(category.path.to_string());
            }
        }
        paths.into_iter().collect()
    }
}

fn quick_context(items: &[ScoredItem], entity_facts: &[String], limit: usize) -> String {
    let mut parts = Vec::new();
    if !entity_facts.is_empty() {
        parts.push(format!("[Precise facts] {}", entity_facts.join("; ")));
    }
    if !items.is_empty() {
        let quoted: Vec<&str> = items
            .iter()
            .take(limit.max(1))
            .map(|s| s.item.content.as_str())
            .collect();
        parts.push(format!("Relevant context: {}", quoted.join("; ")));
    }
    if parts.is_empty() {
        return NO_MEMORIES.to_string();
    }
    parts.join(" | ")
}
