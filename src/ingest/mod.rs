//! Ingestion pipeline
//!
//! Turns raw interaction text into memory items. Each candidate fact moves
//! through the stages strictly in order:
//!
//! ```text
//! raw text ──► extract ──► embed (one batch) ──► assign category
//!                                                     │
//!        ┌────────────────────────────────────────────┘
//!        ▼
//!   judge near duplicates ──► equivalent ──► reinforce existing item
//!        │
//!        ├──► supersede ──► commit new item, deactivate old
//!        └──► unrelated ──► commit new item
//!
//! commit = fact store ──► index (failure: PartialCommit) ──► mirror (failure: warn)
//! ```
//!
//! With triples enabled, the entity statements extracted with a stored
//! fact are embedded and committed after it. Triple failures are logged
//! and never undo the item.
//!
//! Text that yields no facts performs no writes at all.

mod assign;

pub use assign::{
    Assignment, AssignmentContext, AssignmentStrategy, CategoryAssigner, CategoryLookup,
    ExistingCategoryMatcher, NewCategoryCreator,
};

use crate::capability::{
    Contracts, ContradictionVerdict, DocumentMirror, Embeddings, ExtractedFact, IndexPayload,
    VectorIndex,
};
use crate::config::IngestionConfig;
use crate::error::{Error, Result};
use crate::memory::{
    Category, FactStore, MemoryItem, MemoryItemBuilder, ResourceBuilder, SemanticTriple,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What happened to one candidate fact
enum Resolution {
    Reinforced(MemoryItem),
    Stored {
        item: MemoryItem,
        superseded: Option<MemoryItem>,
    },
}

/// Extracts, classifies and commits facts
pub struct IngestionPipeline {
    store: Arc<FactStore>,
    index: Arc<dyn VectorIndex>,
    mirror: Arc<dyn DocumentMirror>,
    contracts: Arc<Contracts>,
    embeddings: Embeddings,
    assigner: CategoryAssigner,
    config: IngestionConfig,
    triples: bool,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<FactStore>,
        index: Arc<dyn VectorIndex>,
        mirror: Arc<dyn DocumentMirror>,
        contracts: Arc<Contracts>,
        embeddings: Embeddings,
        config: IngestionConfig,
    ) -> Self {
        Self {
            store,
            index,
            mirror,
            contracts,
            embeddings,
            assigner: CategoryAssigner::new(),
            config,
            triples: false,
        }
    }

    /// Store the triples extracted with each new fact
    pub fn with_triples(mut self, enabled: bool) -> Self {
        self.triples = enabled;
        self
    }

    /// Replace the category assignment strategies
    pub fn with_assigner(mut self, assigner: CategoryAssigner) -> Self {
        self.assigner = assigner;
        self
    }

    /// Ingest raw text, returning the items created or reinforced.
    ///
    /// Cancellation stops before the next candidate; candidates already
    /// committed stay committed.
    pub async fn ingest(
        &self,
        text: &str,
        metadata: &HashMap<String, serde_json::Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<MemoryItem>> {
        check_cancelled(cancel)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let known: Vec<String> = self
            .store
            .categories()
            .await
            .into_iter()
            .map(|c| c.path.to_string())
            .collect();
        let facts = self.contracts.extract(text, &known, cancel).await?;
        if facts.is_empty() {
            tracing::debug!(chars = text.len(), "No salient facts extracted");
            return Ok(Vec::new());
        }
        tracing::info!(candidates = facts.len(), "Ingesting extracted facts");

        let contents: Vec<String> = facts.iter().map(|f| f.content.clone()).collect();
        let vectors = self.embeddings.embed_batch(&contents, cancel).await?;
        check_cancelled(cancel)?;

        let resource = ResourceBuilder::from_metadata(metadata).content(text).build()?;
        let resource_id = self.store.put_resource(resource).await;

        let mut results = Vec::with_capacity(facts.len());
        let mut created = 0usize;
        let mut reinforced = 0usize;
        let mut superseded = 0usize;
        for (fact, vector) in facts.iter().zip(vectors) {
            check_cancelled(cancel)?;
            match self.process(fact, vector, resource_id, cancel).await? {
                Resolution::Reinforced(item) => {
                    reinforced += 1;
                    results.push(item);
                }
                Resolution::Stored { item, superseded: old } => {
                    created += 1;
                    if old.is_some() {
                        superseded += 1;
                    }
                    results.push(item);
                }
            }
        }

        tracing::info!(
            resource_id = %resource_id,
            created,
            reinforced,
            superseded,
            "Ingestion complete"
        );
        Ok(results)
    }

    async fn process(
        &self,
        fact: &ExtractedFact,
        vector: Vec<f32>,
        resource_id: Uuid,
        cancel: Option<&CancellationToken>,
    ) -> Result<Resolution> {
        let ctx = AssignmentContext {
            store: &self.store,
            index: self.index.as_ref(),
            embeddings: &self.embeddings,
            contracts: &self.contracts,
            config: &self.config,
            cancel,
        };
        let assignment = self.assigner.assign(&ctx, fact, &vector).await?;
        let category = assignment.category;

        let neighbours = self
            .store
            .similar_active_in_category(&category.id, &vector, self.config.contradiction_threshold)
            .await;
        let mut replaced = None;
        for (existing, similarity) in neighbours {
            let verdict = self
                .contracts
                .judge(&existing.content, &fact.content, cancel)
                .await?;
            tracing::debug!(
                item_id = %existing.id,
                similarity,
                verdict = ?verdict,
                "Judged near duplicate"
            );
            match verdict {
                ContradictionVerdict::Equivalent => {
                    let item = self
                        .store
                        .reinforce(&existing.id, self.config.reinforcement_step)
                        .await?;
                    tracing::info!(
                        item_id = %item.id,
                        mention_count = item.mention_count,
                        importance = item.importance,
                        "Reinforced existing memory"
                    );
                    return Ok(Resolution::Reinforced(item));
                }
                ContradictionVerdict::Supersede => {
                    replaced = Some(existing);
                    break;
                }
                ContradictionVerdict::Unrelated => {}
            }
        }

        let item = MemoryItemBuilder::new(fact.kind)
            .category(category.id)
            .source_resource(resource_id)
            .content(fact.content.clone())
            .embedding(vector)
            .importance(fact.importance)
            .confidence(fact.confidence)
            .build()?;
        let superseded = self.commit(&item, &category, replaced).await?;
        if self.triples && !fact.triples.is_empty() {
            match self.attach_triples(&item, fact, cancel).await {
                Ok(()) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!(item_id = %item.id, error = %e, "Storing triples failed");
                }
            }
        }
        Ok(Resolution::Stored { item, superseded })
    }

    /// Embed and commit the triples extracted with `item`. Opposite triples
    /// already stored are deactivated in the store and the index.
    async fn attach_triples(
        &self,
        item: &MemoryItem,
        fact: &ExtractedFact,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let mut triples = Vec::new();
        for extracted in &fact.triples {
            match SemanticTriple::new(&extracted.subject, &extracted.predicate, &extracted.object) {
                Ok(triple) => triples.push(
                    triple
                        .with_item(item.id)
                        .with_context(extracted.context.clone().unwrap_or_default())
                        .with_scores(fact.importance, fact.confidence),
                ),
                Err(e) => tracing::debug!(error = %e, "Skipping incomplete triple"),
            }
        }
        if triples.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = triples.iter().map(|t| t.to_natural_language()).collect();
        let vectors = self.embeddings.embed_batch(&texts, cancel).await?;
        for (mut triple, vector) in triples.into_iter().zip(vectors) {
            triple.embedding = vector;
            let replaced = self.store.insert_triple(triple.clone()).await?;
            for old in replaced.iter().chain(std::iter::once(&triple)) {
                self.index
                    .upsert_vector(old.id, old.embedding.clone(), IndexPayload::triple(old))
                    .await?;
            }
            tracing::debug!(
                triple_id = %triple.id,
                statement = %triple.to_natural_language(),
                replaced = replaced.len(),
                "Stored triple"
            );
        }
        Ok(())
    }

    /// Write the item to the store, then the index, then the mirror.
    async fn commit(
        &self,
        item: &MemoryItem,
        category: &Category,
        replaced: Option<MemoryItem>,
    ) -> Result<Option<MemoryItem>> {
        self.store.insert_item(item.clone()).await?;
        let superseded = match replaced {
            Some(old) => {
                let old = self.store.supersede(&old.id, item.id).await?;
                tracing::info!(
                    old_item = %old.id,
                    new_item = %item.id,
                    category = %category.path,
                    "Superseded memory"
                );
                Some(old)
            }
            None => None,
        };

        if let Err(e) = self.project(item, superseded.as_ref()).await {
            tracing::error!(item_id = %item.id, error = %e, "Index write failed after store commit");
            return Err(Error::PartialCommit {
                item_id: item.id,
                source: Box::new(e),
            });
        }

        self.mirror_item(item, category).await;
        Ok(superseded)
    }

    async fn project(&self, item: &MemoryItem, superseded: Option<&MemoryItem>) -> Result<()> {
        if let Some(old) = superseded {
            self.index
                .upsert_vector(
                    old.id,
                    old.embedding.clone(),
                    IndexPayload::item(old.category_id, false, old.content.clone()),
                )
                .await?;
            for triple in self.store.triples_for_item(&old.id).await {
                if triple.embedding.is_empty() {
                    continue;
                }
                self.index
                    .upsert_vector(triple.id, triple.embedding.clone(), IndexPayload::triple(&triple))
                    .await?;
            }
        }
        self.index
            .upsert_vector(
                item.id,
                item.embedding.clone(),
                IndexPayload::item(item.category_id, true, item.content.clone()),
            )
            .await
    }

    async fn mirror_item(&self, item: &MemoryItem, category: &Category) {
        let entry = format!("[{}] {}", item.kind.as_str(), item.content);
        if let Err(e) = self.mirror.append_to_category(&category.path, &entry).await {
            tracing::warn!(category = %category.path, error = %e, "Mirror category append failed");
        }
        let timeline = format!("{} ({})", entry, category.path);
        if let Err(e) = self.mirror.append_to_timeline(&timeline).await {
            tracing::warn!(error = %e, "Mirror timeline append failed");
        }
    }
}

fn check_cancelled(cancel: Option<&CancellationToken>) -> Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(Error::Cancelled),
        _ => Ok(()),
    }
}
