//! Memory engine facade
//!
//! Wires the fact store, the capability providers, the index and the mirror
//! into the pipelines and exposes them behind one handle.

use crate::capability::{
    CachedEmbedder, CallPolicy, CompletionService, Contracts, DocumentMirror, EmbeddingService,
    Embeddings, IndexPayload, OpenAiProvider, VectorIndex,
};
use crate::config::MemoryConfig;
use crate::consolidate::{ConsolidationEngine, ConsolidationOutcome};
use crate::error::{Error, Result};
use crate::index::InMemoryIndex;
use crate::ingest::IngestionPipeline;
use crate::memory::{FactStore, MemoryItem, StoreStats};
use crate::mirror::{MarkdownMirror, NullMirror};
use crate::predict::{Prediction, PredictionContext, PredictionEngine};
use crate::retrieve::{RetrievalEngine, RetrievalQuery, RetrievalResult};
use crate::session::{render_transcript, SessionContext};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handle over the whole memory system
pub struct MemoryEngine {
    config: MemoryConfig,
    store: Arc<FactStore>,
    ingestion: IngestionPipeline,
    retrieval: RetrievalEngine,
    consolidation: ConsolidationEngine,
    prediction: PredictionEngine,
}

impl MemoryEngine {
    /// Open the engine described by `config`: the snapshot under the data
    /// directory, the markdown vault next to it and the configured provider.
    pub async fn open(config: MemoryConfig) -> Result<Self> {
        let store = FactStore::load_snapshot(&config.storage.snapshot_path()).await?;
        let mirror = MarkdownMirror::new(config.storage.vault_dir())?;
        MemoryEngineBuilder::new()
            .config(config)
            .store(store)
            .mirror(Arc::new(mirror))
            .build()
            .await
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<FactStore> {
        &self.store
    }

    /// Extract and commit facts from raw text
    pub async fn ingest(
        &self,
        text: &str,
        metadata: &HashMap<String, serde_json::Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<MemoryItem>> {
        self.ingestion.ingest(text, metadata, cancel).await
    }

    pub async fn retrieve(
        &self,
        query: &RetrievalQuery,
        cancel: Option<&CancellationToken>,
    ) -> Result<RetrievalResult> {
        self.retrieval.retrieve(query, cancel).await
    }

    /// Run one consolidation pass unless one is already in flight
    pub async fn consolidate(&self, cancel: Option<&CancellationToken>) -> ConsolidationOutcome {
        self.consolidation.consolidate(cancel).await
    }

    /// Predict what the user needs next and render it for prompt injection
    pub async fn predict(
        &self,
        context: &PredictionContext,
        cancel: Option<&CancellationToken>,
    ) -> Result<Prediction> {
        self.prediction.predict(context, cancel).await
    }

    /// Drain the session buffer and ingest it as one transcript.
    ///
    /// On failure the drained messages are put back into the session.
    pub async fn flush_session(
        &self,
        session: &mut SessionContext,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<MemoryItem>> {
        let drained = session.take_transcript();
        if drained.is_empty() {
            return Ok(Vec::new());
        }
        let transcript = render_transcript(&drained);
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), serde_json::json!("session_flush"));
        metadata.insert("modality".to_string(), serde_json::json!("session_flush"));
        metadata.insert("session_id".to_string(), serde_json::json!(session.id));
        metadata.insert("messages".to_string(), serde_json::json!(drained.len()));

        match self.ingestion.ingest(&transcript, &metadata, cancel).await {
            Ok(items) => {
                tracing::info!(
                    session_id = %session.id,
                    messages = drained.len(),
                    items = items.len(),
                    "Flushed session"
                );
                Ok(items)
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "Session flush failed, messages restored");
                session.restore(drained);
                Err(e)
            }
        }
    }

    /// Flush only once the session has crossed its token threshold
    pub async fn maybe_flush(
        &self,
        session: &mut SessionContext,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Vec<MemoryItem>>> {
        if !session.should_flush() {
            return Ok(None);
        }
        self.flush_session(session, cancel).await.map(Some)
    }

    pub async fn stats(&self) -> StoreStats {
        self.store.stats().await
    }

    /// Any item by id, active or superseded
    pub async fn item(&self, id: &Uuid) -> Option<MemoryItem> {
        self.store.item(id).await
    }

    /// Write the snapshot to the configured data directory
    pub async fn save(&self) -> Result<()> {
        self.save_to(&self.config.storage.snapshot_path()).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        self.store.save_snapshot(path).await?;
        tracing::debug!(path = %path.display(), "Saved snapshot");
        Ok(())
    }
}

/// Builder for `MemoryEngine`.
///
/// Anything not supplied falls back to the configured defaults: an empty
/// store, the OpenAI-compatible provider, an in-memory index and no mirror.
pub struct MemoryEngineBuilder {
    config: MemoryConfig,
    store: Option<FactStore>,
    completion: Option<Arc<dyn CompletionService>>,
    embedding: Option<Arc<dyn EmbeddingService>>,
    index: Option<Arc<dyn VectorIndex>>,
    mirror: Option<Arc<dyn DocumentMirror>>,
}

impl MemoryEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: MemoryConfig::default(),
            store: None,
            completion: None,
            embedding: None,
            index: None,
            mirror: None,
        }
    }

    pub fn config(mut self, config: MemoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Start from an existing store, such as a loaded snapshot
    pub fn store(mut self, store: FactStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn embedding(mut self, embedding: Arc<dyn EmbeddingService>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn mirror(mut self, mirror: Arc<dyn DocumentMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Build the engine and project the store into the index
    pub async fn build(self) -> Result<MemoryEngine> {
        let config = self.config;
        config.validate()?;

        let (completion, embedding) = match (self.completion, self.embedding) {
            (Some(c), Some(e)) => (c, e),
            (completion, embedding) => {
                let provider = Arc::new(OpenAiProvider::new(&config.provider));
                (
                    completion.unwrap_or_else(|| provider.clone() as Arc<dyn CompletionService>),
                    embedding.unwrap_or(provider as Arc<dyn EmbeddingService>),
                )
            }
        };
        let embedding: Arc<dyn EmbeddingService> = Arc::new(CachedEmbedder::new(
            embedding,
            config.capability.embedding_cache_capacity,
        ));
        let embeddings = Embeddings::new(embedding, CallPolicy::embedding(&config.capability));
        let contracts = Arc::new(
            Contracts::new(completion, &config.capability).with_triples(config.triples.enabled),
        );
        let index: Arc<dyn VectorIndex> = self
            .index
            .unwrap_or_else(|| Arc::new(InMemoryIndex::with_dimension(embeddings.dimension())));
        let mirror: Arc<dyn DocumentMirror> = self.mirror.unwrap_or_else(|| Arc::new(NullMirror));
        let store = Arc::new(self.store.unwrap_or_default());

        project_store(&store, index.as_ref(), &embeddings).await?;

        Ok(MemoryEngine {
            ingestion: IngestionPipeline::new(
                store.clone(),
                index.clone(),
                mirror.clone(),
                contracts.clone(),
                embeddings.clone(),
                config.ingestion.clone(),
            )
            .with_triples(config.triples.enabled),
            retrieval: RetrievalEngine::new(
                store.clone(),
                index.clone(),
                contracts.clone(),
                embeddings.clone(),
                config.retrieval.clone(),
            )
            .with_triples(config.triples.clone()),
            prediction: PredictionEngine::new(
                store.clone(),
                contracts.clone(),
                config.prediction.clone(),
            ),
            consolidation: ConsolidationEngine::new(
                store.clone(),
                index,
                mirror,
                contracts,
                embeddings,
                config.consolidation.clone(),
            ),
            store,
            config,
        })
    }
}

impl Default for MemoryEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Upsert every category, item and embedded triple vector into the index.
/// Categories restored without an embedding are embedded first.
async fn project_store(
    store: &FactStore,
    index: &dyn VectorIndex,
    embeddings: &Embeddings,
) -> Result<()> {
    let categories = store.categories().await;
    let missing: Vec<_> = categories.iter().filter(|c| c.embedding.is_none()).collect();
    if !missing.is_empty() {
        let texts: Vec<String> = missing.iter().map(|c| c.path.embedding_text()).collect();
        let vectors = embeddings.embed_batch(&texts, None).await?;
        for (category, vector) in missing.iter().zip(vectors) {
            store.set_category_embedding(&category.id, vector).await?;
        }
    }

    let mut projected = 0usize;
    for category in store.categories().await {
        let vector = category
            .embedding
            .clone()
            .ok_or_else(|| Error::Store(format!("category {} has no embedding", category.path)))?;
        index
            .upsert_vector(category.id, vector, IndexPayload::category(&category.path))
            .await?;
        projected += 1;
    }
    for item in store.all_items().await {
        index
            .upsert_vector(
                item.id,
                item.embedding.clone(),
                IndexPayload::item(item.category_id, item.active, item.content.clone()),
            )
            .await?;
        projected += 1;
    }
    for triple in store.all_triples().await {
        if triple.embedding.is_empty() {
            continue;
        }
        index
            .upsert_vector(triple.id, triple.embedding.clone(), IndexPayload::triple(&triple))
            .await?;
        projected += 1;
    }
    if projected > 0 {
        tracing::info!(entries = projected, "Projected fact store into index");
    }
    Ok(())
}
