//! Capability interfaces
//!
//! The pipelines depend on four external collaborators, each behind a
//! trait so that providers can be swapped and tests can script them:
//!
//! ```text
//!             ┌────────────────────┐   ┌────────────────────┐
//!             │ CompletionService  │   │  EmbeddingService  │
//!             │  (8 contracts)     │   │  text → vector     │
//!             └─────────┬──────────┘   └─────────┬──────────┘
//!                       │ CallPolicy (timeout, retry, cancel)
//!        ┌──────────────┴────────────────────────┴──────────────┐
//!        │        Ingestion · Retrieval · Consolidation         │
//!        └──────────────┬────────────────────────┬──────────────┘
//!             ┌─────────▼──────────┐   ┌─────────▼──────────┐
//!             │    VectorIndex     │   │   DocumentMirror   │
//!             │ vector + trigram   │   │  markdown vault    │
//!             └────────────────────┘   └────────────────────┘
//! ```

pub mod contracts;
pub mod embedding;
pub mod openai;
pub mod policy;

pub use contracts::{
    Cluster, ClusteringResponse, ContradictionVerdict, Contracts, ExtractedFact,
    ExtractedTriple, ReasoningResponse,
};
pub use embedding::{CachedEmbedder, Embeddings};
pub use openai::OpenAiProvider;
pub use policy::CallPolicy;

use crate::error::Result;
use crate::memory::{CategoryPath, SemanticTriple};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The structured-output contracts the pipelines request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    /// Raw text → candidate facts
    Extraction,
    /// Two facts → supersede / equivalent / unrelated
    Contradiction,
    /// Query plus context → self-contained query
    Rewrite,
    /// Items → summary text
    Summarization,
    /// Category plus items → named groups
    Clustering,
    /// Text → category path
    CategoryPath,
    /// Summaries plus items → cited answer
    Reasoning,
    /// Current context plus recent memories → next intent
    Prediction,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::Extraction => "extraction",
            ContractKind::Contradiction => "contradiction",
            ContractKind::Rewrite => "rewrite",
            ContractKind::Summarization => "summarization",
            ContractKind::Clustering => "clustering",
            ContractKind::CategoryPath => "category_path",
            ContractKind::Reasoning => "reasoning",
            ContractKind::Prediction => "prediction",
        }
    }
}

impl std::fmt::Display for ContractKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single completion call
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    /// Contract the prompt was built for
    pub contract: ContractKind,
    /// Full prompt text
    pub prompt: String,
    /// JSON schema of the expected output, `None` for free text
    pub response_schema: Option<serde_json::Value>,
}

/// Text-completion and structured-extraction capability.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Run one completion. Returns the raw model output.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Embedding capability with a fixed output dimensionality.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Vector dimensionality
    fn dimension(&self) -> usize;
}

/// What an index entry represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexScope {
    Item,
    Category,
    Triple,
}

/// Metadata stored next to each vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPayload {
    pub scope: IndexScope,
    /// Owning category for items, `None` otherwise
    pub category_id: Option<Uuid>,
    pub active: bool,
    /// Text indexed for keyword search
    pub text: String,
}

impl IndexPayload {
    /// Payload for a memory item
    pub fn item(category_id: Uuid, active: bool, text: impl Into<String>) -> Self {
        Self {
            scope: IndexScope::Item,
            category_id: Some(category_id),
            active,
            text: text.into(),
        }
    }

    /// Payload for a category
    pub fn category(path: &CategoryPath) -> Self {
        Self {
            scope: IndexScope::Category,
            category_id: None,
            active: true,
            text: path.embedding_text(),
        }
    }

    /// Payload for a semantic triple, indexed by its natural-language form
    pub fn triple(triple: &SemanticTriple) -> Self {
        Self {
            scope: IndexScope::Triple,
            category_id: None,
            active: triple.active,
            text: triple.to_natural_language(),
        }
    }
}

/// Restricts an index query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFilter {
    pub scope: IndexScope,
    pub active_only: bool,
}

impl IndexFilter {
    /// Active memory items only
    pub fn active_items() -> Self {
        Self {
            scope: IndexScope::Item,
            active_only: true,
        }
    }

    /// Active semantic triples only
    pub fn active_triples() -> Self {
        Self {
            scope: IndexScope::Triple,
            active_only: true,
        }
    }

    /// Categories only
    pub fn categories() -> Self {
        Self {
            scope: IndexScope::Category,
            active_only: false,
        }
    }
}

/// A ranked index hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: Uuid,
    pub score: f32,
}

/// Combined vector and keyword index.
///
/// The index is a derived projection of the fact store: pipelines write
/// to it synchronously after the store commit and never read facts back
/// from it, only ranked ids.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector and payload for `id`
    async fn upsert_vector(&self, id: Uuid, vector: Vec<f32>, payload: IndexPayload) -> Result<()>;

    /// Up to `k` entries most similar to `vector`, best first
    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        k: usize,
        min_score: Option<f32>,
        filter: IndexFilter,
    ) -> Result<Vec<ScoredId>>;

    /// Up to `k` entries whose text best matches `text`, best first
    async fn keyword_search(&self, text: &str, k: usize, filter: IndexFilter)
        -> Result<Vec<ScoredId>>;
}

/// Human-readable mirror of the memory.
///
/// Failures are logged by callers and never block a fact store commit.
#[async_trait]
pub trait DocumentMirror: Send + Sync {
    /// Append one entry to the category's document
    async fn append_to_category(&self, path: &CategoryPath, entry: &str) -> Result<()>;

    /// Append one entry to the chronological timeline
    async fn append_to_timeline(&self, entry: &str) -> Result<()>;

    /// Replace the category's summary section
    async fn update_category_summary(&self, path: &CategoryPath, text: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_names() {
        assert_eq!(ContractKind::CategoryPath.as_str(), "category_path");
        assert_eq!(ContractKind::Reasoning.to_string(), "reasoning");
        assert_eq!(
            serde_json::to_string(&ContractKind::Contradiction).unwrap(),
            "\"contradiction\""
        );
    }

    #[test]
    fn test_payload_constructors() {
        let category = Uuid::new_v4();
        let payload = IndexPayload::item(category, true, "likes tea");
        assert_eq!(payload.scope, IndexScope::Item);
        assert_eq!(payload.category_id, Some(category));

        let path = CategoryPath::parse("preferences/coding-languages").unwrap();
        let payload = IndexPayload::category(&path);
        assert_eq!(payload.scope, IndexScope::Category);
        assert_eq!(payload.text, "preferences coding languages");

        let mut triple = SemanticTriple::new("User", "lives in", "Seoul").unwrap();
        triple.active = false;
        let payload = IndexPayload::triple(&triple);
        assert_eq!(payload.scope, IndexScope::Triple);
        assert_eq!(payload.text, "User resides in Seoul");
        assert!(!payload.active);
    }
}
