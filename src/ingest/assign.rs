//! Category assignment strategies
//!
//! Assignment looks up the hierarchy once per candidate fact, then hands the
//! lookup to one of two strategies:
//!
//! ```text
//!  lookup ──► exact path hit or best similarity ≥ threshold ──► ExistingCategoryMatcher
//!         └─► otherwise ─────────────────────────────────────► NewCategoryCreator
//! ```
//!
//! The creator resolves a path (model-proposed, then suggested, then the
//! configured default), creates any missing ancestors, and projects every
//! newly created category into the index.

use crate::capability::{Contracts, Embeddings, ExtractedFact, IndexFilter, IndexPayload, VectorIndex};
use crate::config::IngestionConfig;
use crate::error::{Error, Result};
use crate::memory::{Category, CategoryPath, FactStore};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Collaborators available to a strategy
pub struct AssignmentContext<'a> {
    pub store: &'a FactStore,
    pub index: &'a dyn VectorIndex,
    pub embeddings: &'a Embeddings,
    pub contracts: &'a Contracts,
    pub config: &'a IngestionConfig,
    pub cancel: Option<&'a CancellationToken>,
}

/// What the hierarchy looks like from one candidate fact
#[derive(Debug, Clone, Default)]
pub struct CategoryLookup {
    /// Category stored at the model-proposed path, if any
    pub exact: Option<Category>,
    /// Nearby categories, most similar first
    pub nearby: Vec<(Category, f32)>,
}

impl CategoryLookup {
    /// Best nearby category and its similarity
    pub fn best(&self) -> Option<&(Category, f32)> {
        self.nearby.first()
    }
}

/// Outcome of assigning a candidate to a category
#[derive(Debug, Clone)]
pub struct Assignment {
    pub category: Category,
    /// Categories created to satisfy the assignment, root first
    pub created: Vec<Category>,
    /// Name of the strategy that decided
    pub strategy: &'static str,
}

/// One branch of the assignment decision
#[async_trait]
pub trait AssignmentStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn assign(
        &self,
        ctx: &AssignmentContext<'_>,
        fact: &ExtractedFact,
        lookup: &CategoryLookup,
    ) -> Result<Assignment>;
}

/// Reuses the exact-path category or the most similar one
pub struct ExistingCategoryMatcher;

#[async_trait]
impl AssignmentStrategy for ExistingCategoryMatcher {
    fn name(&self) -> &'static str {
        "existing"
    }

    async fn assign(
        &self,
        _ctx: &AssignmentContext<'_>,
        _fact: &ExtractedFact,
        lookup: &CategoryLookup,
    ) -> Result<Assignment> {
        let category = lookup
            .exact
            .clone()
            .or_else(|| lookup.best().map(|(c, _)| c.clone()))
            .ok_or_else(|| Error::NotFound("no existing category to match".to_string()))?;
        Ok(Assignment {
            category,
            created: Vec::new(),
            strategy: self.name(),
        })
    }
}

/// Creates a category at a proposed, suggested or default path
pub struct NewCategoryCreator;

impl NewCategoryCreator {
    async fn resolve_path(
        &self,
        ctx: &AssignmentContext<'_>,
        fact: &ExtractedFact,
        lookup: &CategoryLookup,
    ) -> Result<CategoryPath> {
        if let Some(path) = &fact.category_path {
            return Ok(path.clone());
        }
        let candidates: Vec<String> = lookup
            .nearby
            .iter()
            .map(|(c, _)| c.path.to_string())
            .collect();
        if let Some(path) = ctx
            .contracts
            .suggest_path(&fact.content, &candidates, ctx.cancel)
            .await?
        {
            return Ok(path);
        }
        CategoryPath::parse(&ctx.config.default_category).ok_or_else(|| {
            Error::Config(format!(
                "invalid default category '{}'",
                ctx.config.default_category
            ))
        })
    }

    /// Embed and index freshly created categories
    async fn project(&self, ctx: &AssignmentContext<'_>, created: &[Category]) -> Result<()> {
        if created.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = created.iter().map(|c| c.path.embedding_text()).collect();
        let vectors = ctx.embeddings.embed_batch(&texts, ctx.cancel).await?;
        for (category, vector) in created.iter().zip(vectors) {
            ctx.store
                .set_category_embedding(&category.id, vector.clone())
                .await?;
            ctx.index
                .upsert_vector(category.id, vector, IndexPayload::category(&category.path))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AssignmentStrategy for NewCategoryCreator {
    fn name(&self) -> &'static str {
        "new"
    }

    async fn assign(
        &self,
        ctx: &AssignmentContext<'_>,
        fact: &ExtractedFact,
        lookup: &CategoryLookup,
    ) -> Result<Assignment> {
        let path = self.resolve_path(ctx, fact, lookup).await?;

        let mut created = Vec::new();
        let parent_id = match path.parent() {
            Some(parent) => {
                let ensured = ctx.store.ensure_category_path(&parent).await?;
                created.extend(ensured.created);
                Some(ensured.category.id)
            }
            None => None,
        };
        let leaf = ctx.store.create_category(&path, parent_id).await?;
        created.extend(leaf.created);

        self.project(ctx, &created).await?;
        for category in &created {
            tracing::info!(category = %category.path, "Created category");
        }

        Ok(Assignment {
            category: leaf.category,
            created,
            strategy: self.name(),
        })
    }
}

/// Chooses between the two strategies by similarity threshold
pub struct CategoryAssigner {
    existing: Box<dyn AssignmentStrategy>,
    creator: Box<dyn AssignmentStrategy>,
}

impl CategoryAssigner {
    pub fn new() -> Self {
        Self::with_strategies(Box::new(ExistingCategoryMatcher), Box::new(NewCategoryCreator))
    }

    pub fn with_strategies(
        existing: Box<dyn AssignmentStrategy>,
        creator: Box<dyn AssignmentStrategy>,
    ) -> Self {
        Self { existing, creator }
    }

    /// Look up the exact proposed path and the nearest categories
    pub async fn lookup(
        &self,
        ctx: &AssignmentContext<'_>,
        fact: &ExtractedFact,
        vector: &[f32],
    ) -> Result<CategoryLookup> {
        let exact = match &fact.category_path {
            Some(path) => ctx.store.category_by_path(path).await,
            None => None,
        };
        let hits = ctx
            .index
            .nearest_neighbors(
                vector,
                ctx.config.category_candidates.max(1),
                Some(ctx.config.category_candidate_min_score),
                IndexFilter::categories(),
            )
            .await?;
        let mut nearby = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(category) = ctx.store.category(&hit.id).await {
                nearby.push((category, hit.score));
            }
        }
        Ok(CategoryLookup { exact, nearby })
    }

    /// Strategy for a lookup
    pub fn select(&self, lookup: &CategoryLookup, threshold: f32) -> &dyn AssignmentStrategy {
        let close_enough = lookup.best().is_some_and(|(_, score)| *score >= threshold);
        if lookup.exact.is_some() || close_enough {
            self.existing.as_ref()
        } else {
            self.creator.as_ref()
        }
    }

    /// Assign a candidate fact to a category
    pub async fn assign(
        &self,
        ctx: &AssignmentContext<'_>,
        fact: &ExtractedFact,
        vector: &[f32],
    ) -> Result<Assignment> {
        let lookup = self.lookup(ctx, fact, vector).await?;
        let strategy = self.select(&lookup, ctx.config.category_match_threshold);
        let assignment = strategy.assign(ctx, fact, &lookup).await?;
        tracing::debug!(
            category = %assignment.category.path,
            strategy = assignment.strategy,
            best_similarity = lookup.best().map(|(_, s)| *s),
            "Assigned category"
        );
        Ok(assignment)
    }
}

impl Default for CategoryAssigner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CallPolicy, ContractKind};
    use crate::config::CapabilityConfig;
    use crate::index::InMemoryIndex;
    use crate::memory::MemoryKind;
    use crate::testing::{KeywordEmbedder, ScriptedCompletion};
    use std::sync::Arc;

    struct Fixture {
        store: FactStore,
        index: InMemoryIndex,
        embeddings: Embeddings,
        contracts: Contracts,
        completion: Arc<ScriptedCompletion>,
        config: IngestionConfig,
    }

    impl Fixture {
        fn new(completion: ScriptedCompletion) -> Self {
            let completion = Arc::new(completion);
            Self {
                store: FactStore::new(),
                index: InMemoryIndex::new(),
                embeddings: Embeddings::new(Arc::new(KeywordEmbedder::new()), CallPolicy::default()),
                contracts: Contracts::new(completion.clone(), &CapabilityConfig::default()),
                completion,
                config: IngestionConfig::default(),
            }
        }

        fn ctx(&self) -> AssignmentContext<'_> {
            AssignmentContext {
                store: &self.store,
                index: &self.index,
                embeddings: &self.embeddings,
                contracts: &self.contracts,
                config: &self.config,
                cancel: None,
            }
        }
    }

    fn fact(content: &str, path: Option<&str>) -> ExtractedFact {
        ExtractedFact {
            content: content.to_string(),
            kind: MemoryKind::Fact,
            category_path: path.and_then(CategoryPath::parse),
            importance: 0.5,
            confidence: 1.0,
            triples: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_creates_proposed_path_and_indexes_it() {
        let fixture = Fixture::new(ScriptedCompletion::new());
        let assigner = CategoryAssigner::new();
        let candidate = fact("User prefers TypeScript", Some("preferences/coding-languages"));
        let vector = KeywordEmbedder::vector(&candidate.content);

        let assignment = assigner.assign(&fixture.ctx(), &candidate, &vector).await.unwrap();
        assert_eq!(assignment.strategy, "new");
        assert_eq!(assignment.category.path.as_str(), "preferences/coding-languages");
        assert_eq!(assignment.created.len(), 2);
        assert_eq!(fixture.index.len().await, 2);

        let stored = fixture.store.category(&assignment.category.id).await.unwrap();
        assert!(stored.embedding.is_some());
        assert!(stored.parent_id.is_some());
    }

    #[tokio::test]
    async fn test_exact_path_reuses_category() {
        let fixture = Fixture::new(ScriptedCompletion::new());
        let assigner = CategoryAssigner::new();
        let first = fact("User prefers TypeScript", Some("preferences/coding-languages"));
        let created = assigner
            .assign(&fixture.ctx(), &first, &KeywordEmbedder::vector(&first.content))
            .await
            .unwrap();

        let second = fact("Lives in Seoul", Some("preferences/coding-languages"));
        let reused = assigner
            .assign(&fixture.ctx(), &second, &KeywordEmbedder::vector(&second.content))
            .await
            .unwrap();
        assert_eq!(reused.strategy, "existing");
        assert_eq!(reused.category.id, created.category.id);
        assert!(reused.created.is_empty());
    }

    #[tokio::test]
    async fn test_similar_category_matched_above_threshold() {
        let fixture = Fixture::new(ScriptedCompletion::new());
        let assigner = CategoryAssigner::new();
        let seed = fact("Writes rust code", Some("knowledge/coding"));
        let seeded = assigner
            .assign(&fixture.ctx(), &seed, &KeywordEmbedder::vector(&seed.content))
            .await
            .unwrap();

        let candidate = fact("Learning python programming", Some("learning/python"));
        let assignment = assigner
            .assign(&fixture.ctx(), &candidate, &KeywordEmbedder::vector(&candidate.content))
            .await
            .unwrap();
        assert_eq!(assignment.strategy, "existing");
        assert_eq!(assignment.category.id, seeded.category.id);
    }

    #[tokio::test]
    async fn test_suggestion_then_default_path() {
        let fixture = Fixture::new(
            ScriptedCompletion::new()
                .respond(ContractKind::CategoryPath, "Lives in Seoul", r#"{"path": "personal/home"}"#)
                .respond(ContractKind::CategoryPath, "", r#"{"path": ""}"#),
        );
        let assigner = CategoryAssigner::new();

        let located = fact("Lives in Seoul", None);
        let assignment = assigner
            .assign(&fixture.ctx(), &located, &KeywordEmbedder::vector(&located.content))
            .await
            .unwrap();
        assert_eq!(assignment.category.path.as_str(), "personal/home");

        let vague = fact("Has a sister", None);
        let assignment = assigner
            .assign(&fixture.ctx(), &vague, &KeywordEmbedder::vector(&vague.content))
            .await
            .unwrap();
        assert_eq!(assignment.category.path.as_str(), "uncategorized");
        assert_eq!(fixture.completion.calls_for(ContractKind::CategoryPath), 2);
    }

    #[test]
    fn test_select_by_threshold() {
        let assigner = CategoryAssigner::new();
        let category = Category::new(CategoryPath::parse("misc").unwrap(), None);

        let empty = CategoryLookup::default();
        assert_eq!(assigner.select(&empty, 0.7).name(), "new");

        let weak = CategoryLookup {
            exact: None,
            nearby: vec![(category.clone(), 0.69)],
        };
        assert_eq!(assigner.select(&weak, 0.7).name(), "new");

        let strong = CategoryLookup {
            exact: None,
            nearby: vec![(category.clone(), 0.7)],
        };
        assert_eq!(assigner.select(&strong, 0.7).name(), "existing");

        let exact = CategoryLookup {
            exact: Some(category),
            nearby: Vec::new(),
        };
        assert_eq!(assigner.select(&exact, 0.7).name(), "existing");
    }
}
