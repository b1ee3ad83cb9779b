//! Consolidation engine
//!
//! Periodic maintenance over the whole hierarchy. Nothing is ever deleted:
//!
//! 1. Staleness scan: categories holding many items not accessed within the
//!    window are queued for summarization. Item state never changes here.
//! 2. Per category, in path order:
//!    - oversized categories with changes since the last summary are split
//!      into model-suggested children, with items reassigned and the
//!      parent summary rewritten as a roll-up. Items left in the parent do
//!      not trigger another split until something in it changes
//!    - otherwise the summary is refreshed when items changed since the
//!      last summary, or when the category was queued
//!
//! Summaries are stamped with the time the items were read, so an item
//! added while the model call is in flight is picked up by the next run.
//!
//! A failure in one category is recorded and the scan moves on.
//! Cancellation is honoured between categories. Only one run may be in
//! flight; a concurrent trigger reports `AlreadyRunning`.

use crate::capability::{Contracts, DocumentMirror, Embeddings, IndexPayload, VectorIndex};
use crate::config::ConsolidationConfig;
use crate::error::{Error, Result};
use crate::memory::{Category, CategoryPath, FactStore, MemoryItem};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Stage of the per-category work that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationStage {
    Summary,
    Split,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryFailure {
    pub path: String,
    pub stage: ConsolidationStage,
    pub message: String,
}

/// One oversized category that was split
#[derive(Debug, Clone, Serialize)]
pub struct SplitRecord {
    pub parent: String,
    /// Child paths items were moved into
    pub children: Vec<String>,
    /// Child categories that did not exist before
    pub created: usize,
    pub moved_items: usize,
}

/// What a completed run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    /// Items not accessed within the staleness window
    pub stale_items: usize,
    /// Categories queued for summarization because of stale items
    pub stale_categories: Vec<String>,
    pub summaries_refreshed: usize,
    pub splits: Vec<SplitRecord>,
    pub failures: Vec<CategoryFailure>,
    /// The run stopped early on cancellation
    pub cancelled: bool,
}

impl ConsolidationReport {
    pub fn children_created(&self) -> usize {
        self.splits.iter().map(|s| s.created).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "report", rename_all = "snake_case")]
pub enum ConsolidationOutcome {
    Completed(ConsolidationReport),
    AlreadyRunning,
}

/// Resets the run flag when the run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ConsolidationEngine {
    store: Arc<FactStore>,
    index: Arc<dyn VectorIndex>,
    mirror: Arc<dyn DocumentMirror>,
    contracts: Arc<Contracts>,
    embeddings: Embeddings,
    config: ConsolidationConfig,
    running: AtomicBool,
}

impl ConsolidationEngine {
    pub fn new(
        store: Arc<FactStore>,
        index: Arc<dyn VectorIndex>,
        mirror: Arc<dyn DocumentMirror>,
        contracts: Arc<Contracts>,
        embeddings: Embeddings,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            store,
            index,
            mirror,
            contracts,
            embeddings,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Whether a run is in flight
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn consolidate(&self, cancel: Option<&CancellationToken>) -> ConsolidationOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!("Consolidation already running, trigger ignored");
            return ConsolidationOutcome::AlreadyRunning;
        }
        let _guard = RunGuard(&self.running);

        let report = self.run(cancel).await;
        tracing::info!(
            stale_items = report.stale_items,
            stale_categories = report.stale_categories.len(),
            summaries = report.summaries_refreshed,
            splits = report.splits.len(),
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "Consolidation finished"
        );
        ConsolidationOutcome::Completed(report)
    }

    async fn run(&self, cancel: Option<&CancellationToken>) -> ConsolidationReport {
        let mut report = ConsolidationReport::default();
        let queued = self.scan_stale(&mut report).await;

        for category in self.store.categories().await {
            if cancel.is_some_and(|t| t.is_cancelled()) {
                report.cancelled = true;
                break;
            }

            // Stamped before the read so items added mid-call stay dirty
            let started = Utc::now();
            let active = self.store.active_items_in_category(&category.id).await;
            let changed = self.has_changes(&category).await;
            if active.len() > self.config.max_category_items && changed {
                match self.split(&category, &active, started, cancel).await {
                    Ok(record) => report.splits.push(record),
                    Err(Error::Cancelled) => {
                        report.cancelled = true;
                        break;
                    }
                    Err(e) => record_failure(&mut report, &category, ConsolidationStage::Split, e),
                }
                continue;
            }

            // An oversized parent whose leftovers were already clustered is
            // only re-summarized when queued
            if !changed && !queued.contains(&category.id) {
                continue;
            }
            match self.refresh_summary(&category, &active, started, cancel).await {
                Ok(true) => report.summaries_refreshed += 1,
                Ok(false) => {}
                Err(Error::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => record_failure(&mut report, &category, ConsolidationStage::Summary, e),
            }
        }
        report
    }

    /// Count stale items per category and queue the heavy ones
    async fn scan_stale(&self, report: &mut ConsolidationReport) -> HashSet<Uuid> {
        let cutoff = Utc::now() - Duration::days(self.config.stale_after_days);
        let stale = self.store.stale_items(cutoff).await;
        report.stale_items = stale.len();

        let mut per_category: HashMap<Uuid, usize> = HashMap::new();
        for item in &stale {
            *per_category.entry(item.category_id).or_default() += 1;
        }

        let mut queued = HashSet::new();
        for (category_id, count) in per_category {
            if count <= self.config.stale_queue_threshold {
                continue;
            }
            if let Some(category) = self.store.category(&category_id).await {
                tracing::debug!(category = %category.path, stale = count, "Queued stale category");
                report.stale_categories.push(category.path.to_string());
                queued.insert(category_id);
            }
        }
        report.stale_categories.sort();
        queued
    }

    /// Any item created, reinforced, superseded or moved since the last summary
    async fn has_changes(&self, category: &Category) -> bool {
        let items = self.store.items_in_category(&category.id).await;
        match category.summarized_at {
            None => !items.is_empty(),
            Some(at) => items.iter().any(|i| i.updated_at > at),
        }
    }

    /// Returns false when there was nothing to summarize
    async fn refresh_summary(
        &self,
        category: &Category,
        active: &[MemoryItem],
        as_of: DateTime<Utc>,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool> {
        if active.is_empty() {
            return Ok(false);
        }
        let skip = active.len().saturating_sub(self.config.summary_item_limit);
        let contents: Vec<String> = active[skip..].iter().map(|i| i.content.clone()).collect();
        let summary = self
            .contracts
            .summarize(&category.path, &contents, cancel)
            .await?;
        self.store
            .update_summary(&category.id, summary.clone(), as_of)
            .await?;
        self.mirror_summary(&category.path, &summary).await;
        tracing::debug!(category = %category.path, items = contents.len(), "Refreshed summary");
        Ok(true)
    }

    async fn split(
        &self,
        parent: &Category,
        active: &[MemoryItem],
        as_of: DateTime<Utc>,
        cancel: Option<&CancellationToken>,
    ) -> Result<SplitRecord> {
        let contents: Vec<String> = active.iter().map(|i| i.content.clone()).collect();
        let response = self
            .contracts
            .cluster(&parent.path, &contents, self.config.split_target_clusters, cancel)
            .await?;

        let mut children: Vec<(Category, Vec<usize>)> = Vec::new();
        let mut created = Vec::new();
        let mut assigned = HashSet::new();
        for cluster in response.clusters {
            let Some(child_path) = parent.path.child(&cluster.name) else {
                continue;
            };
            let members: Vec<usize> = cluster
                .items
                .into_iter()
                .filter(|i| assigned.insert(*i))
                .collect();
            if members.is_empty() {
                continue;
            }
            let ensured = self
                .store
                .create_category(&child_path, Some(parent.id))
                .await?;
            created.extend(ensured.created);
            match children.iter_mut().find(|(c, _)| c.id == ensured.category.id) {
                Some((_, existing)) => existing.extend(members),
                None => children.push((ensured.category, members)),
            }
        }
        if children.is_empty() {
            return Err(Error::MalformedOutput {
                contract: "clustering".to_string(),
                message: format!("no usable clusters for {}", parent.path),
            });
        }

        self.project_categories(&created, cancel).await?;

        let mut moved = 0usize;
        for (child, members) in &children {
            for index in members {
                let item = &active[*index];
                self.store.reassign(&item.id, &child.id).await?;
                self.index
                    .upsert_vector(
                        item.id,
                        item.embedding.clone(),
                        IndexPayload::item(child.id, item.active, item.content.clone()),
                    )
                    .await?;
                let entry = format!("[{}] {}", item.kind.as_str(), item.content);
                if let Err(e) = self.mirror.append_to_category(&child.path, &entry).await {
                    tracing::warn!(category = %child.path, error = %e, "Mirror category append failed");
                }
                moved += 1;
            }
        }

        let names: Vec<&str> = children.iter().map(|(c, _)| c.path.name()).collect();
        let rollup = response
            .parent_summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("Groups memories about {}.", names.join(", ")));
        self.store
            .update_summary(&parent.id, rollup.clone(), as_of)
            .await?;
        self.mirror_summary(&parent.path, &rollup).await;

        let record = SplitRecord {
            parent: parent.path.to_string(),
            children: children.iter().map(|(c, _)| c.path.to_string()).collect(),
            created: created.len(),
            moved_items: moved,
        };
        tracing::info!(
            category = %parent.path,
            children = record.children.len(),
            moved = moved,
            "Split oversized category"
        );
        Ok(record)
    }

    async fn project_categories(
        &self,
        created: &[Category],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        if created.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = created.iter().map(|c| c.path.embedding_text()).collect();
        let vectors = self.embeddings.embed_batch(&texts, cancel).await?;
        for (category, vector) in created.iter().zip(vectors) {
            self.store
                .set_category_embedding(&category.id, vector.clone())
                .await?;
            self.index
                .upsert_vector(category.id, vector, IndexPayload::category(&category.path))
                .await?;
        }
        Ok(())
    }

    async fn mirror_summary(&self, path: &CategoryPath, summary: &str) {
        if let Err(e) = self.mirror.update_category_summary(path, summary).await {
            tracing::warn!(category = %path, error = %e, "Mirror summary update failed");
        }
    }
}

fn record_failure(
    report: &mut ConsolidationReport,
    category: &Category,
    stage: ConsolidationStage,
    error: Error,
) {
    tracing::warn!(
        category = %category.path,
        stage = ?stage,
        error = %error,
        "Consolidation failed for category"
    );
    report.failures.push(CategoryFailure {
        path: category.path.to_string(),
        stage,
        message: error.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CallPolicy, ContractKind};
    use crate::config::CapabilityConfig;
    use crate::index::InMemoryIndex;
    use crate::memory::{MemoryItemBuilder, MemoryKind};
    use crate::mirror::NullMirror;
    use crate::testing::{FailingMirror, KeywordEmbedder, ScriptedCompletion};

    struct Harness {
        store: Arc<FactStore>,
        index: Arc<InMemoryIndex>,
        completion: Arc<ScriptedCompletion>,
        engine: ConsolidationEngine,
    }

    fn harness_with(
        completion: ScriptedCompletion,
        config: ConsolidationConfig,
        mirror: Arc<dyn DocumentMirror>,
    ) -> Harness {
        let capability = CapabilityConfig {
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            ..CapabilityConfig::default()
        };
        let store = Arc::new(FactStore::new());
        let index = Arc::new(InMemoryIndex::new());
        let completion = Arc::new(completion);
        let engine = ConsolidationEngine::new(
            store.clone(),
            index.clone(),
            mirror,
            Arc::new(Contracts::new(completion.clone(), &capability)),
            Embeddings::new(Arc::new(KeywordEmbedder::new()), CallPolicy::embedding(&capability)),
            config,
        );
        Harness {
            store,
            index,
            completion,
            engine,
        }
    }

    fn harness(completion: ScriptedCompletion) -> Harness {
        harness_with(completion, ConsolidationConfig::default(), Arc::new(NullMirror))
    }

    impl Harness {
        async fn remember(&self, path: &str, content: &str) -> MemoryItem {
            let category = self
                .store
                .ensure_category_path(&CategoryPath::parse(path).unwrap())
                .await
                .unwrap()
                .category;
            let item = MemoryItemBuilder::new(MemoryKind::Fact)
                .category(category.id)
                .content(content)
                .embedding(KeywordEmbedder::vector(content))
                .build()
                .unwrap();
            self.store.insert_item(item.clone()).await.unwrap();
            item
        }

        async fn summary(&self, path: &str) -> Option<String> {
            self.store
                .category_by_path(&CategoryPath::parse(path).unwrap())
                .await
                .and_then(|c| c.summary)
        }
    }

    fn completed(outcome: ConsolidationOutcome) -> ConsolidationReport {
        match outcome {
            ConsolidationOutcome::Completed(report) => report,
            ConsolidationOutcome::AlreadyRunning => panic!("expected a completed run"),
        }
    }

    #[tokio::test]
    async fn test_summary_refresh_is_idempotent() {
        let h = harness(
            ScriptedCompletion::new()
                .respond(ContractKind::Summarization, "", "Prefers Python for scripting."),
        );
        h.remember("preferences/coding", "User prefers Python").await;

        let first = completed(h.engine.consolidate(None).await);
        assert_eq!(first.summaries_refreshed, 1);
        let summary = h.summary("preferences/coding").await;
        assert_eq!(summary.as_deref(), Some("Prefers Python for scripting."));
        // the empty parent has nothing to summarize
        assert!(h.summary("preferences").await.is_none());

        let second = completed(h.engine.consolidate(None).await);
        assert_eq!(second.summaries_refreshed, 0);
        assert_eq!(h.summary("preferences/coding").await, summary);
        assert_eq!(h.completion.calls_for(ContractKind::Summarization), 1);
    }

    #[tokio::test]
    async fn test_new_items_trigger_refresh() {
        let h = harness(
            ScriptedCompletion::new()
                .once(ContractKind::Summarization, "Likes Python.")
                .respond(ContractKind::Summarization, "", "Likes Python and Rust."),
        );
        h.remember("preferences/coding", "User prefers Python").await;
        completed(h.engine.consolidate(None).await);

        h.remember("preferences/coding", "User writes Rust code").await;
        let report = completed(h.engine.consolidate(None).await);
        assert_eq!(report.summaries_refreshed, 1);
        assert_eq!(
            h.summary("preferences/coding").await.as_deref(),
            Some("Likes Python and Rust.")
        );
    }

    #[tokio::test]
    async fn test_failure_in_one_category_does_not_stop_scan() {
        let h = harness(
            ScriptedCompletion::new()
                .fail_on(ContractKind::Summarization, "\"personal/home\"")
                .respond(ContractKind::Summarization, "", "Coding preferences."),
        );
        h.remember("personal/home", "Lives in Seoul").await;
        h.remember("preferences/coding", "User prefers Python").await;

        let report = completed(h.engine.consolidate(None).await);
        assert_eq!(report.summaries_refreshed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "personal/home");
        assert_eq!(report.failures[0].stage, ConsolidationStage::Summary);
        assert!(h.summary("preferences/coding").await.is_some());
        assert!(h.summary("personal/home").await.is_none());
    }

    #[tokio::test]
    async fn test_mirror_failure_keeps_summary() {
        let h = harness_with(
            ScriptedCompletion::new().respond(ContractKind::Summarization, "", "Seoul resident."),
            ConsolidationConfig::default(),
            Arc::new(FailingMirror),
        );
        h.remember("personal/home", "Lives in Seoul").await;
        let report = completed(h.engine.consolidate(None).await);
        assert!(report.failures.is_empty());
        assert_eq!(h.summary("personal/home").await.as_deref(), Some("Seoul resident."));
    }

    #[tokio::test]
    async fn test_stale_scan_queues_without_touching_items() {
        let h = harness_with(
            ScriptedCompletion::new().respond(ContractKind::Summarization, "", "Old notes."),
            ConsolidationConfig {
                stale_queue_threshold: 2,
                ..ConsolidationConfig::default()
            },
            Arc::new(NullMirror),
        );
        let category = h
            .store
            .ensure_category_path(&CategoryPath::parse("archive/notes").unwrap())
            .await
            .unwrap()
            .category;
        let long_ago = Utc::now() - Duration::days(200);
        let mut ids = Vec::new();
        for n in 0..3 {
            let mut item = MemoryItemBuilder::new(MemoryKind::Fact)
                .category(category.id)
                .content(format!("old note {n}"))
                .embedding(vec![1.0])
                .build()
                .unwrap();
            item.last_accessed = long_ago;
            ids.push(item.id);
            h.store.insert_item(item).await.unwrap();
        }
        h.store
            .update_summary(&category.id, "Earlier notes.", Utc::now())
            .await
            .unwrap();

        let report = completed(h.engine.consolidate(None).await);
        assert_eq!(report.stale_items, 3);
        assert_eq!(report.stale_categories, vec!["archive/notes".to_string()]);
        assert_eq!(report.summaries_refreshed, 1);
        assert_eq!(h.summary("archive/notes").await.as_deref(), Some("Old notes."));

        for id in ids {
            let item = h.store.item(&id).await.unwrap();
            assert!(item.active);
            assert_eq!(item.last_accessed, long_ago);
        }
    }

    #[tokio::test]
    async fn test_oversized_category_is_split() {
        let h = harness_with(
            ScriptedCompletion::new().respond(
                ContractKind::Clustering,
                "",
                r#"{"clusters": [
                    {"name": "languages", "items": [0, 1, 2]},
                    {"name": "Dev Tools", "items": [3, 4, 2]},
                    {"name": "", "items": [5]}
                ], "parent_summary": "Everything about coding."}"#,
            ),
            ConsolidationConfig {
                max_category_items: 4,
                ..ConsolidationConfig::default()
            },
            Arc::new(NullMirror),
        );
        let contents = [
            "Prefers Python",
            "Learning Rust",
            "Knows TypeScript",
            "Uses neovim",
            "Uses tmux",
            "Writes code daily",
        ];
        let mut items = Vec::new();
        for content in contents {
            items.push(h.remember("knowledge/coding", content).await);
        }
        let parent = h
            .store
            .category_by_path(&CategoryPath::parse("knowledge/coding").unwrap())
            .await
            .unwrap();

        let report = completed(h.engine.consolidate(None).await);
        assert_eq!(report.splits.len(), 1);
        let split = &report.splits[0];
        assert_eq!(split.parent, "knowledge/coding");
        assert_eq!(
            split.children,
            vec![
                "knowledge/coding/languages".to_string(),
                "knowledge/coding/dev-tools".to_string()
            ]
        );
        assert_eq!(split.created, 2);
        assert_eq!(split.moved_items, 5);
        assert_eq!(report.children_created(), 2);

        let languages = h
            .store
            .category_by_path(&CategoryPath::parse("knowledge/coding/languages").unwrap())
            .await
            .unwrap();
        assert_eq!(languages.parent_id, Some(parent.id));
        assert!(languages.embedding.is_some());
        assert!(h.index.payload(&languages.id).await.is_some());

        for item in &items[..3] {
            let moved = h.store.item(&item.id).await.unwrap();
            assert_eq!(moved.category_id, languages.id);
            assert_eq!(moved.content, item.content);
            assert_eq!(h.index.payload(&item.id).await.unwrap().category_id, Some(languages.id));
        }
        let leftover = h.store.item(&items[5].id).await.unwrap();
        assert_eq!(leftover.category_id, parent.id);

        assert_eq!(
            h.summary("knowledge/coding").await.as_deref(),
            Some("Everything about coding.")
        );
        assert_eq!(h.store.stats().await.items, 6);
        assert_eq!(h.store.children(&parent.id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_leftovers_are_not_split_again_until_changed() {
        let h = harness_with(
            ScriptedCompletion::new()
                .once(
                    ContractKind::Clustering,
                    r#"{"clusters": [{"name": "languages", "items": [0, 1, 2]}]}"#,
                )
                .respond(
                    ContractKind::Clustering,
                    "",
                    r#"{"clusters": [{"name": "tools", "items": [0, 1, 2]}]}"#,
                )
                .respond(ContractKind::Summarization, "", "Languages the user knows."),
            ConsolidationConfig {
                max_category_items: 3,
                ..ConsolidationConfig::default()
            },
            Arc::new(NullMirror),
        );
        let contents = [
            "Prefers Python",
            "Learning Rust",
            "Knows TypeScript",
            "Uses neovim",
            "Uses tmux",
            "Writes code daily",
            "Reviews pull requests",
            "Pairs on Fridays",
        ];
        for content in contents {
            h.remember("knowledge/coding", content).await;
        }

        let first = completed(h.engine.consolidate(None).await);
        assert_eq!(first.splits.len(), 1);
        assert_eq!(first.splits[0].moved_items, 3);

        // five leftovers still exceed the limit but nothing new arrived
        let second = completed(h.engine.consolidate(None).await);
        assert!(second.splits.is_empty());
        assert_eq!(second.summaries_refreshed, 1);
        assert!(h.summary("knowledge/coding/languages").await.is_some());
        assert_eq!(h.completion.calls_for(ContractKind::Clustering), 1);

        let third = completed(h.engine.consolidate(None).await);
        assert!(third.splits.is_empty());
        assert_eq!(third.summaries_refreshed, 0);

        h.remember("knowledge/coding", "Maintains a dotfiles repo").await;
        let fourth = completed(h.engine.consolidate(None).await);
        assert_eq!(fourth.splits.len(), 1);
        assert_eq!(
            fourth.splits[0].children,
            vec!["knowledge/coding/tools".to_string()]
        );
        assert_eq!(h.completion.calls_for(ContractKind::Clustering), 2);
    }

    #[tokio::test]
    async fn test_item_added_during_summary_call_is_picked_up() {
        let h = harness(
            ScriptedCompletion::new()
                .respond(ContractKind::Summarization, "", "Likes Python.")
                .with_delay(std::time::Duration::from_millis(200)),
        );
        h.remember("preferences/coding", "User prefers Python").await;

        let (first, _) = tokio::join!(h.engine.consolidate(None), async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            h.remember("preferences/coding", "User writes Rust code").await
        });
        assert_eq!(completed(first).summaries_refreshed, 1);

        let second = completed(h.engine.consolidate(None).await);
        assert_eq!(second.summaries_refreshed, 1);
        assert_eq!(h.completion.calls_for(ContractKind::Summarization), 2);
    }

    #[tokio::test]
    async fn test_split_failure_is_recorded() {
        let h = harness_with(
            ScriptedCompletion::new().respond(ContractKind::Clustering, "", r#"{"clusters": []}"#),
            ConsolidationConfig {
                max_category_items: 1,
                ..ConsolidationConfig::default()
            },
            Arc::new(NullMirror),
        );
        h.remember("knowledge/coding", "Prefers Python").await;
        h.remember("knowledge/coding", "Learning Rust").await;

        let report = completed(h.engine.consolidate(None).await);
        assert!(report.splits.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, ConsolidationStage::Split);
    }

    #[tokio::test]
    async fn test_second_trigger_reports_already_running() {
        let h = harness(
            ScriptedCompletion::new()
                .respond(ContractKind::Summarization, "", "Seoul resident.")
                .with_delay(std::time::Duration::from_millis(50)),
        );
        h.remember("personal/home", "Lives in Seoul").await;

        let (first, second) = tokio::join!(h.engine.consolidate(None), h.engine.consolidate(None));
        assert!(matches!(first, ConsolidationOutcome::Completed(_)));
        assert!(matches!(second, ConsolidationOutcome::AlreadyRunning));
        assert!(!h.engine.is_running());

        let third = h.engine.consolidate(None).await;
        assert!(matches!(third, ConsolidationOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_between_categories() {
        let h = harness(ScriptedCompletion::new().respond(ContractKind::Summarization, "", "x"));
        h.remember("personal/home", "Lives in Seoul").await;
        let token = CancellationToken::new();
        token.cancel();

        let report = completed(h.engine.consolidate(Some(&token)).await);
        assert!(report.cancelled);
        assert_eq!(report.summaries_refreshed, 0);
        assert!(h.completion.calls().is_empty());
        assert!(!h.engine.is_running());
    }
}
