//! In-memory fact store
//!
//! The single source of truth for Resources, Categories, MemoryItems and
//! SemanticTriples. All state sits behind one `tokio::sync::RwLock` so
//! multi-record invariants (path uniqueness, the parent index, the
//! category → items index, the item → triples index) are updated
//! atomically. There is no removal API: forgetting is deactivation.

use super::category::{Category, CategoryPath};
use super::item::{clamp_unit, MemoryItem};
use super::resource::Resource;
use super::triple::SemanticTriple;
use crate::error::{Error, Result};
use crate::index::cosine_similarity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Default)]
struct StoreInner {
    resources: HashMap<Uuid, Resource>,
    categories: HashMap<Uuid, Category>,
    by_path: HashMap<CategoryPath, Uuid>,
    children: HashMap<Uuid, Vec<Uuid>>,
    items: HashMap<Uuid, MemoryItem>,
    by_category: HashMap<Uuid, Vec<Uuid>>,
    triples: HashMap<Uuid, SemanticTriple>,
    by_item: HashMap<Uuid, Vec<Uuid>>,
}

impl StoreInner {
    fn insert_category(&mut self, category: Category) {
        if let Some(parent) = category.parent_id {
            self.children.entry(parent).or_default().push(category.id);
        }
        self.by_path.insert(category.path.clone(), category.id);
        self.categories.insert(category.id, category);
    }

    fn insert_item(&mut self, item: MemoryItem) {
        self.by_category
            .entry(item.category_id)
            .or_default()
            .push(item.id);
        self.items.insert(item.id, item);
    }

    fn insert_triple(&mut self, triple: SemanticTriple) {
        if let Some(item_id) = triple.memory_item_id {
            self.by_item.entry(item_id).or_default().push(triple.id);
        }
        self.triples.insert(triple.id, triple);
    }

    /// Deactivate the triples of an item, returning the ones that changed
    fn deactivate_item_triples(&mut self, item_id: &Uuid) -> Vec<SemanticTriple> {
        let ids = self.by_item.get(item_id).cloned().unwrap_or_default();
        let mut changed = Vec::new();
        for id in ids {
            if let Some(triple) = self.triples.get_mut(&id) {
                if triple.active {
                    triple.active = false;
                    changed.push(triple.clone());
                }
            }
        }
        changed
    }

    fn item_mut(&mut self, id: &Uuid) -> Result<&mut MemoryItem> {
        self.items
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("memory item {id}")))
    }

    fn category_items(&self, category_id: &Uuid) -> impl Iterator<Item = &MemoryItem> {
        self.by_category
            .get(category_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.items.get(id))
    }
}

/// Result of a category creation request
#[derive(Debug, Clone)]
pub struct EnsuredCategory {
    /// The category at the requested path
    pub category: Category,
    /// Categories inserted by this call, root first. Empty when the path
    /// already existed.
    pub created: Vec<Category>,
}

/// Aggregate counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub resources: usize,
    pub categories: usize,
    pub items: usize,
    pub active_items: usize,
    pub triples: usize,
}

/// Serialized form of the whole store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub resources: Vec<Resource>,
    pub categories: Vec<Category>,
    pub items: Vec<MemoryItem>,
    #[serde(default)]
    pub triples: Vec<SemanticTriple>,
}

/// Typed CRUD and query operations over the memory hierarchy
pub struct FactStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl FactStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Store a resource, returning its ID
    pub async fn put_resource(&self, resource: Resource) -> Uuid {
        let id = resource.id;
        self.inner.write().await.resources.insert(id, resource);
        id
    }

    /// Retrieve a resource by ID
    pub async fn resource(&self, id: &Uuid) -> Option<Resource> {
        self.inner.read().await.resources.get(id).cloned()
    }

    // =========================================================================
    // Categories
    // =========================================================================

    /// Ensure every segment of `path` exists, creating missing ancestors
    /// with the correct parent links. Idempotent under concurrent callers:
    /// the whole walk happens under one write lock.
    pub async fn ensure_category_path(&self, path: &CategoryPath) -> Result<EnsuredCategory> {
        let mut inner = self.inner.write().await;
        let mut created = Vec::new();
        let mut parent: Option<Uuid> = None;

        for prefix in path.ancestors() {
            let id = match inner.by_path.get(&prefix) {
                Some(id) => *id,
                None => {
                    let category = Category::new(prefix.clone(), parent);
                    let id = category.id;
                    created.push(category.clone());
                    inner.insert_category(category);
                    id
                }
            };
            parent = Some(id);
        }

        let leaf = parent
            .and_then(|id| inner.categories.get(&id).cloned())
            .ok_or_else(|| Error::Store(format!("failed to materialize category {path}")))?;
        Ok(EnsuredCategory {
            category: leaf,
            created,
        })
    }

    /// Create a single category under an explicit parent.
    ///
    /// Returns the existing row when the path already exists with the same
    /// parent. A different parent, or a parent whose path is not the
    /// prefix of `path`, is a `NamingConflict`.
    pub async fn create_category(
        &self,
        path: &CategoryPath,
        parent_id: Option<Uuid>,
    ) -> Result<EnsuredCategory> {
        let mut inner = self.inner.write().await;

        if let Some(existing_id) = inner.by_path.get(path) {
            let existing = inner
                .categories
                .get(existing_id)
                .cloned()
                .ok_or_else(|| Error::Store(format!("dangling path index for {path}")))?;
            if existing.parent_id != parent_id {
                return Err(Error::NamingConflict {
                    path: path.to_string(),
                    existing_parent: existing.parent_id,
                    requested_parent: parent_id,
                });
            }
            return Ok(EnsuredCategory {
                category: existing,
                created: Vec::new(),
            });
        }

        let expected_parent = path.parent();
        let lineage_ok = match (parent_id, &expected_parent) {
            (None, None) => true,
            (Some(pid), Some(expected)) => {
                let parent = inner
                    .categories
                    .get(&pid)
                    .ok_or_else(|| Error::NotFound(format!("parent category {pid}")))?;
                &parent.path == expected
            }
            _ => false,
        };
        if !lineage_ok {
            return Err(Error::NamingConflict {
                path: path.to_string(),
                existing_parent: expected_parent
                    .as_ref()
                    .and_then(|p| inner.by_path.get(p).copied()),
                requested_parent: parent_id,
            });
        }

        let category = Category::new(path.clone(), parent_id);
        inner.insert_category(category.clone());
        Ok(EnsuredCategory {
            created: vec![category.clone()],
            category,
        })
    }

    /// Retrieve a category by ID
    pub async fn category(&self, id: &Uuid) -> Option<Category> {
        self.inner.read().await.categories.get(id).cloned()
    }

    /// Retrieve a category by path
    pub async fn category_by_path(&self, path: &CategoryPath) -> Option<Category> {
        let inner = self.inner.read().await;
        inner
            .by_path
            .get(path)
            .and_then(|id| inner.categories.get(id))
            .cloned()
    }

    /// All categories ordered by path
    pub async fn categories(&self) -> Vec<Category> {
        let inner = self.inner.read().await;
        let mut all: Vec<Category> = inner.categories.values().cloned().collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }

    /// Direct children of a category, ordered by path
    pub async fn children(&self, parent_id: &Uuid) -> Vec<Category> {
        let inner = self.inner.read().await;
        let mut out: Vec<Category> = inner
            .children
            .get(parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.categories.get(id).cloned())
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    /// Record the vector projected into the index for a category
    pub async fn set_category_embedding(&self, id: &Uuid, embedding: Vec<f32>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let category = inner
            .categories
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("category {id}")))?;
        category.embedding = Some(embedding);
        Ok(())
    }

    /// Overwrite a category summary. `as_of` is when the summarized items
    /// were read; later item changes keep the category dirty.
    pub async fn update_summary(
        &self,
        id: &Uuid,
        summary: impl Into<String>,
        as_of: DateTime<Utc>,
    ) -> Result<Category> {
        let mut inner = self.inner.write().await;
        let category = inner
            .categories
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("category {id}")))?;
        category.summary = Some(summary.into());
        category.summarized_at = Some(as_of);
        Ok(category.clone())
    }

    /// Bump `last_accessed` on categories
    pub async fn touch_categories(&self, ids: &[Uuid]) {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        for id in ids {
            if let Some(category) = inner.categories.get_mut(id) {
                category.last_accessed = now;
            }
        }
    }

    // =========================================================================
    // Items
    // =========================================================================

    /// Insert a new item. The owning category must exist and the id must be new.
    pub async fn insert_item(&self, item: MemoryItem) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.categories.contains_key(&item.category_id) {
            return Err(Error::NotFound(format!("category {}", item.category_id)));
        }
        if inner.items.contains_key(&item.id) {
            return Err(Error::Store(format!("memory item {} already exists", item.id)));
        }
        inner.insert_item(item);
        Ok(())
    }

    /// Retrieve an item by ID, active or not
    pub async fn item(&self, id: &Uuid) -> Option<MemoryItem> {
        self.inner.read().await.items.get(id).cloned()
    }

    /// Retrieve several items, skipping unknown ids and preserving order
    pub async fn items(&self, ids: &[Uuid]) -> Vec<MemoryItem> {
        let inner = self.inner.read().await;
        ids.iter().filter_map(|id| inner.items.get(id).cloned()).collect()
    }

    /// Every item owned by a category, active or not, oldest first
    pub async fn items_in_category(&self, category_id: &Uuid) -> Vec<MemoryItem> {
        let inner = self.inner.read().await;
        let mut items: Vec<MemoryItem> = inner.category_items(category_id).cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        items
    }

    /// Active items owned by a category, oldest first
    pub async fn active_items_in_category(&self, category_id: &Uuid) -> Vec<MemoryItem> {
        let mut items = self.items_in_category(category_id).await;
        items.retain(|i| i.active);
        items
    }

    /// Active items in a category whose vectors are at least `threshold`
    /// similar to `vector`, most similar first
    pub async fn similar_active_in_category(
        &self,
        category_id: &Uuid,
        vector: &[f32],
        threshold: f32,
    ) -> Vec<(MemoryItem, f32)> {
        let inner = self.inner.read().await;
        let mut hits: Vec<(MemoryItem, f32)> = inner
            .category_items(category_id)
            .filter(|i| i.active)
            .filter_map(|i| {
                let score = cosine_similarity(&i.embedding, vector);
                (score >= threshold).then(|| (i.clone(), score))
            })
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.id.cmp(&b.0.id))
        });
        hits
    }

    /// Record a repeat observation: mention_count + 1 and importance raised
    /// by `step` (capped at 1.0)
    pub async fn reinforce(&self, id: &Uuid, step: f32) -> Result<MemoryItem> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let item = inner.item_mut(id)?;
        item.mention_count = item.mention_count.saturating_add(1);
        item.importance = clamp_unit(item.importance + step);
        item.updated_at = now;
        item.last_accessed = now;
        Ok(item.clone())
    }

    /// Deactivate `old` and link it to the item that replaced it. The
    /// triples extracted with `old` are deactivated along with it.
    pub async fn supersede(&self, old: &Uuid, new: Uuid) -> Result<MemoryItem> {
        let mut inner = self.inner.write().await;
        let item = inner.item_mut(old)?;
        item.active = false;
        item.superseded_by = Some(new);
        item.updated_at = Utc::now();
        let item = item.clone();
        inner.deactivate_item_triples(old);
        Ok(item)
    }

    /// Bump `last_accessed` on items
    pub async fn touch(&self, ids: &[Uuid]) {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        for id in ids {
            if let Some(item) = inner.items.get_mut(id) {
                item.last_accessed = now;
            }
        }
    }

    /// Move an item to another category. Identity is unchanged.
    pub async fn reassign(&self, item_id: &Uuid, category_id: &Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.categories.contains_key(category_id) {
            return Err(Error::NotFound(format!("category {category_id}")));
        }
        let item = inner.item_mut(item_id)?;
        let previous = item.category_id;
        if previous == *category_id {
            return Ok(());
        }
        item.category_id = *category_id;
        item.updated_at = Utc::now();

        if let Some(ids) = inner.by_category.get_mut(&previous) {
            ids.retain(|id| id != item_id);
        }
        inner
            .by_category
            .entry(*category_id)
            .or_default()
            .push(*item_id);
        Ok(())
    }

    /// Items not accessed since `cutoff`, active or not
    pub async fn stale_items(&self, cutoff: DateTime<Utc>) -> Vec<MemoryItem> {
        self.inner
            .read()
            .await
            .items
            .values()
            .filter(|i| i.last_accessed < cutoff)
            .cloned()
            .collect()
    }

    /// Every item, for re-projection into the index
    pub async fn all_items(&self) -> Vec<MemoryItem> {
        self.inner.read().await.items.values().cloned().collect()
    }

    /// Active items, most recently accessed first
    pub async fn recent_items(&self, limit: usize) -> Vec<MemoryItem> {
        let inner = self.inner.read().await;
        let mut items: Vec<MemoryItem> = inner
            .items
            .values()
            .filter(|i| i.active)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed).then(a.id.cmp(&b.id)));
        items.truncate(limit);
        items
    }

    // =========================================================================
    // Triples
    // =========================================================================

    /// Insert a triple. Active triples it contradicts are deactivated and
    /// returned so callers can re-project them.
    pub async fn insert_triple(&self, triple: SemanticTriple) -> Result<Vec<SemanticTriple>> {
        let mut inner = self.inner.write().await;
        if let Some(item_id) = triple.memory_item_id {
            if !inner.items.contains_key(&item_id) {
                return Err(Error::NotFound(format!("memory item {item_id}")));
            }
        }
        if inner.triples.contains_key(&triple.id) {
            return Err(Error::Store(format!("triple {} already exists", triple.id)));
        }
        let mut replaced = Vec::new();
        for existing in inner.triples.values_mut() {
            if existing.active && existing.is_opposite_of(&triple) {
                existing.active = false;
                replaced.push(existing.clone());
            }
        }
        inner.insert_triple(triple);
        Ok(replaced)
    }

    /// Retrieve several triples, skipping unknown ids and preserving order
    pub async fn triples(&self, ids: &[Uuid]) -> Vec<SemanticTriple> {
        let inner = self.inner.read().await;
        ids.iter().filter_map(|id| inner.triples.get(id).cloned()).collect()
    }

    /// Triples extracted with an item, active or not
    pub async fn triples_for_item(&self, item_id: &Uuid) -> Vec<SemanticTriple> {
        let inner = self.inner.read().await;
        inner
            .by_item
            .get(item_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.triples.get(id).cloned())
            .collect()
    }

    /// Every triple, for re-projection into the index
    pub async fn all_triples(&self) -> Vec<SemanticTriple> {
        self.inner.read().await.triples.values().cloned().collect()
    }

    /// Bump `last_accessed` on triples
    pub async fn touch_triples(&self, ids: &[Uuid]) {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        for id in ids {
            if let Some(triple) = inner.triples.get_mut(id) {
                triple.last_accessed = now;
            }
        }
    }

    /// Aggregate counts
    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.read().await;
        StoreStats {
            resources: inner.resources.len(),
            categories: inner.categories.len(),
            items: inner.items.len(),
            active_items: inner.items.values().filter(|i| i.active).count(),
            triples: inner.triples.len(),
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Capture the full store
    pub async fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read().await;
        let mut resources: Vec<Resource> = inner.resources.values().cloned().collect();
        resources.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut categories: Vec<Category> = inner.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.path.cmp(&b.path));
        let mut items: Vec<MemoryItem> = inner.items.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let mut triples: Vec<SemanticTriple> = inner.triples.values().cloned().collect();
        triples.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            resources,
            categories,
            items,
            triples,
        }
    }

    /// Build a store from a snapshot, rebuilding every secondary index
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Store(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        let mut inner = StoreInner::default();
        for resource in snapshot.resources {
            inner.resources.insert(resource.id, resource);
        }
        // Sorted by path, so parents are inserted before children.
        for category in snapshot.categories {
            if inner.by_path.contains_key(&category.path) {
                return Err(Error::Store(format!(
                    "duplicate category path {} in snapshot",
                    category.path
                )));
            }
            inner.insert_category(category);
        }
        for item in snapshot.items {
            if !inner.categories.contains_key(&item.category_id) {
                return Err(Error::Store(format!(
                    "item {} references unknown category {}",
                    item.id, item.category_id
                )));
            }
            inner.insert_item(item);
        }
        for triple in snapshot.triples {
            if let Some(item_id) = triple.memory_item_id {
                if !inner.items.contains_key(&item_id) {
                    return Err(Error::Store(format!(
                        "triple {} references unknown item {item_id}",
                        triple.id
                    )));
                }
            }
            inner.insert_triple(triple);
        }
        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    /// Write the snapshot as JSON via a temp file and rename
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        let json = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        tracing::debug!(
            path = %path.display(),
            items = snapshot.items.len(),
            "Saved fact store snapshot"
        );
        Ok(())
    }

    /// Load a snapshot file; a missing file yields an empty store
    pub async fn load_snapshot(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
                Self::from_snapshot(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for FactStore {
    fn default() -> Self {
        Self::new()
    }
}
