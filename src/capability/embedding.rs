//! Embedding cache and policy-wrapped embedding client
//!
//! `CachedEmbedder` is a capacity-limited LRU in front of any
//! `EmbeddingService`, keyed by the SHA-256 of the input text so that
//! repeated facts and category paths are embedded once. `Embeddings` is
//! what the pipelines hold: it applies the embedding `CallPolicy` and
//! checks the dimensionality of every returned vector.

use super::policy::CallPolicy;
use super::EmbeddingService;
use crate::error::{Error, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

type CacheKey = [u8; 32];

struct CacheInner {
    map: HashMap<CacheKey, Vec<f32>>,
    /// LRU order: front = oldest, back = newest
    order: VecDeque<CacheKey>,
    capacity: usize,
}

impl CacheInner {
    fn get(&mut self, key: &CacheKey) -> Option<Vec<f32>> {
        let hit = self.map.get(key).cloned()?;
        self.order.retain(|k| k != key);
        self.order.push_back(*key);
        Some(hit)
    }

    fn put(&mut self, key: CacheKey, vector: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }
        if self.map.contains_key(&key) {
            self.order.retain(|k| *k != key);
        } else if self.map.len() >= self.capacity {
            if let Some(lru) = self.order.pop_front() {
                self.map.remove(&lru);
            }
        }
        self.map.insert(key, vector);
        self.order.push_back(key);
    }
}

/// LRU embedding cache keyed by text digest
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingService>,
    cache: RwLock<CacheInner>,
}

impl CachedEmbedder {
    /// Wrap `inner` with a cache of `capacity` entries (0 disables caching)
    pub fn new(inner: Arc<dyn EmbeddingService>, capacity: usize) -> Self {
        Self {
            inner,
            cache: RwLock::new(CacheInner {
                map: HashMap::with_capacity(capacity.min(1024)),
                order: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
            }),
        }
    }

    /// Number of cached vectors
    pub async fn len(&self) -> usize {
        self.cache.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.map.is_empty()
    }

    fn key(text: &str) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&hasher.finalize());
        key
    }
}

#[async_trait]
impl EmbeddingService for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = Self::key(text);
        if let Some(hit) = self.cache.write().await.get(&key) {
            return Ok(hit);
        }
        let vector = self.inner.embed(text).await?;
        self.cache.write().await.put(key, vector.clone());
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<CacheKey> = texts.iter().map(|t| Self::key(t)).collect();
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses = Vec::new();
        {
            let mut cache = self.cache.write().await;
            for (i, key) in keys.iter().enumerate() {
                let hit = cache.get(key);
                if hit.is_none() {
                    misses.push(i);
                }
                out.push(hit);
            }
        }

        if !misses.is_empty() {
            let miss_texts: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.inner.embed_batch(&miss_texts).await?;
            if vectors.len() != miss_texts.len() {
                return Err(Error::capability(
                    "embedding",
                    format!(
                        "batch returned {} vectors for {} inputs",
                        vectors.len(),
                        miss_texts.len()
                    ),
                    false,
                ));
            }
            let mut cache = self.cache.write().await;
            for (&i, vector) in misses.iter().zip(vectors) {
                cache.put(keys[i], vector.clone());
                out[i] = Some(vector);
            }
        }

        out.into_iter()
            .map(|v| v.ok_or_else(|| Error::capability("embedding", "missing vector", false)))
            .collect()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// Policy-wrapped embedding client used by the pipelines
#[derive(Clone)]
pub struct Embeddings {
    service: Arc<dyn EmbeddingService>,
    policy: CallPolicy,
}

impl Embeddings {
    pub fn new(service: Arc<dyn EmbeddingService>, policy: CallPolicy) -> Self {
        Self { service, policy }
    }

    pub fn dimension(&self) -> usize {
        self.service.dimension()
    }

    /// Embed one text
    pub async fn embed(&self, text: &str, cancel: Option<&CancellationToken>) -> Result<Vec<f32>> {
        let service = &self.service;
        let vector = self
            .policy
            .run("embedding", cancel, move || async move { service.embed(text).await })
            .await?;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    /// Embed many texts in one call, preserving order
    pub async fn embed_batch(
        &self,
        texts: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let service = &self.service;
        let vectors = self
            .policy
            .run("embedding", cancel, move || async move {
                service.embed_batch(texts).await
            })
            .await?;
        if vectors.len() != texts.len() {
            return Err(Error::capability(
                "embedding",
                format!("batch returned {} vectors for {} inputs", vectors.len(), texts.len()),
                false,
            ));
        }
        for vector in &vectors {
            self.check_dimension(vector)?;
        }
        Ok(vectors)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        let expected = self.service.dimension();
        if vector.len() != expected {
            return Err(Error::capability(
                "embedding",
                format!("expected {expected} dimensions, got {}", vector.len()),
                false,
            ));
        }
        Ok(())
    }
}
