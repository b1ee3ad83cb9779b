//! Deterministic test doubles for the capability interfaces

use crate::capability::{
    CompletionRequest, CompletionService, ContractKind, DocumentMirror, EmbeddingService,
    IndexFilter, IndexPayload, IndexScope, ScoredId, VectorIndex,
};
use crate::error::{Error, Result};
use crate::index::InMemoryIndex;
use crate::memory::CategoryPath;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

struct Rule {
    contract: ContractKind,
    needle: String,
    response: std::result::Result<String, bool>,
    once: bool,
    used: bool,
}

/// Completion service answering from registered rules.
///
/// The first unused rule whose contract matches and whose needle occurs in
/// the prompt wins. Unmatched calls fail permanently.
pub struct ScriptedCompletion {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    fn push(self, rule: Rule) -> Self {
        self.rules.lock().unwrap().push(rule);
        self
    }

    /// Answer `contract` calls whose prompt contains `needle`
    pub fn respond(self, contract: ContractKind, needle: &str, response: &str) -> Self {
        self.push(Rule {
            contract,
            needle: needle.to_string(),
            response: Ok(response.to_string()),
            once: false,
            used: false,
        })
    }

    /// Answer the next `contract` call once
    pub fn once(self, contract: ContractKind, response: &str) -> Self {
        self.push(Rule {
            contract,
            needle: String::new(),
            response: Ok(response.to_string()),
            once: true,
            used: false,
        })
    }

    /// Fail every `contract` call
    pub fn fail(self, contract: ContractKind, transient: bool) -> Self {
        self.push(Rule {
            contract,
            needle: String::new(),
            response: Err(transient),
            once: false,
            used: false,
        })
    }

    /// Fail `contract` calls whose prompt contains `needle`
    pub fn fail_on(self, contract: ContractKind, needle: &str) -> Self {
        self.push(Rule {
            contract,
            needle: needle.to_string(),
            response: Err(false),
            once: false,
            used: false,
        })
    }

    /// Sleep before answering every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, contract: ContractKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contract == contract)
            .count()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = {
            let mut rules = self.rules.lock().unwrap();
            rules
                .iter_mut()
                .find(|r| {
                    r.contract == request.contract
                        && !(r.once && r.used)
                        && request.prompt.contains(&r.needle)
                })
                .map(|r| {
                    r.used = true;
                    r.response.clone()
                })
        };

        match response {
            Some(Ok(text)) => Ok(text),
            Some(Err(transient)) => Err(Error::capability(
                request.contract.as_str(),
                "scripted failure",
                transient,
            )),
            None => Err(Error::capability(
                request.contract.as_str(),
                "no scripted response",
                false,
            )),
        }
    }
}

/// Concept families, one axis each, ahead of the hashed buckets
const CONCEPTS: &[&[&str]] = &[
    &["python", "typescript", "rust", "java", "language", "coding", "code", "programming"],
    &["prefer", "like", "love", "favorite", "favourite"],
    &["live", "seoul", "busan", "city", "moved", "home"],
    &["food", "sushi", "pizza", "eat", "coffee", "tea"],
    &["work", "job", "office", "project", "meeting"],
];

const DIMENSION: usize = 16;

/// Embedder with stable geometry: each concept family owns one axis,
/// and texts with no known concept fall into hashed buckets.
pub struct KeywordEmbedder {
    calls: AtomicUsize,
    reported_dimension: usize,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::with_reported_dimension(DIMENSION)
    }

    /// Report a dimension that differs from the vectors actually produced
    pub fn with_reported_dimension(dimension: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reported_dimension: dimension,
        }
    }

    /// Calls received, counting a batch as one
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; DIMENSION];
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut matched = false;
        for token in &tokens {
            for (axis, words) in CONCEPTS.iter().enumerate() {
                if words.iter().any(|w| token.starts_with(w)) {
                    vector[axis] += 1.0;
                    matched = true;
                }
            }
        }
        if !matched {
            let buckets = DIMENSION - CONCEPTS.len();
            for token in &tokens {
                let hash: usize = token.bytes().map(usize::from).sum();
                vector[CONCEPTS.len() + hash % buckets] += 1.0;
            }
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[DIMENSION - 1] = 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingService for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.reported_dimension
    }
}

/// Mirror whose every write fails
pub struct FailingMirror;

#[async_trait]
impl DocumentMirror for FailingMirror {
    async fn append_to_category(&self, _path: &CategoryPath, _entry: &str) -> Result<()> {
        Err(Error::Mirror("disk full".to_string()))
    }

    async fn append_to_timeline(&self, _entry: &str) -> Result<()> {
        Err(Error::Mirror("disk full".to_string()))
    }

    async fn update_category_summary(&self, _path: &CategoryPath, _text: &str) -> Result<()> {
        Err(Error::Mirror("disk full".to_string()))
    }
}

/// In-memory index that can be told to reject item upserts
pub struct FailingIndex {
    inner: InMemoryIndex,
    fail_items: AtomicBool,
}

impl FailingIndex {
    pub fn new() -> Self {
        Self {
            inner: InMemoryIndex::new(),
            fail_items: AtomicBool::new(true),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_items.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn upsert_vector(&self, id: Uuid, vector: Vec<f32>, payload: IndexPayload) -> Result<()> {
        if payload.scope == IndexScope::Item && self.fail_items.load(Ordering::SeqCst) {
            return Err(Error::Index("index unavailable".to_string()));
        }
        self.inner.upsert_vector(id, vector, payload).await
    }

    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        k: usize,
        min_score: Option<f32>,
        filter: IndexFilter,
    ) -> Result<Vec<ScoredId>> {
        self.inner.nearest_neighbors(vector, k, min_score, filter).await
    }

    async fn keyword_search(
        &self,
        text: &str,
        k: usize,
        filter: IndexFilter,
    ) -> Result<Vec<ScoredId>> {
        self.inner.keyword_search(text, k, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cosine_similarity;

    #[test]
    fn test_keyword_geometry() {
        let old = KeywordEmbedder::vector("User prefers TypeScript over Python");
        let new = KeywordEmbedder::vector("User prefers Python");
        assert!(cosine_similarity(&old, &new) > 0.9);

        let category = KeywordEmbedder::vector("preferences coding languages");
        assert!(cosine_similarity(&category, &old) > 0.7);

        let seoul = KeywordEmbedder::vector("Lives in Seoul");
        assert!(cosine_similarity(&seoul, &new) < 0.1);

        assert_eq!(KeywordEmbedder::vector("").len(), DIMENSION);
    }

    #[tokio::test]
    async fn test_scripted_rules() {
        let scripted = ScriptedCompletion::new()
            .once(ContractKind::Rewrite, "first")
            .respond(ContractKind::Rewrite, "", "second");
        let request = CompletionRequest {
            contract: ContractKind::Rewrite,
            prompt: "q".to_string(),
            response_schema: None,
        };
        assert_eq!(scripted.complete(&request).await.unwrap(), "first");
        assert_eq!(scripted.complete(&request).await.unwrap(), "second");
        assert_eq!(scripted.calls_for(ContractKind::Rewrite), 2);

        let other = CompletionRequest {
            contract: ContractKind::Summarization,
            ..request
        };
        assert!(scripted.complete(&other).await.is_err());
    }
}
