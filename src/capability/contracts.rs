//! Typed completion contracts
//!
//! `Contracts` owns prompt construction and output parsing for the
//! completion contracts. Each call runs through a `CallPolicy`;
//! output that fails to parse is a `MalformedOutput` error and therefore
//! retried like any other transient failure.

use super::policy::CallPolicy;
use super::{CompletionRequest, CompletionService, ContractKind};
use crate::config::CapabilityConfig;
use crate::error::{Error, Result};
use crate::memory::item::clamp_unit;
use crate::memory::{CategoryPath, MemoryKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A candidate fact proposed by the extraction contract
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFact {
    pub content: String,
    pub kind: MemoryKind,
    /// Model-proposed category path, if it parsed
    pub category_path: Option<CategoryPath>,
    pub importance: f32,
    pub confidence: f32,
    /// Entity statements backing the fact, when requested
    pub triples: Vec<ExtractedTriple>,
}

/// A subject-predicate-object statement proposed alongside a fact
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFact {
    #[serde(default)]
    content: String,
    #[serde(default, alias = "type")]
    kind: Option<String>,
    #[serde(default, alias = "category")]
    category_path: Option<String>,
    #[serde(default)]
    importance: Option<f32>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    triples: Vec<ExtractedTriple>,
}

impl RawFact {
    fn into_fact(self) -> Option<ExtractedFact> {
        let content = self.content.trim().to_string();
        if content.is_empty() {
            return None;
        }
        Some(ExtractedFact {
            content,
            kind: self
                .kind
                .as_deref()
                .map(MemoryKind::from_tag)
                .unwrap_or_default(),
            category_path: self.category_path.as_deref().and_then(CategoryPath::parse),
            importance: clamp_unit(self.importance.unwrap_or(0.5)),
            confidence: clamp_unit(self.confidence.unwrap_or(1.0)),
            triples: self
                .triples
                .into_iter()
                .filter(|t| {
                    !t.subject.trim().is_empty()
                        && !t.predicate.trim().is_empty()
                        && !t.object.trim().is_empty()
                })
                .collect(),
        })
    }
}

/// Outcome of comparing a new fact with an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionVerdict {
    /// The new fact replaces the existing one
    Supersede,
    /// Both state the same thing
    Equivalent,
    /// Neither contradicts nor repeats the other
    Unrelated,
}

#[derive(Debug, Deserialize)]
struct VerdictResponse {
    verdict: String,
}

#[derive(Debug, Deserialize)]
struct RewriteResponse {
    query: String,
}

#[derive(Debug, Deserialize)]
struct PathResponse {
    path: Option<String>,
}

/// One group proposed by the clustering contract
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Cluster {
    /// Child category name
    pub name: String,
    /// Indices into the item list sent with the request
    #[serde(default)]
    pub items: Vec<usize>,
}

/// Clustering contract output
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClusteringResponse {
    pub clusters: Vec<Cluster>,
    /// Roll-up description for the parent category
    #[serde(default)]
    pub parent_summary: Option<String>,
}

/// Deep-mode reasoning output
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReasoningResponse {
    pub answer: String,
    /// Category paths the answer relied on
    #[serde(default)]
    pub cited_categories: Vec<String>,
}

/// Typed facade over a `CompletionService`
pub struct Contracts {
    completion: Arc<dyn CompletionService>,
    policy: CallPolicy,
    reasoning_policy: CallPolicy,
    /// Ask extraction for subject-predicate-object triples
    triples: bool,
}

impl Contracts {
    pub fn new(completion: Arc<dyn CompletionService>, config: &CapabilityConfig) -> Self {
        Self {
            completion,
            policy: CallPolicy::completion(config),
            reasoning_policy: CallPolicy::reasoning(config),
            triples: false,
        }
    }

    /// Request entity triples with every extracted fact
    pub fn with_triples(mut self, enabled: bool) -> Self {
        self.triples = enabled;
        self
    }

    /// Extract salient facts from raw text. Chit-chat yields an empty list.
    pub async fn extract(
        &self,
        text: &str,
        existing_categories: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<ExtractedFact>> {
        let categories = if existing_categories.is_empty() {
            "(none yet)".to_string()
        } else {
            existing_categories.join(", ")
        };
        let triples = if self.triples {
            ", \"triples\": [{\"subject\": string, \"predicate\": string, \"object\": string, \"context\": string}]"
        } else {
            ""
        };
        let mut prompt = format!(
            "Extract the durable facts from the input below: facts, preferences, events and plans.\n\
             Skip greetings, filler and anything with no long-term value.\n\n\
             Existing categories: {categories}\n\n\
             Input:\n{text}\n\n\
             Respond with JSON: {{\"facts\": [{{\"content\": string, \"kind\": \"fact\"|\"preference\"|\"event\"|\"plan\", \
             \"category_path\": \"root/sub/leaf\", \"importance\": 0.0-1.0, \"confidence\": 0.0-1.0{triples}}}]}}.\n\
             Reuse an existing category when it fits. Return {{\"facts\": []}} when nothing is worth keeping."
        );
        if self.triples {
            prompt.push_str(
                "\nFor each fact, list the entity statements it makes as triples, \
                 e.g. {\"subject\": \"User\", \"predicate\": \"lives in\", \"object\": \"Seoul\"}.",
            );
        }
        let request = CompletionRequest {
            contract: ContractKind::Extraction,
            prompt,
            response_schema: Some(json!({
                "type": "object",
                "properties": {
                    "facts": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "content": {"type": "string"},
                                "kind": {"type": "string"},
                                "category_path": {"type": "string"},
                                "importance": {"type": "number"},
                                "confidence": {"type": "number"},
                                "triples": {
                                    "type": "array",
                                    "items": {
                                        "type": "object",
                                        "properties": {
                                            "subject": {"type": "string"},
                                            "predicate": {"type": "string"},
                                            "object": {"type": "string"},
                                            "context": {"type": "string"}
                                        },
                                        "required": ["subject", "predicate", "object"]
                                    }
                                }
                            },
                            "required": ["content"]
                        }
                    }
                },
                "required": ["facts"]
            })),
        };
        self.call(&self.policy, request, cancel, parse_facts).await
    }

    /// Judge whether `candidate` supersedes, repeats or is unrelated to `existing`.
    pub async fn judge(
        &self,
        existing: &str,
        candidate: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<ContradictionVerdict> {
        let prompt = format!(
            "Compare two statements about the same user.\n\n\
             Existing fact: {existing}\n\
             New fact: {candidate}\n\n\
             Answer \"supersede\" if the new fact replaces or contradicts the existing one, \
             \"equivalent\" if both say the same thing, otherwise \"unrelated\".\n\
             Respond with JSON: {{\"verdict\": \"supersede\"|\"equivalent\"|\"unrelated\"}}"
        );
        let request = CompletionRequest {
            contract: ContractKind::Contradiction,
            prompt,
            response_schema: Some(json!({
                "type": "object",
                "properties": {
                    "verdict": {"type": "string", "enum": ["supersede", "equivalent", "unrelated"]}
                },
                "required": ["verdict"]
            })),
        };
        self.call(&self.policy, request, cancel, parse_verdict).await
    }

    /// Rewrite a context-dependent query into a self-contained one.
    pub async fn rewrite(
        &self,
        query: &str,
        context: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        let prompt = format!(
            "Rewrite the user's memory query so it can be understood without the conversation.\n\
             Resolve pronouns and ellipsis from the context. Keep an already specific query unchanged.\n\n\
             Conversation:\n{context}\n\n\
             Query: {query}\n\n\
             Respond with JSON: {{\"query\": string}}"
        );
        let request = CompletionRequest {
            contract: ContractKind::Rewrite,
            prompt,
            response_schema: Some(json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            })),
        };
        self.call(&self.policy, request, cancel, parse_rewrite).await
    }

    /// Summarize the items of one category.
    pub async fn summarize(
        &self,
        path: &CategoryPath,
        items: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        let prompt = format!(
            "Summarize the memory items filed under \"{path}\" in two or three sentences.\n\
             Keep names, numbers and current preferences.\n\nItems:\n{}",
            bullet_list(items)
        );
        let request = CompletionRequest {
            contract: ContractKind::Summarization,
            prompt,
            response_schema: None,
        };
        self.call(&self.policy, request, cancel, parse_summary).await
    }

    /// Ask for `target` named groups of the items in an oversized category.
    pub async fn cluster(
        &self,
        path: &CategoryPath,
        items: &[String],
        target: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<ClusteringResponse> {
        let numbered: Vec<String> = items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("[{i}] {item}"))
            .collect();
        let prompt = format!(
            "The category \"{path}\" holds too many items. Split them into {target} sub-categories.\n\
             Give each group a short lowercase name and list the item numbers it contains.\n\
             Also write a one-sentence description of the parent as a whole.\n\n\
             Items:\n{}\n\n\
             Respond with JSON: {{\"clusters\": [{{\"name\": string, \"items\": [number]}}], \"parent_summary\": string}}",
            numbered.join("\n")
        );
        let request = CompletionRequest {
            contract: ContractKind::Clustering,
            prompt,
            response_schema: Some(json!({
                "type": "object",
                "properties": {
                    "clusters": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string"},
                                "items": {"type": "array", "items": {"type": "integer"}}
                            },
                            "required": ["name", "items"]
                        }
                    },
                    "parent_summary": {"type": "string"}
                },
                "required": ["clusters"]
            })),
        };
        let mut response = self.call(&self.policy, request, cancel, parse_clusters).await?;
        for cluster in &mut response.clusters {
            cluster.items.retain(|i| *i < items.len());
        }
        response
            .clusters
            .retain(|c| !c.items.is_empty() && !c.name.trim().is_empty());
        Ok(response)
    }

    /// Suggest a category path for a fact, given nearby categories.
    pub async fn suggest_path(
        &self,
        fact: &str,
        candidates: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<CategoryPath>> {
        let candidates = if candidates.is_empty() {
            "(none)".to_string()
        } else {
            bullet_list(candidates)
        };
        let prompt = format!(
            "Choose the category path for the fact below.\n\
             Reuse a candidate if it fits, extend a candidate with a more specific segment, \
             or start a new path under knowledge/, personal/, projects/ or preferences/.\n\
             Paths are lowercase English, slash separated.\n\n\
             Fact: {fact}\n\nCandidates:\n{candidates}\n\n\
             Respond with JSON: {{\"path\": string}}"
        );
        let request = CompletionRequest {
            contract: ContractKind::CategoryPath,
            prompt,
            response_schema: Some(json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            })),
        };
        self.call(&self.policy, request, cancel, parse_path).await
    }

    /// Answer a query from category summaries and items, citing categories.
    pub async fn reason(
        &self,
        query: &str,
        summaries: &[(String, String)],
        items: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<ReasoningResponse> {
        let summaries: Vec<String> = summaries
            .iter()
            .map(|(path, summary)| format!("- {path}: {summary}"))
            .collect();
        let prompt = format!(
            "Answer the question using only the memories below. Say so if they are insufficient.\n\n\
             Question: {query}\n\n\
             Category summaries:\n{}\n\n\
             Relevant memories:\n{}\n\n\
             Respond with JSON: {{\"answer\": string, \"cited_categories\": [category path]}}",
            if summaries.is_empty() {
                "(none)".to_string()
            } else {
                summaries.join("\n")
            },
            bullet_list(items)
        );
        let request = CompletionRequest {
            contract: ContractKind::Reasoning,
            prompt,
            response_schema: Some(json!({
                "type": "object",
                "properties": {
                    "answer": {"type": "string"},
                    "cited_categories": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["answer", "cited_categories"]
            })),
        };
        self.call(&self.reasoning_policy, request, cancel, parse_reasoning)
            .await
    }

    /// Predict what the user is likely to need next, in one or two sentences.
    pub async fn predict_intent(
        &self,
        context: &serde_json::Value,
        patterns: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        let context = serde_json::to_string_pretty(context)?;
        let prompt = format!(
            "Based on the current context and recent behavioral patterns, predict what the user might need next.\n\n\
             Current context:\n{context}\n\n\
             Recent patterns:\n{}\n\n\
             Write one or two sentences that would help assist the user proactively. \
             Make an actionable prediction, not an observation.",
            bullet_list(patterns)
        );
        let request = CompletionRequest {
            contract: ContractKind::Prediction,
            prompt,
            response_schema: None,
        };
        self.call(&self.policy, request, cancel, parse_prediction).await
    }

    async fn call<T>(
        &self,
        policy: &CallPolicy,
        request: CompletionRequest,
        cancel: Option<&CancellationToken>,
        parse: fn(&str) -> Result<T>,
    ) -> Result<T> {
        tracing::debug!(
            contract = %request.contract,
            prompt_len = request.prompt.len(),
            "Calling completion contract"
        );
        let completion = &self.completion;
        let request = &request;
        policy
            .run(request.contract.as_str(), cancel, move || async move {
                let raw = completion.complete(request).await?;
                parse(&raw)
            })
            .await
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip code fences and surrounding prose markers from model output.
fn json_body(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

fn parse_json<T: DeserializeOwned>(contract: ContractKind, raw: &str) -> Result<T> {
    serde_json::from_str(json_body(raw)).map_err(|e| Error::MalformedOutput {
        contract: contract.to_string(),
        message: e.to_string(),
    })
}

fn malformed(contract: ContractKind, message: impl Into<String>) -> Error {
    Error::MalformedOutput {
        contract: contract.to_string(),
        message: message.into(),
    }
}

fn parse_facts(raw: &str) -> Result<Vec<ExtractedFact>> {
    let value: serde_json::Value = parse_json(ContractKind::Extraction, raw)?;
    let list = match value {
        serde_json::Value::Array(items) => serde_json::Value::Array(items),
        serde_json::Value::Object(mut map) => map
            .remove("facts")
            .or_else(|| map.remove("items"))
            .ok_or_else(|| malformed(ContractKind::Extraction, "missing \"facts\" array"))?,
        _ => return Err(malformed(ContractKind::Extraction, "expected an array of facts")),
    };
    let raw_facts: Vec<RawFact> = serde_json::from_value(list)
        .map_err(|e| malformed(ContractKind::Extraction, e.to_string()))?;
    Ok(raw_facts.into_iter().filter_map(RawFact::into_fact).collect())
}

fn parse_verdict(raw: &str) -> Result<ContradictionVerdict> {
    let response: VerdictResponse = parse_json(ContractKind::Contradiction, raw)?;
    match response.verdict.trim().to_ascii_lowercase().as_str() {
        "supersede" | "supersedes" | "contradict" | "contradicts" => {
            Ok(ContradictionVerdict::Supersede)
        }
        "equivalent" | "duplicate" | "same" => Ok(ContradictionVerdict::Equivalent),
        "unrelated" | "different" => Ok(ContradictionVerdict::Unrelated),
        other => Err(malformed(
            ContractKind::Contradiction,
            format!("unknown verdict '{other}'"),
        )),
    }
}

fn parse_rewrite(raw: &str) -> Result<String> {
    let body = json_body(raw);
    let query = if body.starts_with('{') {
        parse_json::<RewriteResponse>(ContractKind::Rewrite, body)?.query
    } else {
        body.to_string()
    };
    let query = query.trim().trim_matches('"').trim().to_string();
    if query.is_empty() {
        return Err(malformed(ContractKind::Rewrite, "empty query"));
    }
    Ok(query)
}

fn parse_summary(raw: &str) -> Result<String> {
    let summary = raw.trim();
    if summary.is_empty() {
        return Err(malformed(ContractKind::Summarization, "empty summary"));
    }
    Ok(summary.to_string())
}

fn parse_prediction(raw: &str) -> Result<String> {
    let prediction = raw.trim();
    if prediction.is_empty() {
        return Err(malformed(ContractKind::Prediction, "empty prediction"));
    }
    Ok(prediction.to_string())
}

fn parse_clusters(raw: &str) -> Result<ClusteringResponse> {
    parse_json(ContractKind::Clustering, raw)
}

fn parse_path(raw: &str) -> Result<Option<CategoryPath>> {
    let body = json_body(raw);
    if body.starts_with('{') {
        let response: PathResponse = parse_json(ContractKind::CategoryPath, body)?;
        return Ok(response.path.as_deref().and_then(CategoryPath::parse));
    }
    Ok(body
        .lines()
        .next()
        .map(|line| line.trim().trim_matches('"'))
        .and_then(CategoryPath::parse))
}

fn parse_reasoning(raw: &str) -> Result<ReasoningResponse> {
    let response: ReasoningResponse = parse_json(ContractKind::Reasoning, raw)?;
    if response.answer.trim().is_empty() {
        return Err(malformed(ContractKind::Reasoning, "empty answer"));
    }
    Ok(response)
}
