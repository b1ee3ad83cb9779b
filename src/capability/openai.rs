//! OpenAI-compatible completion and embedding provider
//!
//! Works against any endpoint that speaks `/chat/completions` and
//! `/embeddings` (OpenAI, OpenRouter, Ollama, vLLM). Retrying is left to
//! `CallPolicy`; this client only classifies failures: 429 and 5xx are
//! transient, other non-success statuses are permanent.

use super::{CompletionRequest, CompletionService, ContractKind, EmbeddingService};
use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const SYSTEM_PROMPT: &str =
    "You maintain a long-term memory of facts about the user. Follow the output format exactly.";

/// Whether an HTTP status is worth retrying
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// HTTP client for an OpenAI-compatible API
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embedding_model: String,
    dimension: usize,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            dimension: config.dimension,
        }
    }

    fn temperature(contract: ContractKind) -> f32 {
        match contract {
            ContractKind::Reasoning => 0.5,
            ContractKind::CategoryPath | ContractKind::Contradiction => 0.1,
            ContractKind::Prediction => 0.4,
            _ => 0.3,
        }
    }

    fn chat_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.chat_model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": Self::temperature(request.contract),
        });
        if request.response_schema.is_some() {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    async fn post(&self, operation: &str, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            tracing::debug!(operation, status = status.as_u16(), "Provider returned an error");
            return Err(Error::capability(
                operation,
                format!("API error {}: {}", status.as_u16(), snippet),
                is_retryable_status(status.as_u16()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionService for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = self.chat_body(request);
        let operation = request.contract.as_str();
        let response: ChatResponse = self
            .post(operation, "/chat/completions", &body)
            .await?
            .json()
            .await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::capability(operation, "response had no content", true))
    }
}

#[async_trait]
impl EmbeddingService for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::capability("embedding", "response had no vectors", true))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({
            "model": self.embedding_model,
            "input": texts,
        });
        let mut response: EmbeddingResponse = self
            .post("embedding", "/embeddings", &body)
            .await?
            .json()
            .await?;
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn test_chat_body_requests_json_for_structured_contracts() {
        let provider = OpenAiProvider::new(&ProviderConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..ProviderConfig::default()
        });
        assert_eq!(provider.base_url, "http://localhost:11434/v1");

        let structured = CompletionRequest {
            contract: ContractKind::Extraction,
            prompt: "extract".to_string(),
            response_schema: Some(json!({"type": "object"})),
        };
        let body = provider.chat_body(&structured);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][1]["content"], "extract");

        let free = CompletionRequest {
            contract: ContractKind::Summarization,
            prompt: "summarize".to_string(),
            response_schema: None,
        };
        assert!(provider.chat_body(&free).get("response_format").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let chat: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "{\"facts\": []}"}}]}"#,
        )
        .unwrap();
        assert_eq!(chat.choices[0].message.content.as_deref(), Some("{\"facts\": []}"));

        let mut embeddings: EmbeddingResponse = serde_json::from_str(
            r#"{"data": [{"index": 1, "embedding": [0.5]}, {"index": 0, "embedding": [0.25]}]}"#,
        )
        .unwrap();
        embeddings.data.sort_by_key(|d| d.index);
        assert_eq!(embeddings.data[0].embedding, vec![0.25]);
    }
}
