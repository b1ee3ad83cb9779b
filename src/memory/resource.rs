//! Raw input records
//!
//! A Resource is the immutable provenance record of one ingested input:
//! a conversation turn, a document, a URL snapshot or a flushed session
//! transcript. Resources are created once per ingestion that yields at
//! least one fact and are never mutated afterwards.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// An immutable record of raw input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique resource identifier
    pub id: Uuid,
    /// Origin locator (file path, URL, or `conversation/<timestamp>`)
    pub uri: String,
    /// Kind of content
    pub kind: ContentKind,
    /// Full text, if retained
    pub content: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Arbitrary metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Content kind of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Conversational text
    #[default]
    Conversation,
    /// Free-form text
    Text,
    /// Document file
    Document,
    /// Snapshot of a web page
    Url,
    /// Transcript drained from a session buffer
    SessionFlush,
}

impl ContentKind {
    /// Parse a metadata tag, falling back to `Conversation`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "text" => ContentKind::Text,
            "document" | "doc" | "file" => ContentKind::Document,
            "url" | "web" => ContentKind::Url,
            "session_flush" => ContentKind::SessionFlush,
            _ => ContentKind::Conversation,
        }
    }
}

/// Builder for constructing `Resource` instances
pub struct ResourceBuilder {
    uri: Option<String>,
    kind: ContentKind,
    content: Option<String>,
    metadata: HashMap<String, serde_json::Value>,
}

impl ResourceBuilder {
    /// Create a new builder with the required content kind
    pub fn new(kind: ContentKind) -> Self {
        Self {
            uri: None,
            kind,
            content: None,
            metadata: HashMap::new(),
        }
    }

    /// Build from ingestion metadata: `uri` and `modality` keys are
    /// honoured, everything is kept as resource metadata.
    pub fn from_metadata(metadata: &HashMap<String, serde_json::Value>) -> Self {
        let kind = metadata
            .get("modality")
            .and_then(|v| v.as_str())
            .map(ContentKind::from_tag)
            .unwrap_or_default();
        let mut builder = Self::new(kind);
        if let Some(uri) = metadata.get("uri").and_then(|v| v.as_str()) {
            builder = builder.uri(uri);
        }
        for (key, value) in metadata {
            builder = builder.metadata(key.clone(), value.clone());
        }
        builder
    }

    /// Set the origin locator
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the text content
    pub fn content(mut self, text: impl Into<String>) -> Self {
        self.content = Some(text.into());
        self
    }

    /// Add a metadata entry
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Build the resource. A missing locator defaults to a
    /// timestamped `conversation/` URI.
    pub fn build(self) -> Result<Resource> {
        let created_at = Utc::now();
        let uri = match self.uri {
            Some(uri) if uri.trim().is_empty() => {
                return Err(Error::Store("resource uri must not be blank".to_string()))
            }
            Some(uri) => uri,
            None => format!("conversation/{}", created_at.to_rfc3339()),
        };

        Ok(Resource {
            id: Uuid::new_v4(),
            uri,
            kind: self.kind,
            content: self.content,
            created_at,
            metadata: self.metadata,
        })
    }
}
