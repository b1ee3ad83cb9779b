//! Extracted facts
//!
//! A MemoryItem is one fact distilled from a Resource. Items are never
//! deleted: a contradicted item is deactivated and linked to its
//! replacement, a repeated item is reinforced, and every retrieval hit
//! refreshes `last_accessed`.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An extracted fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique item identifier
    pub id: Uuid,
    /// Owning category
    pub category_id: Uuid,
    /// Resource the fact was extracted from
    pub source_resource_id: Option<Uuid>,
    /// The fact itself
    pub content: String,
    /// Vector representation of `content`
    pub embedding: Vec<f32>,
    /// Semantic kind
    pub kind: MemoryKind,
    /// Salience score (0.0–1.0)
    pub importance: f32,
    /// Extraction confidence (0.0–1.0)
    pub confidence: f32,
    /// Times the fact has been observed (≥ 1)
    pub mention_count: u32,
    /// Inactive items are kept as supersede history only
    pub active: bool,
    /// Item that replaced this one
    pub superseded_by: Option<Uuid>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last content-affecting change (create, reinforce, deactivate, reassign)
    pub updated_at: DateTime<Utc>,
    /// Last retrieval hit
    pub last_accessed: DateTime<Utc>,
}

impl MemoryItem {
    /// Hours elapsed since the last access, never negative.
    pub fn hours_since_access(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (now - self.last_accessed).num_milliseconds() as f64 / 1000.0;
        (seconds / 3600.0).max(0.0)
    }
}

/// Semantic kind of a memory item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A statement about the world or the user
    #[default]
    Fact,
    /// A like, dislike or choice
    Preference,
    /// Something that happened
    Event,
    /// Something intended
    Plan,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Fact => "fact",
            MemoryKind::Preference => "preference",
            MemoryKind::Event => "event",
            MemoryKind::Plan => "plan",
        }
    }

    /// Parse a model-supplied tag, falling back to `Fact`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "preference" | "preferences" | "like" | "dislike" => MemoryKind::Preference,
            "event" | "events" => MemoryKind::Event,
            "plan" | "plans" | "goal" | "goals" | "intention" => MemoryKind::Plan,
            _ => MemoryKind::Fact,
        }
    }
}

/// Builder for constructing `MemoryItem` instances
pub struct MemoryItemBuilder {
    id: Uuid,
    kind: MemoryKind,
    category_id: Option<Uuid>,
    source_resource_id: Option<Uuid>,
    content: Option<String>,
    embedding: Vec<f32>,
    importance: f32,
    confidence: f32,
}

impl MemoryItemBuilder {
    /// Create a new builder with the required kind
    pub fn new(kind: MemoryKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            category_id: None,
            source_resource_id: None,
            content: None,
            embedding: Vec::new(),
            importance: 0.5,
            confidence: 1.0,
        }
    }

    /// Use a pre-allocated identifier
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Set the owning category
    pub fn category(mut self, id: Uuid) -> Self {
        self.category_id = Some(id);
        self
    }

    /// Set the source resource
    pub fn source_resource(mut self, id: Uuid) -> Self {
        self.source_resource_id = Some(id);
        self
    }

    /// Set the fact content
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set the vector representation
    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Set the importance score (clamped to 0.0–1.0)
    pub fn importance(mut self, score: f32) -> Self {
        self.importance = clamp_unit(score);
        self
    }

    /// Set the confidence score (clamped to 0.0–1.0)
    pub fn confidence(mut self, score: f32) -> Self {
        self.confidence = clamp_unit(score);
        self
    }

    /// Build the item, returning an error if content or category is missing
    pub fn build(self) -> Result<MemoryItem> {
        let content = self
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Store("memory item content is required".to_string()))?;
        let category_id = self
            .category_id
            .ok_or_else(|| Error::Store("memory item category is required".to_string()))?;

        let now = Utc::now();
        Ok(MemoryItem {
            id: self.id,
            category_id,
            source_resource_id: self.source_resource_id,
            content,
            embedding: self.embedding,
            kind: self.kind,
            importance: self.importance,
            confidence: self.confidence,
            mention_count: 1,
            active: true,
            superseded_by: None,
            created_at: now,
            updated_at: now,
            last_accessed: now,
        })
    }
}

/// Clamp to [0, 1], mapping NaN to 0.
pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_builder() {
        let category = Uuid::new_v4();
        let resource = Uuid::new_v4();
        let item = MemoryItemBuilder::new(MemoryKind::Preference)
            .category(category)
            .source_resource(resource)
            .content("  User prefers TypeScript  ")
            .embedding(vec![1.0, 0.0])
            .importance(0.8)
            .confidence(0.9)
            .build()
            .unwrap();

        assert_eq!(item.content, "User prefers TypeScript");
        assert_eq!(item.category_id, category);
        assert_eq!(item.source_resource_id, Some(resource));
        assert_eq!(item.kind, MemoryKind::Preference);
        assert_eq!(item.mention_count, 1);
        assert!(item.active);
        assert!(item.superseded_by.is_none());
        assert_eq!(item.created_at, item.updated_at);
    }

    #[test]
    fn test_scores_clamped() {
        let item = MemoryItemBuilder::new(MemoryKind::Fact)
            .category(Uuid::new_v4())
            .content("x")
            .importance(1.7)
            .confidence(f32::NAN)
            .build()
            .unwrap();
        assert!((item.importance - 1.0).abs() < f32::EPSILON);
        assert_eq!(item.confidence, 0.0);

        let item = MemoryItemBuilder::new(MemoryKind::Fact)
            .category(Uuid::new_v4())
            .content("x")
            .importance(-0.2)
            .build()
            .unwrap();
        assert_eq!(item.importance, 0.0);
    }

    #[test]
    fn test_missing_content_or_category() {
        assert!(MemoryItemBuilder::new(MemoryKind::Fact)
            .category(Uuid::new_v4())
            .content("   ")
            .build()
            .is_err());
        assert!(MemoryItemBuilder::new(MemoryKind::Fact)
            .content("fact")
            .build()
            .is_err());
    }

    #[test]
    fn test_preallocated_id() {
        let id = Uuid::new_v4();
        let item = MemoryItemBuilder::new(MemoryKind::Plan)
            .id(id)
            .category(Uuid::new_v4())
            .content("visit Busan")
            .build()
            .unwrap();
        assert_eq!(item.id, id);
    }

    #[test]
    fn test_hours_since_access() {
        let mut item = MemoryItemBuilder::new(MemoryKind::Event)
            .category(Uuid::new_v4())
            .content("ran a marathon")
            .build()
            .unwrap();
        let now = Utc::now();
        item.last_accessed = now - chrono::Duration::hours(24);
        assert!((item.hours_since_access(now) - 24.0).abs() < 1e-6);

        item.last_accessed = now + chrono::Duration::hours(1);
        assert_eq!(item.hours_since_access(now), 0.0);
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(serde_json::to_string(&MemoryKind::Plan).unwrap(), "\"plan\"");
        let kind: MemoryKind = serde_json::from_str("\"preference\"").unwrap();
        assert_eq!(kind, MemoryKind::Preference);
    }

    #[test]
    fn test_kind_from_tag() {
        assert_eq!(MemoryKind::from_tag(" Goal "), MemoryKind::Plan);
        assert_eq!(MemoryKind::from_tag("preference"), MemoryKind::Preference);
        assert_eq!(MemoryKind::from_tag("event"), MemoryKind::Event);
        assert_eq!(MemoryKind::from_tag("trivia"), MemoryKind::Fact);
    }
}
