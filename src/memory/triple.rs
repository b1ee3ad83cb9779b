//! Entity facts as subject-predicate-object triples
//!
//! Triples are an optional precision layer over MemoryItems. Extraction
//! may attach them to a fact; retrieval uses them to confirm which items
//! are still current and to quote short entity statements. Predicates are
//! normalized so that synonyms ("loves", "enjoys") share one form.

use super::item::clamp_unit;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Synonym → canonical predicate
const PREDICATE_ALIASES: &[(&str, &str)] = &[
    ("loves", "likes"),
    ("enjoys", "likes"),
    ("adores", "likes"),
    ("prefers", "likes"),
    ("hates", "dislikes"),
    ("despises", "dislikes"),
    ("understands", "knows"),
    ("is_called", "is_named"),
    ("named", "is_named"),
    ("works_at", "employed_by"),
    ("lives_in", "resides_in"),
];

/// Predicate pairs that cannot both hold for the same subject and object
const OPPOSITES: &[(&str, &str)] = &[
    ("likes", "dislikes"),
    ("loves", "hates"),
    ("wants", "avoids"),
    ("prefers", "dislikes"),
    ("is", "is_not"),
    ("can", "cannot"),
];

/// Lowercase, snake_case and map synonyms to their canonical predicate.
pub fn normalize_predicate(predicate: &str) -> String {
    let snake = predicate
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    PREDICATE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == snake)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(snake)
}

/// A subject-predicate-object statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticTriple {
    pub id: Uuid,
    /// Item the triple was extracted with
    pub memory_item_id: Option<Uuid>,
    pub subject: String,
    /// Normalized predicate
    pub predicate: String,
    pub object: String,
    /// Qualifier such as a time or place
    pub context: Option<String>,
    pub importance: f32,
    pub confidence: f32,
    pub active: bool,
    /// Vector of the natural-language form
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl SemanticTriple {
    /// Build an active triple. Subject, predicate and object must be non-empty.
    pub fn new(
        subject: impl Into<String>,
        predicate: &str,
        object: impl Into<String>,
    ) -> Result<Self> {
        let subject = subject.into().trim().to_string();
        let object = object.into().trim().to_string();
        let predicate = normalize_predicate(predicate);
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            return Err(Error::Store(
                "triple needs a subject, predicate and object".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            memory_item_id: None,
            subject,
            predicate,
            object,
            context: None,
            importance: 0.5,
            confidence: 1.0,
            active: true,
            embedding: Vec::new(),
            created_at: now,
            last_accessed: now,
        })
    }

    pub fn with_item(mut self, item_id: Uuid) -> Self {
        self.memory_item_id = Some(item_id);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        if !context.trim().is_empty() {
            self.context = Some(context.trim().to_string());
        }
        self
    }

    pub fn with_scores(mut self, importance: f32, confidence: f32) -> Self {
        self.importance = clamp_unit(importance);
        self.confidence = clamp_unit(confidence);
        self
    }

    /// "User likes Python (since 2020)"
    pub fn to_natural_language(&self) -> String {
        let mut text = format!(
            "{} {} {}",
            self.subject,
            self.predicate.replace('_', " "),
            self.object
        );
        if let Some(context) = &self.context {
            text.push_str(&format!(" ({context})"));
        }
        text
    }

    /// Same subject and object with contradicting predicates
    pub fn is_opposite_of(&self, other: &SemanticTriple) -> bool {
        if !self.subject.eq_ignore_ascii_case(&other.subject)
            || !self.object.eq_ignore_ascii_case(&other.object)
        {
            return false;
        }
        let (a, b) = (self.predicate.as_str(), other.predicate.as_str());
        OPPOSITES
            .iter()
            .any(|(x, y)| (a == *x && b == *y) || (a == *y && b == *x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_predicate() {
        assert_eq!(normalize_predicate("Loves"), "likes");
        assert_eq!(normalize_predicate(" works at "), "employed_by");
        assert_eq!(normalize_predicate("Lives In"), "resides_in");
        assert_eq!(normalize_predicate("is allergic to"), "is_allergic_to");
    }

    #[test]
    fn test_natural_language() {
        let triple = SemanticTriple::new("User", "works at", "Acme")
            .unwrap()
            .with_context("since 2021");
        assert_eq!(triple.to_natural_language(), "User employed by Acme (since 2021)");

        let bare = SemanticTriple::new("User", "likes", "Python").unwrap();
        assert_eq!(bare.to_natural_language(), "User likes Python");
    }

    #[test]
    fn test_opposites() {
        let likes = SemanticTriple::new("User", "enjoys", "sushi").unwrap();
        let dislikes = SemanticTriple::new("user", "hates", "Sushi").unwrap();
        let other = SemanticTriple::new("User", "dislikes", "pizza").unwrap();
        assert!(likes.is_opposite_of(&dislikes));
        assert!(dislikes.is_opposite_of(&likes));
        assert!(!likes.is_opposite_of(&other));

        let can = SemanticTriple::new("User", "can", "swim").unwrap();
        let cannot = SemanticTriple::new("User", "cannot", "swim").unwrap();
        assert!(can.is_opposite_of(&cannot));
    }

    #[test]
    fn test_rejects_empty_parts() {
        assert!(SemanticTriple::new("User", "  ", "Python").is_err());
        assert!(SemanticTriple::new("", "likes", "Python").is_err());
    }

    #[test]
    fn test_scores_clamped() {
        let triple = SemanticTriple::new("User", "likes", "tea")
            .unwrap()
            .with_scores(1.7, -0.2);
        assert_eq!(triple.importance, 1.0);
        assert_eq!(triple.confidence, 0.0);
    }
}
