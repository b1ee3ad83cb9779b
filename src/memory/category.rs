//! Self-organizing category hierarchy
//!
//! Categories form a tree addressed by slash-delimited paths. The tree is
//! stored as an arena keyed by id: a category only knows its parent, and
//! children are discovered through the store's parent index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A normalized, slash-delimited category path such as `knowledge/coding/rust`.
///
/// Segments are lowercase and limited to `[a-z0-9_-]`; any other character
/// becomes `-`. Empty segments are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CategoryPath(String);

impl CategoryPath {
    /// Normalize `raw` into a path, or `None` if nothing usable remains.
    pub fn parse(raw: &str) -> Option<Self> {
        let segments: Vec<String> = raw
            .split(['/', '\\'])
            .map(normalize_segment)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            None
        } else {
            Some(Self(segments.join("/")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Path of the parent, `None` for a root category
    pub fn parent(&self) -> Option<CategoryPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| CategoryPath(parent.to_string()))
    }

    /// Child path under this one
    pub fn child(&self, name: &str) -> Option<CategoryPath> {
        let segment = normalize_segment(name);
        if segment.is_empty() {
            None
        } else {
            Some(CategoryPath(format!("{}/{}", self.0, segment)))
        }
    }

    /// Every prefix from the root down to and including this path
    pub fn ancestors(&self) -> Vec<CategoryPath> {
        let mut out = Vec::new();
        let mut current = String::new();
        for segment in self.0.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            out.push(CategoryPath(current.clone()));
        }
        out
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.0.split('/').count()
    }

    /// Words of the path, used as the text to embed for the category vector
    pub fn embedding_text(&self) -> String {
        self.0.replace(['/', '-', '_'], " ")
    }
}

fn normalize_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = false;
    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

impl fmt::Display for CategoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CategoryPath {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        CategoryPath::parse(&value).ok_or_else(|| format!("invalid category path '{value}'"))
    }
}

impl From<CategoryPath> for String {
    fn from(path: CategoryPath) -> Self {
        path.0
    }
}

/// A node in the topic hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Unique category identifier
    pub id: Uuid,
    /// Human name (last path segment unless renamed)
    pub name: String,
    /// Globally unique hierarchical path
    pub path: CategoryPath,
    /// Parent category, `None` for roots
    pub parent_id: Option<Uuid>,
    /// Generated summary of member items
    pub summary: Option<String>,
    /// When the summary was last refreshed
    pub summarized_at: Option<DateTime<Utc>>,
    /// Vector projected into the index
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last time the category was read by retrieval
    pub last_accessed: DateTime<Utc>,
}

impl Category {
    /// Create a category at `path` under `parent_id`.
    pub fn new(path: CategoryPath, parent_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: path.name().to_string(),
            path,
            parent_id,
            summary: None,
            summarized_at: None,
            embedding: None,
            created_at: now,
            last_accessed: now,
        }
    }
}
