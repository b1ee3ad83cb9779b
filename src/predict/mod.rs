//! Proactive context prediction
//!
//! Guesses what the user will need next from recent memory activity and
//! the caller's current situation, then renders a block meant for
//! system-prompt injection:
//!
//! ```text
//! [Predicted Intent] The user will likely continue the Rust parser work.
//! [Current Time] 2026-10-19 09:30
//! [Relevant Memories]
//!   - Learning Rust
//!   - Prefers Python for scripting
//! ```
//!
//! Prediction reads the store but never writes to it.

use crate::capability::Contracts;
use crate::config::PredictionConfig;
use crate::error::Result;
use crate::memory::{FactStore, MemoryItem, MemoryKind};
use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What the caller knows about the user's current situation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionContext {
    /// Local wall-clock time
    pub at: NaiveDateTime,
    #[serde(default)]
    pub open_apps: Vec<String>,
    #[serde(default)]
    pub recent_files: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl PredictionContext {
    /// Context stamped with the current local time
    pub fn now() -> Self {
        Self::at(Local::now().naive_local())
    }

    pub fn at(at: NaiveDateTime) -> Self {
        Self {
            at,
            open_apps: Vec::new(),
            recent_files: Vec::new(),
            location: None,
        }
    }

    pub fn with_apps(mut self, apps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.open_apps.extend(apps.into_iter().map(Into::into));
        self
    }

    pub fn with_files(mut self, files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.recent_files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "time": self.at.format("%Y-%m-%d %H:%M").to_string(),
            "open_apps": self.open_apps,
            "recent_files": self.recent_files,
            "location": self.location,
        })
    }
}

/// A rendered prediction
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub intent: String,
    /// Behavioural patterns sent with the request
    pub patterns: Vec<String>,
    /// Memories preloaded from the active categories
    pub memories: Vec<String>,
    /// Injection block
    pub context: String,
}

pub struct PredictionEngine {
    store: Arc<FactStore>,
    contracts: Arc<Contracts>,
    config: PredictionConfig,
}

impl PredictionEngine {
    pub fn new(store: Arc<FactStore>, contracts: Arc<Contracts>, config: PredictionConfig) -> Self {
        Self {
            store,
            contracts,
            config,
        }
    }

    pub async fn predict(
        &self,
        context: &PredictionContext,
        cancel: Option<&CancellationToken>,
    ) -> Result<Prediction> {
        let recent = self.store.recent_items(self.config.recent_items).await;
        let mut activity = Vec::with_capacity(recent.len());
        for item in &recent {
            let root = match self.store.category(&item.category_id).await {
                Some(category) => category.path.as_str().split('/').next().unwrap_or("other").to_string(),
                None => "other".to_string(),
            };
            activity.push((item.kind, root));
        }
        let patterns = extract_patterns(context, &activity);

        let intent = self
            .contracts
            .predict_intent(&context.to_json(), &patterns, cancel)
            .await?;
        let memories = self.preload(&recent).await;
        let rendered = render(&intent, context.at, &memories, &self.config);

        tracing::info!(
            recent = recent.len(),
            patterns = patterns.len(),
            memories = memories.len(),
            "Predicted next intent"
        );
        Ok(Prediction {
            intent,
            patterns,
            memories,
            context: rendered,
        })
    }

    /// Newest items of the categories the recent items live in
    async fn preload(&self, recent: &[MemoryItem]) -> Vec<String> {
        let mut categories: Vec<Uuid> = Vec::new();
        for item in recent {
            if !categories.contains(&item.category_id) {
                categories.push(item.category_id);
            }
        }

        let mut memories = Vec::new();
        for category_id in categories.iter().take(self.config.preload_categories) {
            let items = self.store.active_items_in_category(category_id).await;
            memories.extend(
                items
                    .iter()
                    .rev()
                    .take(self.config.items_per_category)
                    .map(|i| i.content.clone()),
            );
        }
        memories
    }
}

/// Patterns from the time of day, the dominant recent activity and the
/// open applications. `activity` pairs each recent item's kind with the
/// root of its category path.
pub fn extract_patterns(context: &PredictionContext, activity: &[(MemoryKind, String)]) -> Vec<String> {
    let mut patterns = vec![match context.at.hour() {
        6..=11 => "Morning work session",
        12..=17 => "Afternoon work session",
        18..=21 => "Evening session",
        _ => "Late night session",
    }
    .to_string()];

    if let Some(root) = dominant(activity.iter().map(|(_, root)| root.as_str())) {
        patterns.push(format!("Currently focused on: {root}"));
    }
    if let Some(kind) = dominant(activity.iter().map(|(kind, _)| kind.as_str())) {
        patterns.push(format!("Recent activity type: {kind}"));
    }

    let apps = context.open_apps.join(" ").to_lowercase();
    if apps.contains("code") {
        patterns.push("User appears to be coding".to_string());
    }
    if apps.contains("browser") {
        patterns.push("User is browsing".to_string());
    }
    patterns
}

/// Most frequent value; ties go to the one seen first
fn dominant<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

fn render(intent: &str, at: NaiveDateTime, memories: &[String], config: &PredictionConfig) -> String {
    let mut lines = vec![
        format!("[Predicted Intent] {intent}"),
        format!("[Current Time] {}", at.format("%Y-%m-%d %H:%M")),
    ];
    if !memories.is_empty() {
        lines.push("[Relevant Memories]".to_string());
        for memory in memories.iter().take(config.memory_lines) {
            lines.push(format!("  - {}", clip(memory, config.memory_line_chars)));
        }
    }
    lines.join("\n")
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ContractKind;
    use crate::config::CapabilityConfig;
    use crate::memory::{CategoryPath, MemoryItemBuilder};
    use crate::testing::ScriptedCompletion;
    use chrono::NaiveDate;

    fn morning() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    struct Harness {
        store: Arc<FactStore>,
        completion: Arc<ScriptedCompletion>,
        engine: PredictionEngine,
    }

    fn harness(completion: ScriptedCompletion) -> Harness {
        let config = CapabilityConfig {
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            ..CapabilityConfig::default()
        };
        let store = Arc::new(FactStore::new());
        let completion = Arc::new(completion);
        let engine = PredictionEngine::new(
            store.clone(),
            Arc::new(Contracts::new(completion.clone(), &config)),
            PredictionConfig::default(),
        );
        Harness {
            store,
            completion,
            engine,
        }
    }

    impl Harness {
        async fn remember(&self, path: &str, kind: MemoryKind, content: &str) -> MemoryItem {
            let category = self
                .store
                .ensure_category_path(&CategoryPath::parse(path).unwrap())
                .await
                .unwrap()
                .category;
            let item = MemoryItemBuilder::new(kind)
                .category(category.id)
                .content(content)
                .embedding(vec![1.0])
                .build()
                .unwrap();
            self.store.insert_item(item.clone()).await.unwrap();
            item
        }
    }

    #[test]
    fn test_patterns_from_time_activity_and_apps() {
        let context = PredictionContext::at(morning()).with_apps(["VSCode", "Firefox browser"]);
        let activity = vec![
            (MemoryKind::Fact, "knowledge".to_string()),
            (MemoryKind::Plan, "projects".to_string()),
            (MemoryKind::Plan, "projects".to_string()),
        ];
        assert_eq!(
            extract_patterns(&context, &activity),
            vec![
                "Morning work session",
                "Currently focused on: projects",
                "Recent activity type: plan",
                "User appears to be coding",
                "User is browsing",
            ]
        );

        let late = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(23, 5, 0)
            .unwrap();
        assert_eq!(
            extract_patterns(&PredictionContext::at(late), &[]),
            vec!["Late night session"]
        );
    }

    #[test]
    fn test_dominant_ties_keep_first_seen() {
        assert_eq!(dominant(["a", "b", "b", "a"].into_iter()), Some("a"));
        assert_eq!(dominant(std::iter::empty()), None);
    }

    #[test]
    fn test_clip_counts_chars() {
        assert_eq!(clip("short", 100), "short");
        assert_eq!(clip("서울에 산다", 3), "서울에...");
    }

    #[tokio::test]
    async fn test_predict_renders_injection_block() {
        let h = harness(ScriptedCompletion::new().respond(
            ContractKind::Prediction,
            "Currently focused on: knowledge",
            "The user will likely continue the Rust parser work.",
        ));
        h.remember("knowledge/coding", MemoryKind::Fact, "Learning Rust").await;
        let long = "x".repeat(150);
        h.remember("knowledge/coding", MemoryKind::Fact, &long).await;
        h.remember("personal/home", MemoryKind::Fact, "Lives in Seoul").await;

        let context = PredictionContext::at(morning())
            .with_apps(["code"])
            .with_files(["parser.rs"])
            .with_location("home");
        let prediction = h.engine.predict(&context, None).await.unwrap();

        assert_eq!(
            prediction.intent,
            "The user will likely continue the Rust parser work."
        );
        assert!(prediction.patterns.contains(&"User appears to be coding".to_string()));
        assert_eq!(prediction.memories.len(), 3);

        let lines: Vec<&str> = prediction.context.lines().collect();
        assert_eq!(
            lines[0],
            "[Predicted Intent] The user will likely continue the Rust parser work."
        );
        assert_eq!(lines[1], "[Current Time] 2026-10-19 09:30");
        assert_eq!(lines[2], "[Relevant Memories]");
        assert!(lines.contains(&"  - Learning Rust"));
        assert!(lines.contains(&format!("  - {}...", "x".repeat(100)).as_str()));

        let prompt = &h.completion.calls()[0].prompt;
        assert!(prompt.contains("\"recent_files\""));
        assert!(prompt.contains("parser.rs"));
    }

    #[tokio::test]
    async fn test_predict_with_empty_store() {
        let h = harness(ScriptedCompletion::new().respond(
            ContractKind::Prediction,
            "",
            "Nothing to go on yet.",
        ));
        let prediction = h
            .engine
            .predict(&PredictionContext::at(morning()), None)
            .await
            .unwrap();
        assert_eq!(prediction.patterns, vec!["Morning work session".to_string()]);
        assert!(prediction.memories.is_empty());
        assert_eq!(prediction.context.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_prediction_failure_is_returned() {
        let h = harness(ScriptedCompletion::new().fail(ContractKind::Prediction, false));
        assert!(h
            .engine
            .predict(&PredictionContext::at(morning()), None)
            .await
            .is_err());
    }
}
