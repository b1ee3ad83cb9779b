//! Conversation session buffer
//!
//! Messages accumulate in a `SessionContext` owned by the caller. Once the
//! estimated token count reaches the flush threshold, the engine drains the
//! buffer and ingests the transcript. A failed flush puts the messages back.

use crate::config::SessionConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A buffered conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Render messages as a role-prefixed transcript
pub fn render_transcript(messages: &[SessionMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Explicit conversation buffer with a token-count flush boundary
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Session ID
    pub id: String,
    messages: Vec<SessionMessage>,
    config: SessionConfig,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            config,
            created_at: Utc::now(),
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(SessionMessage {
            role,
            content: content.into(),
            at: Utc::now(),
        });
    }

    pub fn messages(&self) -> &[SessionMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Character count divided by the configured characters per token
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        chars / self.config.chars_per_token.max(1)
    }

    pub fn should_flush(&self) -> bool {
        !self.messages.is_empty() && self.estimated_tokens() >= self.config.flush_threshold_tokens
    }

    /// Transcript of the last `n` messages, for query evolution
    pub fn recent_context(&self, n: usize) -> String {
        let start = self.messages.len().saturating_sub(n);
        render_transcript(&self.messages[start..])
    }

    /// Transcript of the configured number of recent messages
    pub fn default_context(&self) -> String {
        self.recent_context(self.config.recent_context_messages)
    }

    /// Drain the buffer at the flush boundary
    pub fn take_transcript(&mut self) -> Vec<SessionMessage> {
        std::mem::take(&mut self.messages)
    }

    /// Put drained messages back ahead of anything pushed since
    pub fn restore(&mut self, mut drained: Vec<SessionMessage>) {
        drained.append(&mut self.messages);
        self.messages = drained;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(threshold: usize) -> SessionContext {
        SessionContext::new(SessionConfig {
            flush_threshold_tokens: threshold,
            chars_per_token: 2,
            recent_context_messages: 2,
        })
    }

    #[test]
    fn test_token_estimate_and_threshold() {
        let mut s = session(5);
        assert!(!s.should_flush());
        s.push(Role::User, "abcdef");
        assert_eq!(s.estimated_tokens(), 3);
        assert!(!s.should_flush());
        s.push(Role::Assistant, "ghij");
        assert_eq!(s.estimated_tokens(), 5);
        assert!(s.should_flush());
    }

    #[test]
    fn test_recent_context_is_role_prefixed() {
        let mut s = session(100);
        s.push(Role::User, "I moved to Seoul");
        s.push(Role::Assistant, "Nice!");
        s.push(Role::User, "where is that city?");
        assert_eq!(
            s.default_context(),
            "ASSISTANT: Nice!\nUSER: where is that city?"
        );
        assert_eq!(s.recent_context(10).lines().count(), 3);
        assert_eq!(s.recent_context(0), "");
    }

    #[test]
    fn test_take_and_restore() {
        let mut s = session(1);
        s.push(Role::User, "first");
        s.push(Role::User, "second");
        let drained = s.take_transcript();
        assert!(s.is_empty());
        assert_eq!(render_transcript(&drained), "USER: first\nUSER: second");

        s.push(Role::User, "third");
        s.restore(drained);
        let contents: Vec<&str> = s.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }
}
