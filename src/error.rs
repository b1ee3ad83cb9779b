//! Mnemos error types

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Mnemos error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Completion or embedding capability failed
    #[error("Capability error in {operation}: {message}")]
    Capability {
        /// Operation that failed (e.g. "extraction", "embedding")
        operation: String,
        /// Provider-supplied failure description
        message: String,
        /// Whether a retry may succeed
        transient: bool,
    },

    /// Capability call exceeded its deadline
    #[error("Capability call {operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Deadline that was applied
        after: Duration,
    },

    /// Structured output could not be parsed for a contract
    #[error("Malformed output from {contract} contract: {message}")]
    MalformedOutput {
        /// Contract name
        contract: String,
        /// Parse failure
        message: String,
    },

    /// Fact store error
    #[error("Store error: {0}")]
    Store(String),

    /// Vector/keyword index error
    #[error("Index error: {0}")]
    Index(String),

    /// Category path already exists under a different parent
    #[error("Category path '{path}' conflicts with existing lineage (existing parent {existing_parent:?}, requested {requested_parent:?})")]
    NamingConflict {
        /// Conflicting path
        path: String,
        /// Parent of the category already stored at `path`
        existing_parent: Option<Uuid>,
        /// Parent requested by the caller
        requested_parent: Option<Uuid>,
    },

    /// The fact store accepted the item but the index write failed
    #[error("Partial commit for item {item_id}: {source}")]
    PartialCommit {
        /// Item written to the fact store
        item_id: Uuid,
        /// Index failure
        #[source]
        source: Box<Error>,
    },

    /// Document mirror error
    #[error("Mirror error: {0}")]
    Mirror(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML config parse error
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Whether the retry policy should attempt the call again.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Capability { transient, .. } => *transient,
            Error::Timeout { .. } | Error::MalformedOutput { .. } => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Shorthand for a capability failure.
    pub fn capability(
        operation: impl Into<String>,
        message: impl Into<String>,
        transient: bool,
    ) -> Self {
        Error::Capability {
            operation: operation.into(),
            message: message.into(),
            transient,
        }
    }
}

/// Result type alias for Mnemos operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::capability("embedding", "503", true).is_transient());
        assert!(!Error::capability("embedding", "401", false).is_transient());
        assert!(Error::Timeout {
            operation: "extraction".to_string(),
            after: Duration::from_secs(1),
        }
        .is_transient());
        assert!(Error::MalformedOutput {
            contract: "extraction".to_string(),
            message: "expected array".to_string(),
        }
        .is_transient());
        assert!(!Error::NamingConflict {
            path: "a/b".to_string(),
            existing_parent: None,
            requested_parent: Some(Uuid::new_v4()),
        }
        .is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_partial_commit_display() {
        let id = Uuid::new_v4();
        let err = Error::PartialCommit {
            item_id: id,
            source: Box::new(Error::Index("offline".to_string())),
        };
        let text = err.to_string();
        assert!(text.contains(&id.to_string()));
        assert!(text.contains("offline"));
    }
}
