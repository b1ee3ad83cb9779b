//! Mnemos - Eternal fact memory for conversational agents
//!
//! Mnemos turns raw conversation text into durable, categorized facts and
//! answers questions about them with hybrid retrieval. Memory is never
//! deleted: a fact that changes is superseded by its successor and stays
//! reachable by id.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           MemoryEngine                               │
//! │  ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────────┐ │
//! │  │    Ingestion     │ │    Retrieval     │ │    Consolidation     │ │
//! │  │  - extract facts │ │  - query rewrite │ │  - stale scan        │ │
//! │  │  - assign path   │ │  - vector + kw   │ │  - summaries         │ │
//! │  │  - supersede     │ │  - RRF + scoring │ │  - category split    │ │
//! │  └────────┬─────────┘ └────────┬─────────┘ └──────────┬───────────┘ │
//! │           └────────────────────┼──────────────────────┘             │
//! │                                │                                     │
//! │  ┌─────────────────────────────▼─────────────────────────────────┐  │
//! │  │                Fact Store (source of truth)                    │  │
//! │  │     Resources ──▶ MemoryItems ──▶ Categories (path tree)       │  │
//! │  └──────────┬───────────────────────────────────────┬────────────┘  │
//! │             │ projection                            │ projection    │
//! │  ┌──────────▼───────────┐               ┌───────────▼────────────┐  │
//! │  │     Vector Index     │               │    Markdown Mirror     │  │
//! │  │  vectors + keywords  │               │  categories, timeline  │  │
//! │  └──────────────────────┘               └────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                  │
//!                    Completion / Embedding capabilities
//! ```
//!
//! ## Modules
//!
//! - [`memory`]: Fact store, resources, items and the category tree
//! - [`capability`]: Completion and embedding contracts with retry policy
//! - [`index`]: In-memory vector and keyword index
//! - [`mirror`]: Markdown vault mirror
//! - [`ingest`]: Ingestion pipeline and category assignment
//! - [`retrieve`]: Fast and deep retrieval with rank fusion
//! - [`consolidate`]: Background summaries and category splits
//! - [`predict`]: Next-intent prediction for prompt injection
//! - [`session`]: Conversation buffer with flush boundary
//! - [`engine`]: Facade wiring everything together
//! - [`config`]: Configuration management

pub mod capability;
pub mod config;
pub mod consolidate;
pub mod engine;
pub mod error;
pub mod index;
pub mod ingest;
pub mod memory;
pub mod mirror;
pub mod predict;
pub mod retrieve;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::MemoryConfig;
pub use engine::{MemoryEngine, MemoryEngineBuilder};
pub use error::{Error, Result};
pub use predict::{Prediction, PredictionContext};
pub use retrieve::{RetrievalMode, RetrievalQuery, RetrievalResult};
pub use session::{Role, SessionContext};
