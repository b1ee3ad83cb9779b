//! Memory system: three-layer fact hierarchy
//!
//! Layer 1 (Resource): immutable raw input kept for provenance.
//! Layer 2 (Category): self-organizing topic tree with summaries.
//! Layer 3 (MemoryItem): extracted facts with scores and supersede history.
//!
//! SemanticTriples optionally hang off items as normalized entity facts.

pub mod category;
pub mod item;
pub mod resource;
pub mod store;
pub mod triple;

pub use category::{Category, CategoryPath};
pub use item::{MemoryItem, MemoryItemBuilder, MemoryKind};
pub use resource::{ContentKind, Resource, ResourceBuilder};
pub use store::{EnsuredCategory, FactStore, StoreSnapshot, StoreStats};
pub use triple::{normalize_predicate, SemanticTriple};
