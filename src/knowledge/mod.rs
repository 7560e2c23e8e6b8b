//! Knowledge log: shared lessons, snippets and discoveries.

pub mod cache;
pub mod log;
pub mod model;

pub use cache::{KnowledgeCache, Snapshot, SyncReport};
pub use log::{KnowledgeLog, SearchParams};
pub use model::{KnowledgeEntry, KnowledgeStats, KnowledgeType, NewEntry};
