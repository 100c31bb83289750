//! Memory management: markdown files → chunked → embedded → hybrid search in SQLite.

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod embeddings;
pub mod embeddings_openai;
pub mod indexer;
pub mod manager;
pub mod schema;
pub mod search;
pub mod source;
pub mod store;
pub mod store_sqlite;
#[cfg(feature = "file-watcher")]
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use {
    config::{EmptyDocumentPolicy, MemoryConfig},
    indexer::SyncReport,
    manager::{MemoryManager, MemoryStatus},
    search::SearchResult,
};
