use async_trait::async_trait;

use crate::{
    schema::{CacheEntry, ChunkRow, EmbeddedChunk, StoredChunk},
    search::LexicalQuery,
};

/// Everything that changes for one source in a single reconciliation.
#[derive(Debug, Default)]
pub struct FileUpdate {
    pub source_file: String,
    /// Chunks to insert or overwrite, lexical entries included.
    pub upserts: Vec<ChunkRow>,
    /// Ids that survive; every other stored chunk of the source is removed.
    pub live_ids: Vec<String>,
    pub cache_entries: Vec<CacheEntry>,
    /// Provider key the cache entries belong to.
    pub provider_key: Option<String>,
}

/// A lexical match, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub id: String,
    pub source_file: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub line_start: usize,
    pub line_end: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub files: usize,
    pub chunks: usize,
    pub embedded_chunks: usize,
    pub cache_entries: usize,
}

/// Durable storage for chunks, their lexical index and the embedding cache.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn stored_chunks(&self, source_file: &str) -> anyhow::Result<Vec<StoredChunk>>;

    /// Apply a [`FileUpdate`] atomically. Returns the number of chunks removed.
    async fn apply_file_update(&self, update: FileUpdate) -> anyhow::Result<usize>;

    /// Remove every chunk of a source. Returns the number removed.
    async fn delete_source(&self, source_file: &str) -> anyhow::Result<usize>;

    async fn list_sources(&self) -> anyhow::Result<Vec<String>>;

    /// Every chunk that carries a vector.
    async fn embedded_chunks(&self) -> anyhow::Result<Vec<EmbeddedChunk>>;

    async fn keyword_search(
        &self,
        query: &LexicalQuery,
        limit: usize,
    ) -> anyhow::Result<Vec<KeywordHit>>;

    /// Line ranges for the given ids; unknown ids are left out.
    async fn line_ranges(
        &self,
        ids: &[String],
    ) -> anyhow::Result<std::collections::HashMap<String, LineRange>>;

    async fn get_chunk(&self, id: &str) -> anyhow::Result<Option<ChunkRow>>;

    async fn load_embedding_cache(&self, provider_key: &str) -> anyhow::Result<Vec<CacheEntry>>;

    async fn stats(&self) -> anyhow::Result<StoreStats>;
}
