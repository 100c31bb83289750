//! Memory manager: wires store, embedder, indexer and search from a config.

use std::sync::Arc;

use {serde::Serialize, tracing::info};

use crate::{
    config::{MemoryConfig, MemoryConfigError},
    embedder::Embedder,
    embeddings::EmbeddingProvider,
    indexer::{MemoryIndexer, SyncReport},
    schema::ChunkRow,
    search::{self, SearchResult},
    source::{DocumentSource, WorkspaceSource},
    store::MemoryStore,
    store_sqlite::SqliteMemoryStore,
};

pub struct MemoryManager {
    config: MemoryConfig,
    indexer: MemoryIndexer,
}

/// Snapshot returned by [`MemoryManager::status`].
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStatus {
    pub total_files: usize,
    pub total_chunks: usize,
    pub embedded_chunks: usize,
    pub cache_entries: usize,
    pub dirty_files: usize,
    /// `None` when running lexical-only.
    pub embedding_model: Option<String>,
}

impl MemoryConfig {
    /// Document source over the configured workspace.
    pub fn workspace_source(&self) -> WorkspaceSource {
        WorkspaceSource::new(
            self.workspace_dir.clone(),
            self.memory_files.clone(),
            self.memory_dirs.clone(),
        )
    }
}

impl MemoryManager {
    pub fn new(
        config: MemoryConfig,
        store: Arc<dyn MemoryStore>,
        embedder: Embedder,
        source: Arc<dyn DocumentSource>,
    ) -> Result<Self, MemoryConfigError> {
        config.validate()?;
        let embedder = embedder
            .with_batch_size(config.embed_batch_size)
            .with_timeout(config.embed_timeout);
        let indexer = MemoryIndexer::new(store, Arc::new(embedder), source)
            .with_chunker(config.chunker)
            .with_empty_document(config.empty_document);
        Ok(Self { config, indexer })
    }

    /// Open the configured SQLite database and workspace, and warm the
    /// embedding cache. `provider = None` runs lexical-only.
    pub async fn open(
        config: MemoryConfig,
        provider: Option<Box<dyn EmbeddingProvider>>,
    ) -> anyhow::Result<Self> {
        let store = if config.db_path.as_os_str() == ":memory:" {
            SqliteMemoryStore::in_memory().await?
        } else {
            SqliteMemoryStore::open(&config.db_path).await?
        };
        let embedder = match provider {
            Some(provider) => Embedder::new(provider),
            None => Embedder::unavailable(),
        };
        let source = Arc::new(config.workspace_source());
        let manager = Self::new(config, Arc::new(store), embedder, source)?;

        let warmed = manager.indexer.warm_cache().await?;
        info!(
            db = %manager.config.db_path.display(),
            workspace = %manager.config.workspace_dir.display(),
            model = manager.indexer.embedder().model_name().unwrap_or("none"),
            cached = warmed,
            "memory manager ready"
        );
        Ok(manager)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn indexer(&self) -> &MemoryIndexer {
        &self.indexer
    }

    /// Synchronize every workspace document with the store.
    pub async fn sync(&self) -> anyhow::Result<SyncReport> {
        self.indexer.index_all().await
    }

    pub async fn index_file(&self, source_file: &str) -> anyhow::Result<usize> {
        self.indexer.index_file(source_file).await
    }

    pub fn mark_dirty(&self, source_file: &str) {
        self.indexer.mark_dirty(source_file);
    }

    pub async fn reindex_dirty(&self) -> SyncReport {
        self.indexer.reindex_dirty().await
    }

    /// Embed stored chunks that were indexed without a vector.
    pub async fn backfill_embeddings(&self) -> anyhow::Result<usize> {
        self.indexer.backfill_all().await
    }

    /// Hybrid vector and keyword search over everything indexed.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        search::hybrid_search(
            self.indexer.store().as_ref(),
            self.indexer.embedder(),
            query,
            limit,
            &self.config.search_params(),
        )
        .await
    }

    /// Look up one chunk by id.
    pub async fn get_chunk(&self, id: &str) -> anyhow::Result<Option<ChunkRow>> {
        self.indexer.store().get_chunk(id).await
    }

    /// Index counts, dirty-set size and the active embedding model.
    pub async fn status(&self) -> anyhow::Result<MemoryStatus> {
        let stats = self.indexer.stats().await?;
        Ok(MemoryStatus {
            total_files: stats.files,
            total_chunks: stats.chunks,
            embedded_chunks: stats.embedded_chunks,
            cache_entries: stats.cache_entries,
            dirty_files: stats.dirty_files,
            embedding_model: self.indexer.embedder().model_name().map(str::to_string),
        })
    }
}
