//! Keeps the store in step with the document source.
//!
//! Each document is reconciled in one store transaction: chunks whose id is
//! already stored are left alone, chunks whose content moved reuse the stored
//! vector, everything else is embedded, and stored chunks that no longer
//! exist are swept.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
};

use {
    serde::Serialize,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use mnemo_metrics::{counter, labels, memory as mem_metrics};

use crate::{
    chunker::{Chunk, ChunkerOptions, chunk_markdown},
    config::EmptyDocumentPolicy,
    embedder::Embedder,
    schema::{ChunkRow, vector_to_blob},
    source::DocumentSource,
    store::{FileUpdate, MemoryStore},
};

/// Outcome of [`MemoryIndexer::index_all`] or [`MemoryIndexer::reindex_dirty`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Documents whose stored chunks changed.
    pub files_indexed: usize,
    pub files_unchanged: usize,
    /// Documents purged because they are no longer listed.
    pub files_removed: usize,
    /// Chunks that needed embedding work.
    pub chunks_embedded: usize,
    pub errors: usize,
}

impl SyncReport {
    fn record(&mut self, outcome: &FileOutcome) {
        if outcome.changed() {
            self.files_indexed += 1;
        } else {
            self.files_unchanged += 1;
        }
        self.chunks_embedded += outcome.embedded;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub files: usize,
    pub chunks: usize,
    pub embedded_chunks: usize,
    /// Persisted embedding cache entries, all providers.
    pub cache_entries: usize,
    /// Entries held by the in-process cache.
    pub cached_in_memory: usize,
    pub dirty_files: usize,
}

#[derive(Debug, Default)]
struct FileOutcome {
    embedded: usize,
    written: usize,
    removed: usize,
}

impl FileOutcome {
    fn changed(&self) -> bool {
        self.written > 0 || self.removed > 0
    }
}

pub struct MemoryIndexer {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<Embedder>,
    source: Arc<dyn DocumentSource>,
    chunker: ChunkerOptions,
    empty_document: EmptyDocumentPolicy,
    write_lock: tokio::sync::Mutex<()>,
    dirty: Mutex<HashSet<String>>,
}

impl MemoryIndexer {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embedder: Arc<Embedder>,
        source: Arc<dyn DocumentSource>,
    ) -> Self {
        Self {
            store,
            embedder,
            source,
            chunker: ChunkerOptions::default(),
            empty_document: EmptyDocumentPolicy::default(),
            write_lock: tokio::sync::Mutex::new(()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_chunker(mut self, chunker: ChunkerOptions) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_empty_document(mut self, policy: EmptyDocumentPolicy) -> Self {
        self.empty_document = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    /// Reconcile one document. Returns the number of new or changed chunks
    /// sent for embedding. Chunks whose id is already stored are skipped even
    /// when they lack a vector; [`backfill_embeddings`](Self::backfill_embeddings)
    /// fills those in.
    ///
    /// A document that cannot be read leaves its stored state untouched.
    pub async fn index_file(&self, source_file: &str) -> anyhow::Result<usize> {
        Ok(self.reconcile(source_file).await?.embedded)
    }

    async fn reconcile(&self, source_file: &str) -> anyhow::Result<FileOutcome> {
        let _guard = self.write_lock.lock().await;

        let text = self.source.read(source_file).await?;
        let text = match text {
            Some(text) if !text.trim().is_empty() => text,
            other => return self.handle_empty(source_file, other.is_none()).await,
        };

        let chunks = chunk_markdown(source_file, &text, &self.chunker);
        let stored = self.store.stored_chunks(source_file).await?;

        let stored_ids: HashSet<&str> = stored.iter().map(|s| s.id.as_str()).collect();
        let mut vector_by_hash: HashMap<&str, (&[u8], Option<&str>)> = HashMap::new();
        for s in &stored {
            if let Some(blob) = &s.embedding {
                vector_by_hash
                    .entry(s.content_hash.as_str())
                    .or_insert((blob.as_slice(), s.model.as_deref()));
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut upserts = Vec::new();
        let mut to_embed: Vec<&Chunk> = Vec::new();
        let mut unchanged = 0usize;

        for chunk in &chunks {
            if stored_ids.contains(chunk.id.as_str()) {
                unchanged += 1;
                continue;
            }
            match vector_by_hash.get(chunk.content_hash.as_str()) {
                Some((blob, model)) => upserts.push(chunk_row(
                    chunk,
                    Some(blob.to_vec()),
                    model.map(str::to_string),
                    &now,
                )),
                None => to_embed.push(chunk),
            }
        }
        let relocated = upserts.len();

        let mut cache_entries = Vec::new();
        if !to_embed.is_empty() {
            let texts: Vec<String> = to_embed.iter().map(|c| c.content.clone()).collect();
            let hashes: Vec<String> = to_embed.iter().map(|c| c.content_hash.clone()).collect();
            let embedded = self.embedder.embed_with_cache(&texts, &hashes).await;
            let model = self.embedder.model_name().map(str::to_string);

            for (chunk, vector) in to_embed.iter().zip(embedded.vectors) {
                let (blob, model) = if vector.is_empty() {
                    (None, None)
                } else {
                    (Some(vector_to_blob(&vector)), model.clone())
                };
                upserts.push(chunk_row(chunk, blob, model, &now));
            }
            cache_entries = embedded.fresh;
        }

        let written = upserts.len();
        let removed = self
            .store
            .apply_file_update(FileUpdate {
                source_file: source_file.to_string(),
                upserts,
                live_ids: chunks.iter().map(|c| c.id.clone()).collect(),
                cache_entries,
                provider_key: self.embedder.provider_key().map(str::to_string),
            })
            .await?;

        #[cfg(feature = "metrics")]
        {
            counter!(mem_metrics::CHUNKS_INDEXED_TOTAL, labels::OUTCOME => "embedded")
                .increment(to_embed.len() as u64);
            counter!(mem_metrics::CHUNKS_INDEXED_TOTAL, labels::OUTCOME => "relocated")
                .increment(relocated as u64);
            counter!(mem_metrics::CHUNKS_REMOVED_TOTAL).increment(removed as u64);
        }

        if written > 0 || removed > 0 {
            info!(
                path = %source_file,
                embedded = to_embed.len(),
                relocated,
                unchanged,
                removed,
                "indexed file"
            );
        } else {
            debug!(path = %source_file, chunks = chunks.len(), "file up to date");
        }

        Ok(FileOutcome {
            embedded: to_embed.len(),
            written,
            removed,
        })
    }

    /// Embed stored chunks of one document that were written without a
    /// vector, e.g. while the provider was failing. Ids and content stay as
    /// they are. Returns the number of chunks that gained a vector.
    pub async fn backfill_embeddings(&self, source_file: &str) -> anyhow::Result<usize> {
        if !self.embedder.is_available() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;

        let stored = self.store.stored_chunks(source_file).await?;
        let mut missing = Vec::new();
        for chunk in stored.iter().filter(|c| c.embedding.is_none()) {
            if let Some(row) = self.store.get_chunk(&chunk.id).await? {
                missing.push(row);
            }
        }
        if missing.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = missing.iter().map(|r| r.content.clone()).collect();
        let hashes: Vec<String> = missing.iter().map(|r| r.content_hash.clone()).collect();
        let embedded = self.embedder.embed_with_cache(&texts, &hashes).await;
        let model = self.embedder.model_name().map(str::to_string);
        let now = chrono::Utc::now().to_rfc3339();

        let upserts: Vec<ChunkRow> = missing
            .into_iter()
            .zip(embedded.vectors)
            .filter(|(_, vector)| !vector.is_empty())
            .map(|(row, vector)| ChunkRow {
                embedding: Some(vector_to_blob(&vector)),
                model: model.clone(),
                updated_at: now.clone(),
                ..row
            })
            .collect();
        let filled = upserts.len();
        if filled == 0 {
            debug!(path = %source_file, "backfill produced no vectors");
            return Ok(0);
        }

        self.store
            .apply_file_update(FileUpdate {
                source_file: source_file.to_string(),
                upserts,
                live_ids: stored.into_iter().map(|c| c.id).collect(),
                cache_entries: embedded.fresh,
                provider_key: self.embedder.provider_key().map(str::to_string),
            })
            .await?;
        info!(path = %source_file, filled, "backfilled embeddings");
        Ok(filled)
    }

    /// [`backfill_embeddings`](Self::backfill_embeddings) over every stored document.
    pub async fn backfill_all(&self) -> anyhow::Result<usize> {
        let mut filled = 0;
        for source_file in self.store.list_sources().await? {
            filled += self.backfill_embeddings(&source_file).await?;
        }
        Ok(filled)
    }

    async fn handle_empty(&self, source_file: &str, missing: bool) -> anyhow::Result<FileOutcome> {
        match self.empty_document {
            EmptyDocumentPolicy::Purge => {
                let removed = self.store.delete_source(source_file).await?;
                if removed > 0 {
                    info!(path = %source_file, removed, missing, "purged document");
                }
                Ok(FileOutcome {
                    removed,
                    ..Default::default()
                })
            },
            EmptyDocumentPolicy::Keep => {
                debug!(path = %source_file, missing, "document empty, keeping indexed state");
                Ok(FileOutcome::default())
            },
        }
    }

    /// Reconcile every listed document and purge stored documents that are no
    /// longer listed. A failing document is logged and counted; the rest
    /// proceed.
    pub async fn index_all(&self) -> anyhow::Result<SyncReport> {
        let listed = self.source.list().await?;
        info!(files = listed.len(), "indexing memory files");

        let mut report = SyncReport::default();
        for source_file in &listed {
            match self.reconcile(source_file).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    warn!(path = %source_file, error = %e, "failed to index file");
                    report.errors += 1;
                },
            }
        }

        if self.empty_document == EmptyDocumentPolicy::Purge {
            let listed: HashSet<&str> = listed.iter().map(String::as_str).collect();
            for stored in self.store.list_sources().await? {
                if listed.contains(stored.as_str()) {
                    continue;
                }
                let _guard = self.write_lock.lock().await;
                info!(path = %stored, "removing deleted file from memory");
                self.store.delete_source(&stored).await?;
                report.files_removed += 1;
            }
        }

        info!(
            indexed = report.files_indexed,
            unchanged = report.files_unchanged,
            removed = report.files_removed,
            embedded = report.chunks_embedded,
            errors = report.errors,
            "indexing complete"
        );
        Ok(report)
    }

    /// Queue a document for the next [`reindex_dirty`](Self::reindex_dirty).
    pub fn mark_dirty(&self, source_file: &str) {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_file.to_string());
    }

    pub fn dirty_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        files.sort();
        files
    }

    /// Drain the dirty set and reindex what it held. Documents that fail are
    /// marked dirty again; marks made meanwhile wait for the next call.
    pub async fn reindex_dirty(&self) -> SyncReport {
        let drained = std::mem::take(&mut *self.dirty.lock().unwrap_or_else(PoisonError::into_inner));
        let mut report = SyncReport::default();
        if drained.is_empty() {
            return report;
        }

        let mut files: Vec<String> = drained.into_iter().collect();
        files.sort();
        for source_file in files {
            match self.reconcile(&source_file).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    warn!(path = %source_file, error = %e, "failed to reindex file, will retry");
                    report.errors += 1;
                    self.mark_dirty(&source_file);
                },
            }
        }
        report
    }

    /// Load persisted cache entries for the current provider into memory.
    pub async fn warm_cache(&self) -> anyhow::Result<usize> {
        let Some(provider_key) = self.embedder.provider_key() else {
            return Ok(0);
        };
        let entries = self.store.load_embedding_cache(provider_key).await?;
        let loaded = self.embedder.load_cache(entries);
        debug!(provider_key, loaded, "warmed embedding cache");
        Ok(loaded)
    }

    pub async fn stats(&self) -> anyhow::Result<IndexStats> {
        let store = self.store.stats().await?;
        Ok(IndexStats {
            files: store.files,
            chunks: store.chunks,
            embedded_chunks: store.embedded_chunks,
            cache_entries: store.cache_entries,
            cached_in_memory: self.embedder.cache_len(),
            dirty_files: self
                .dirty
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        })
    }
}

fn chunk_row(chunk: &Chunk, embedding: Option<Vec<u8>>, model: Option<String>, now: &str) -> ChunkRow {
    ChunkRow {
        id: chunk.id.clone(),
        source_file: chunk.source_file.clone(),
        line_start: chunk.line_start as i64,
        line_end: chunk.line_end as i64,
        content: chunk.content.clone(),
        content_hash: chunk.content_hash.clone(),
        embedding,
        model,
        updated_at: now.to_string(),
    }
}
