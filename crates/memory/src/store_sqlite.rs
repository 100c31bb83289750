//! SQLite-backed [`MemoryStore`] using FTS5 for the lexical index.

use std::{collections::HashMap, path::Path};

use {
    async_trait::async_trait,
    sqlx::{
        QueryBuilder, Sqlite, SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    },
    tracing::debug,
};

use crate::{
    schema::{
        CacheEntry, ChunkRow, EmbeddedChunk, StoredChunk, blob_to_vector, run_migrations,
        vector_to_blob,
    },
    search::LexicalQuery,
    store::{FileUpdate, KeywordHit, LineRange, MemoryStore, StoreStats},
};

pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    /// Wrap a pool whose schema is already migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file in WAL mode and migrate it.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        run_migrations(&pool).await?;
        debug!(path = %path.display(), "opened memory database");
        Ok(Self::new(pool))
    }

    /// A private in-memory database, shared by every connection of the pool.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePool::connect(":memory:").await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn stored_chunks(&self, source_file: &str) -> anyhow::Result<Vec<StoredChunk>> {
        let rows = sqlx::query_as::<_, StoredChunk>(
            "SELECT id, content_hash, embedding, model FROM memory_chunks WHERE source_file = ? ORDER BY line_start",
        )
        .bind(source_file)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn apply_file_update(&self, update: FileUpdate) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;

        for row in &update.upserts {
            sqlx::query(
                r#"INSERT INTO memory_chunks
                    (id, source_file, line_start, line_end, content, content_hash, embedding, model, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    source_file = excluded.source_file,
                    line_start = excluded.line_start,
                    line_end = excluded.line_end,
                    content = excluded.content,
                    content_hash = excluded.content_hash,
                    embedding = excluded.embedding,
                    model = excluded.model,
                    updated_at = excluded.updated_at"#,
            )
            .bind(&row.id)
            .bind(&row.source_file)
            .bind(row.line_start)
            .bind(row.line_end)
            .bind(&row.content)
            .bind(&row.content_hash)
            .bind(&row.embedding)
            .bind(&row.model)
            .bind(&row.updated_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM memory_fts WHERE chunk_id = ?")
                .bind(&row.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO memory_fts (chunk_id, content, source_file) VALUES (?, ?, ?)")
                .bind(&row.id)
                .bind(&row.content)
                .bind(&row.source_file)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(provider_key) = &update.provider_key {
            let now = chrono::Utc::now().to_rfc3339();
            for entry in &update.cache_entries {
                sqlx::query(
                    r#"INSERT INTO embedding_cache (provider_key, content_hash, embedding, updated_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(provider_key, content_hash) DO UPDATE SET
                        embedding = excluded.embedding,
                        updated_at = excluded.updated_at"#,
                )
                .bind(provider_key)
                .bind(&entry.content_hash)
                .bind(vector_to_blob(&entry.embedding))
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
        }

        let stored: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM memory_chunks WHERE source_file = ?")
                .bind(&update.source_file)
                .fetch_all(&mut *tx)
                .await?;
        let mut removed = 0usize;
        for (id,) in stored {
            if update.live_ids.contains(&id) {
                continue;
            }
            sqlx::query("DELETE FROM memory_chunks WHERE id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM memory_fts WHERE chunk_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            removed += 1;
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn delete_source(&self, source_file: &str) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM memory_chunks WHERE source_file = ?")
            .bind(source_file)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM memory_fts WHERE source_file = ?")
            .bind(source_file)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn list_sources(&self) -> anyhow::Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT source_file FROM memory_chunks ORDER BY source_file")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn embedded_chunks(&self) -> anyhow::Result<Vec<EmbeddedChunk>> {
        let rows = sqlx::query_as::<_, EmbeddedChunk>(
            "SELECT id, source_file, line_start, line_end, content, embedding FROM memory_chunks WHERE embedding IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn keyword_search(
        &self,
        query: &LexicalQuery,
        limit: usize,
    ) -> anyhow::Result<Vec<KeywordHit>> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT chunk_id, source_file, content FROM memory_fts WHERE memory_fts MATCH ? ORDER BY rank LIMIT ?",
        )
        .bind(query.to_fts_expression())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, source_file, content)| KeywordHit {
                id,
                source_file,
                content,
            })
            .collect())
    }

    async fn line_ranges(&self, ids: &[String]) -> anyhow::Result<HashMap<String, LineRange>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, line_start, line_end FROM memory_chunks WHERE id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let rows: Vec<(String, i64, i64)> =
            builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(id, start, end)| {
                (id, LineRange {
                    line_start: start.max(0) as usize,
                    line_end: end.max(0) as usize,
                })
            })
            .collect())
    }

    async fn get_chunk(&self, id: &str) -> anyhow::Result<Option<ChunkRow>> {
        let row = sqlx::query_as::<_, ChunkRow>("SELECT * FROM memory_chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn load_embedding_cache(&self, provider_key: &str) -> anyhow::Result<Vec<CacheEntry>> {
        let rows: Vec<(String, Vec<u8>)> = sqlx::query_as(
            "SELECT content_hash, embedding FROM embedding_cache WHERE provider_key = ?",
        )
        .bind(provider_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(content_hash, blob)| CacheEntry {
                content_hash,
                embedding: blob_to_vector(&blob),
            })
            .collect())
    }

    async fn stats(&self) -> anyhow::Result<StoreStats> {
        let (files, chunks, embedded): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(DISTINCT source_file), COUNT(*), COUNT(embedding) FROM memory_chunks",
        )
        .fetch_one(&self.pool)
        .await?;
        let (cache_entries,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreStats {
            files: files as usize,
            chunks: chunks as usize,
            embedded_chunks: embedded as usize,
            cache_entries: cache_entries as usize,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    /// An empty `vector` stores the chunk without an embedding.
    fn row(id: &str, source: &str, lines: (i64, i64), content: &str, vector: &[f32]) -> ChunkRow {
        let vector = (!vector.is_empty()).then_some(vector);
        ChunkRow {
            id: id.into(),
            source_file: source.into(),
            line_start: lines.0,
            line_end: lines.1,
            content: content.into(),
            content_hash: crate::chunker::sha256_hex(content),
            embedding: vector.map(vector_to_blob),
            model: vector.map(|_| "mock-model".to_string()),
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn update(source: &str, rows: Vec<ChunkRow>) -> FileUpdate {
        FileUpdate {
            source_file: source.into(),
            live_ids: rows.iter().map(|r| r.id.clone()).collect(),
            upserts: rows,
            ..Default::default()
        }
    }

    async fn fts_count(store: &SqliteMemoryStore, source: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memory_fts WHERE source_file = ?")
            .bind(source)
            .fetch_one(store.pool())
            .await
            .unwrap();
        n
    }

    #[tokio::test]
    async fn update_sweeps_ids_that_are_not_live() {
        let store = SqliteMemoryStore::in_memory().await.unwrap();
        store
            .apply_file_update(update("a.md", vec![
                row("a1", "a.md", (1, 2), "first rust chunk", &[1.0, 0.0]),
                row("a2", "a.md", (3, 4), "second chunk", &[]),
            ]))
            .await
            .unwrap();
        assert_eq!(fts_count(&store, "a.md").await, 2);

        let removed = store
            .apply_file_update(update("a.md", vec![row("a3", "a.md", (1, 1), "replacement", &[])]))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let stored = store.stored_chunks("a.md").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, "a3");
        assert_eq!(fts_count(&store, "a.md").await, 1);
    }

    #[tokio::test]
    async fn upsert_keeps_one_lexical_row_per_chunk() {
        let store = SqliteMemoryStore::in_memory().await.unwrap();
        let first = row("a1", "a.md", (1, 1), "hello world", &[]);
        store.apply_file_update(update("a.md", vec![first.clone()])).await.unwrap();
        store.apply_file_update(update("a.md", vec![first])).await.unwrap();
        assert_eq!(fts_count(&store, "a.md").await, 1);
    }

    #[tokio::test]
    async fn keyword_search_ranks_and_limits() {
        let store = SqliteMemoryStore::in_memory().await.unwrap();
        store
            .apply_file_update(update("a.md", vec![
                row("a1", "a.md", (1, 1), "database tuning for sqlite database files", &[]),
                row("a2", "a.md", (2, 2), "a note about the database", &[]),
                row("a3", "a.md", (3, 3), "cooking pasta", &[]),
            ]))
            .await
            .unwrap();

        let query = LexicalQuery::parse("database");
        let hits = store.keyword_search(&query, 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"a1") && ids.contains(&"a2"));

        assert_eq!(store.keyword_search(&query, 1).await.unwrap().len(), 1);
        assert!(
            store
                .keyword_search(&LexicalQuery::parse("?!"), 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn line_ranges_skip_unknown_ids() {
        let store = SqliteMemoryStore::in_memory().await.unwrap();
        store
            .apply_file_update(update("a.md", vec![row("a1", "a.md", (5, 9), "text", &[])]))
            .await
            .unwrap();

        let ranges = store
            .line_ranges(&["a1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges["a1"], LineRange {
            line_start: 5,
            line_end: 9
        });
        assert!(store.line_ranges(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cache_entries_are_scoped_by_provider() {
        let store = SqliteMemoryStore::in_memory().await.unwrap();
        store
            .apply_file_update(FileUpdate {
                source_file: "a.md".into(),
                cache_entries: vec![CacheEntry {
                    content_hash: "h1".into(),
                    embedding: vec![0.25, 0.75],
                }],
                provider_key: Some("model-a".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let loaded = store.load_embedding_cache("model-a").await.unwrap();
        assert_eq!(loaded, vec![CacheEntry {
            content_hash: "h1".into(),
            embedding: vec![0.25, 0.75],
        }]);
        assert!(store.load_embedding_cache("model-b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_source_and_stats() {
        let store = SqliteMemoryStore::in_memory().await.unwrap();
        store
            .apply_file_update(update("a.md", vec![
                row("a1", "a.md", (1, 1), "one", &[1.0]),
                row("a2", "a.md", (2, 2), "two", &[]),
            ]))
            .await
            .unwrap();
        store
            .apply_file_update(update("b.md", vec![row("b1", "b.md", (1, 1), "three", &[])]))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, StoreStats {
            files: 2,
            chunks: 3,
            embedded_chunks: 1,
            cache_entries: 0,
        });
        assert_eq!(store.list_sources().await.unwrap(), vec!["a.md", "b.md"]);
        assert_eq!(store.embedded_chunks().await.unwrap().len(), 1);

        assert_eq!(store.delete_source("a.md").await.unwrap(), 2);
        assert_eq!(store.list_sources().await.unwrap(), vec!["b.md"]);
        assert_eq!(fts_count(&store, "a.md").await, 0);
    }

    #[tokio::test]
    async fn get_chunk_decodes_embedding() {
        let store = SqliteMemoryStore::in_memory().await.unwrap();
        store
            .apply_file_update(update("a.md", vec![row("a1", "a.md", (1, 3), "body", &[0.5, -1.0])]))
            .await
            .unwrap();

        let chunk = store.get_chunk("a1").await.unwrap().unwrap();
        assert_eq!(chunk.line_end, 3);
        assert_eq!(chunk.embedding_vector(), Some(vec![0.5, -1.0]));
        assert!(store.get_chunk("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_creates_a_file_database() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/memory.db");
        let store = SqliteMemoryStore::open(&path).await.unwrap();
        store
            .apply_file_update(update("a.md", vec![row("a1", "a.md", (1, 1), "persisted", &[])]))
            .await
            .unwrap();
        drop(store);

        let reopened = SqliteMemoryStore::open(&path).await.unwrap();
        assert_eq!(reopened.stats().await.unwrap().chunks, 1);
    }
}
