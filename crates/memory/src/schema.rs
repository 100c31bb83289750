//! SQLite schema and typed rows for the memory store.

use {serde::Serialize, sqlx::SqlitePool};

const MIGRATIONS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS memory_chunks (
        id           TEXT PRIMARY KEY,
        source_file  TEXT NOT NULL,
        line_start   INTEGER NOT NULL,
        line_end     INTEGER NOT NULL,
        content      TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        embedding    BLOB,
        model        TEXT,
        updated_at   TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_memory_chunks_source ON memory_chunks(source_file)",
    "CREATE INDEX IF NOT EXISTS idx_memory_chunks_hash ON memory_chunks(content_hash)",
    r#"CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
        chunk_id UNINDEXED,
        content,
        source_file UNINDEXED
    )"#,
    r#"CREATE TABLE IF NOT EXISTS embedding_cache (
        provider_key TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        embedding    BLOB NOT NULL,
        updated_at   TEXT NOT NULL,
        PRIMARY KEY (provider_key, content_hash)
    )"#,
];

/// Create tables and indexes if they are missing. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// A persisted chunk.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct ChunkRow {
    pub id: String,
    pub source_file: String,
    pub line_start: i64,
    pub line_end: i64,
    pub content: String,
    pub content_hash: String,
    /// Little-endian `f32` values; `None` when no vector was produced.
    #[serde(skip)]
    pub embedding: Option<Vec<u8>>,
    pub model: Option<String>,
    pub updated_at: String,
}

impl ChunkRow {
    pub fn embedding_vector(&self) -> Option<Vec<f32>> {
        self.embedding.as_deref().map(blob_to_vector)
    }
}

/// Reconciliation view of a stored chunk.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredChunk {
    pub id: String,
    pub content_hash: String,
    pub embedding: Option<Vec<u8>>,
    pub model: Option<String>,
}

/// A chunk carrying a vector, as loaded for the similarity scan.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmbeddedChunk {
    pub id: String,
    pub source_file: String,
    pub line_start: i64,
    pub line_end: i64,
    pub content: String,
    pub embedding: Vec<u8>,
}

/// Persisted embedding cache entry, keyed by `(provider_key, content_hash)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub content_hash: String,
    pub embedding: Vec<f32>,
}

pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
