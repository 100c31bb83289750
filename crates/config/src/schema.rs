use std::path::PathBuf;

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

/// Root of `mnemo.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MnemoConfig {
    pub memory: MemorySection,
    pub embeddings: EmbeddingsConfig,
}

/// What the indexer does when a document is present but empty, or gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyDocument {
    /// Drop every stored chunk of the document.
    #[default]
    Purge,
    /// Leave the last indexed state in place.
    Keep,
}

/// `[memory]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// Workspace root holding the markdown documents. Relative paths are
    /// resolved against the working directory.
    pub workspace_dir: PathBuf,
    /// SQLite database file. Defaults to `memory.db` in the data directory.
    pub db_path: Option<PathBuf>,
    /// Individual workspace-relative files to index.
    pub memory_files: Vec<String>,
    /// Workspace-relative directories walked recursively for markdown.
    pub memory_dirs: Vec<String>,
    pub chunk_tokens: usize,
    pub chunk_overlap_tokens: usize,
    pub chars_per_token: usize,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub candidate_multiplier: usize,
    pub search_timeout_secs: u64,
    pub empty_document: EmptyDocument,
    /// Debounce window for the file watcher.
    pub watch_debounce_ms: u64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("workspace"),
            db_path: None,
            memory_files: vec!["MEMORY.md".into()],
            memory_dirs: vec!["memory".into(), "notes".into()],
            chunk_tokens: 400,
            chunk_overlap_tokens: 80,
            chars_per_token: 4,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            candidate_multiplier: 4,
            search_timeout_secs: 10,
            empty_document: EmptyDocument::Purge,
            watch_debounce_ms: 1500,
        }
    }
}

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingsProvider {
    /// OpenAI or any OpenAI-compatible `/embeddings` endpoint.
    #[default]
    OpenAi,
    /// Lexical-only retrieval; no embedding calls are made.
    None,
}

/// `[embeddings]` table.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub provider: EmbeddingsProvider,
    /// Falls back to `OPENAI_API_KEY` when absent.
    pub api_key: Option<Secret<String>>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingsProvider::OpenAi,
            api_key: None,
            base_url: None,
            model: None,
            dimensions: None,
            batch_size: 100,
            timeout_secs: 30,
        }
    }
}
