//! Deterministic providers and sources for unit tests.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    embeddings::EmbeddingProvider,
    source::{DocumentSource, SourceError},
};

pub const KEYWORDS: [&str; 8] = [
    "rust", "python", "database", "memory", "search", "network", "cooking", "music",
];

/// Bag-of-keywords vector: one dimension per entry of [`KEYWORDS`].
pub fn keyword_embedding(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    KEYWORDS
        .iter()
        .map(|kw| if lower.contains(kw) { 1.0 } else { 0.0 })
        .collect()
}

pub struct KeywordProvider;

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(keyword_embedding(text))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len()
    }
}

/// Keyword provider that counts batch calls and embedded texts.
#[derive(Default)]
pub struct CountingProvider {
    pub batch_calls: Arc<AtomicUsize>,
    pub texts_embedded: Arc<AtomicUsize>,
}

impl CountingProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.texts_embedded.fetch_add(1, Ordering::SeqCst);
        Ok(keyword_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| keyword_embedding(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len()
    }
}

/// Fails every call, counting the attempts.
#[derive(Default)]
pub struct FailingProvider {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("provider unavailable")
    }

    fn model_name(&self) -> &str {
        "failing-model"
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len()
    }
}

/// Never completes.
pub struct StallingProvider;

#[async_trait]
impl EmbeddingProvider for StallingProvider {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        std::future::pending().await
    }

    fn model_name(&self) -> &str {
        "stalling-model"
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len()
    }
}

/// In-memory documents, with ids that can be made unreadable.
#[derive(Default)]
pub struct MemorySource {
    docs: Mutex<BTreeMap<String, String>>,
    unreadable: Mutex<HashSet<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: &str, text: &str) {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), text.to_string());
    }

    pub fn remove(&self, id: &str) {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn set_unreadable(&self, id: &str, unreadable: bool) {
        let mut set = self.unreadable.lock().unwrap_or_else(PoisonError::into_inner);
        if unreadable {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn read(&self, source_file: &str) -> Result<Option<String>, SourceError> {
        if self
            .unreadable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(source_file)
        {
            return Err(SourceError::Io {
                path: source_file.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            });
        }
        Ok(self
            .docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_file)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<String>, SourceError> {
        Ok(self
            .docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}
