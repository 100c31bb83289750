//! Batching, timeout-bounded embedding client with a content-hash cache.
//!
//! The [`Embedder`] never fails: a batch that errors, times out or returns
//! the wrong number of vectors yields empty vectors for its inputs, so the
//! caller can still store and lexically index the affected chunks.

use std::{
    collections::{HashMap, HashSet},
    sync::{PoisonError, RwLock},
    time::Duration,
};

use tracing::{debug, warn};

#[cfg(feature = "metrics")]
use mnemo_metrics::{counter, labels, memory as mem_metrics};

use crate::{embeddings::EmbeddingProvider, schema::CacheEntry};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of [`Embedder::embed_with_cache`].
#[derive(Debug, Default)]
pub struct CachedEmbeddings {
    /// One vector per input, in input order. Empty when no vector could be
    /// produced for that input.
    pub vectors: Vec<Vec<f32>>,
    /// Vectors computed by this call, one per distinct hash, for the caller
    /// to persist.
    pub fresh: Vec<CacheEntry>,
    /// Inputs served from the cache without a provider call.
    pub cache_hits: usize,
}

pub struct Embedder {
    provider: Option<Box<dyn EmbeddingProvider>>,
    batch_size: usize,
    timeout: Duration,
    cache: RwLock<HashMap<String, Vec<f32>>>,
}

impl Embedder {
    pub fn new(provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            provider: Some(provider),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_EMBED_TIMEOUT,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// An embedder with no provider: every call returns empty vectors.
    pub fn unavailable() -> Self {
        Self {
            provider: None,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_EMBED_TIMEOUT,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.model_name())
    }

    pub fn provider_key(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.provider_key())
    }

    /// Embed a single text; empty on failure or when unavailable.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        self.embed_batch(&[text.to_string()])
            .await
            .pop()
            .unwrap_or_default()
    }

    /// Embed `texts` in batches of at most `batch_size`, preserving order.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let Some(provider) = self.provider.as_deref() else {
            return vec![Vec::new(); texts.len()];
        };

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            match tokio::time::timeout(self.timeout, provider.embed_batch(batch)).await {
                Ok(Ok(vectors)) if vectors.len() == batch.len() => out.extend(vectors),
                Ok(Ok(vectors)) => {
                    warn!(
                        expected = batch.len(),
                        got = vectors.len(),
                        "embedding batch returned wrong vector count"
                    );
                    self.record_batch_failure(provider);
                    out.extend(std::iter::repeat_with(Vec::new).take(batch.len()));
                },
                Ok(Err(e)) => {
                    warn!(model = provider.model_name(), size = batch.len(), error = %e, "embedding batch failed");
                    self.record_batch_failure(provider);
                    out.extend(std::iter::repeat_with(Vec::new).take(batch.len()));
                },
                Err(_) => {
                    warn!(
                        model = provider.model_name(),
                        size = batch.len(),
                        timeout_secs = self.timeout.as_secs_f64(),
                        "embedding batch timed out"
                    );
                    self.record_batch_failure(provider);
                    out.extend(std::iter::repeat_with(Vec::new).take(batch.len()));
                },
            }
        }
        out
    }

    /// Embed `texts`, serving inputs whose hash is cached and sending each
    /// distinct missing hash to the provider once.
    pub async fn embed_with_cache(&self, texts: &[String], hashes: &[String]) -> CachedEmbeddings {
        debug_assert_eq!(texts.len(), hashes.len());

        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut miss_texts = Vec::new();
        let mut miss_hashes = Vec::new();
        let mut seen = HashSet::new();
        let mut cache_hits = 0usize;

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            for (text, hash) in texts.iter().zip(hashes) {
                match cache.get(hash) {
                    Some(vector) => {
                        cache_hits += 1;
                        vectors.push(Some(vector.clone()));
                    },
                    None => {
                        if seen.insert(hash.as_str()) {
                            miss_texts.push(text.clone());
                            miss_hashes.push(hash.clone());
                        }
                        vectors.push(None);
                    },
                }
            }
        }

        #[cfg(feature = "metrics")]
        if cache_hits > 0 {
            counter!(mem_metrics::EMBEDDING_CACHE_HITS_TOTAL).increment(cache_hits as u64);
        }

        let computed = if miss_texts.is_empty() || !self.is_available() {
            HashMap::new()
        } else {
            let embedded = self.embed_batch(&miss_texts).await;
            miss_hashes
                .into_iter()
                .zip(embedded)
                .filter(|(_, vector)| !vector.is_empty())
                .collect::<HashMap<_, _>>()
        };

        let fresh: Vec<CacheEntry> = computed
            .iter()
            .map(|(hash, vector)| CacheEntry {
                content_hash: hash.clone(),
                embedding: vector.clone(),
            })
            .collect();
        if !fresh.is_empty() {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            for entry in &fresh {
                cache.insert(entry.content_hash.clone(), entry.embedding.clone());
            }
        }

        debug!(
            inputs = texts.len(),
            cache_hits,
            embedded = fresh.len(),
            "embedded with cache"
        );

        let vectors = vectors
            .into_iter()
            .zip(hashes)
            .map(|(vector, hash)| {
                vector
                    .or_else(|| computed.get(hash).cloned())
                    .unwrap_or_default()
            })
            .collect();

        CachedEmbeddings {
            vectors,
            fresh,
            cache_hits,
        }
    }

    /// Warm the in-memory cache from persisted entries.
    pub fn load_cache(&self, entries: impl IntoIterator<Item = CacheEntry>) -> usize {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let before = cache.len();
        for entry in entries {
            if !entry.embedding.is_empty() {
                cache.insert(entry.content_hash, entry.embedding);
            }
        }
        cache.len() - before
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[allow(unused_variables)]
    fn record_batch_failure(&self, provider: &dyn EmbeddingProvider) {
        #[cfg(feature = "metrics")]
        counter!(
            mem_metrics::EMBEDDING_BATCH_FAILURES_TOTAL,
            labels::PROVIDER => provider.model_name().to_string()
        )
        .increment(1);
    }
}
