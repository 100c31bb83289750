//! Metric names and label keys shared by the mnemo crates.
//!
//! Recording goes through the [`metrics`] facade, so nothing is exported
//! unless the embedding application installs a recorder.

pub use metrics::{counter, histogram};

/// Label keys.
pub mod labels {
    pub const PROVIDER: &str = "provider";
    pub const SIGNAL: &str = "signal";
    pub const OUTCOME: &str = "outcome";
}

/// Memory indexing and retrieval metrics.
pub mod memory {
    /// Texts sent to an embedding provider.
    pub const EMBEDDINGS_GENERATED_TOTAL: &str = "mnemo_memory_embeddings_generated_total";
    /// Wall time of a single provider batch call.
    pub const EMBEDDING_DURATION_SECONDS: &str = "mnemo_memory_embedding_duration_seconds";
    /// Provider batches that failed and degraded to empty vectors.
    pub const EMBEDDING_BATCH_FAILURES_TOTAL: &str = "mnemo_memory_embedding_batch_failures_total";
    /// Texts served from the content-hash cache.
    pub const EMBEDDING_CACHE_HITS_TOTAL: &str = "mnemo_memory_embedding_cache_hits_total";
    /// Chunks written by a reconciliation pass.
    pub const CHUNKS_INDEXED_TOTAL: &str = "mnemo_memory_chunks_indexed_total";
    /// Chunks removed by the staleness sweep.
    pub const CHUNKS_REMOVED_TOTAL: &str = "mnemo_memory_chunks_removed_total";
    /// Hybrid searches served.
    pub const SEARCHES_TOTAL: &str = "mnemo_memory_searches_total";
    /// End-to-end hybrid search latency.
    pub const SEARCH_DURATION_SECONDS: &str = "mnemo_memory_search_duration_seconds";
    /// Retrieval arms that failed or timed out.
    pub const SEARCH_SIGNAL_FAILURES_TOTAL: &str = "mnemo_memory_search_signal_failures_total";
}

#[cfg(test)]
mod tests {
    use super::memory;

    #[test]
    fn memory_metrics_share_prefix() {
        for name in [
            memory::EMBEDDINGS_GENERATED_TOTAL,
            memory::EMBEDDING_DURATION_SECONDS,
            memory::EMBEDDING_BATCH_FAILURES_TOTAL,
            memory::EMBEDDING_CACHE_HITS_TOTAL,
            memory::CHUNKS_INDEXED_TOTAL,
            memory::CHUNKS_REMOVED_TOTAL,
            memory::SEARCHES_TOTAL,
            memory::SEARCH_DURATION_SECONDS,
            memory::SEARCH_SIGNAL_FAILURES_TOTAL,
        ] {
            assert!(name.starts_with("mnemo_memory_"), "{name}");
        }
    }
}
