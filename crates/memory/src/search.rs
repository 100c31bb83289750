//! Hybrid retrieval: vector similarity and lexical ranking merged by weighted
//! union.
//!
//! A chunk found by either signal is a candidate. Its final score is
//! `vector_weight * cosine + keyword_weight * 1 / (1 + lexical_rank)`, where a
//! missing signal contributes zero.

use std::{cmp::Ordering, collections::HashMap, time::Duration};

use {
    serde::Serialize,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use mnemo_metrics::{counter, histogram, labels, memory as mem_metrics};

use crate::{
    embedder::Embedder,
    schema::blob_to_vector,
    store::{KeywordHit, LineRange, MemoryStore},
};

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub source_file: String,
    pub line_start: usize,
    pub line_end: usize,
    /// Weighted union score, rounded to three decimals.
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    pub vector_weight: f32,
    pub keyword_weight: f32,
    /// Each signal retrieves `top_k * candidate_multiplier` candidates.
    pub candidate_multiplier: usize,
    /// Upper bound for each retrieval signal.
    pub timeout: Duration,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            keyword_weight: 0.3,
            candidate_multiplier: 4,
            timeout: Duration::from_secs(10),
        }
    }
}

/// A free-text query reduced to plain terms, safe to hand to FTS5.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexicalQuery {
    terms: Vec<String>,
}

impl LexicalQuery {
    /// Split on anything that is not alphanumeric or `_`, drop one-character
    /// terms and duplicates.
    pub fn parse(query: &str) -> Self {
        let mut terms: Vec<String> = Vec::new();
        for word in query.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
            if word.chars().count() <= 1 {
                continue;
            }
            let term = word.to_lowercase();
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
        Self { terms }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// `"a" OR "b"`: each term quoted so FTS5 operators in the input are inert.
    pub fn to_fts_expression(&self) -> String {
        self.terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

/// Cosine similarity; `0.0` for empty, mismatched or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

/// Score of the lexical hit at 0-based position `rank`.
pub fn lexical_score(rank: usize) -> f32 {
    1.0 / (1.0 + rank as f32)
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorCandidate {
    pub id: String,
    pub content: String,
    pub source_file: String,
    pub line_start: usize,
    pub line_end: usize,
    pub similarity: f32,
}

/// Run both retrievals concurrently and merge them. Never fails: a signal
/// that errors or times out contributes no candidates.
pub async fn hybrid_search(
    store: &dyn MemoryStore,
    embedder: &Embedder,
    query: &str,
    top_k: usize,
    params: &SearchParams,
) -> Vec<SearchResult> {
    if top_k == 0 {
        return Vec::new();
    }

    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    let candidates = top_k.saturating_mul(params.candidate_multiplier.max(1));
    let lexical_query = LexicalQuery::parse(query);

    let (vector, lexical) = tokio::join!(
        tokio::time::timeout(
            params.timeout,
            vector_candidates(store, embedder, query, candidates)
        ),
        tokio::time::timeout(
            params.timeout,
            store.keyword_search(&lexical_query, candidates)
        ),
    );

    let vector = match vector {
        Ok(Ok(found)) => found,
        Ok(Err(e)) => {
            warn!(error = %e, "vector retrieval failed");
            record_signal_failure("vector");
            Vec::new()
        },
        Err(_) => {
            warn!(
                timeout_secs = params.timeout.as_secs_f64(),
                "vector retrieval timed out"
            );
            record_signal_failure("vector");
            Vec::new()
        },
    };
    let lexical = match lexical {
        Ok(Ok(found)) => found,
        Ok(Err(e)) => {
            warn!(error = %e, "lexical retrieval failed");
            record_signal_failure("lexical");
            Vec::new()
        },
        Err(_) => {
            warn!(
                timeout_secs = params.timeout.as_secs_f64(),
                "lexical retrieval timed out"
            );
            record_signal_failure("lexical");
            Vec::new()
        },
    };

    let lexical_only: Vec<String> = lexical
        .iter()
        .filter(|hit| !vector.iter().any(|v| v.id == hit.id))
        .map(|hit| hit.id.clone())
        .collect();
    let ranges = match tokio::time::timeout(params.timeout, store.line_ranges(&lexical_only)).await {
        Ok(Ok(ranges)) => ranges,
        Ok(Err(e)) => {
            warn!(error = %e, "failed to resolve line ranges for lexical hits");
            HashMap::new()
        },
        Err(_) => {
            warn!(
                timeout_secs = params.timeout.as_secs_f64(),
                "line range lookup timed out"
            );
            HashMap::new()
        },
    };

    let vector_count = vector.len();
    let lexical_count = lexical.len();
    let results = merge_weighted(vector, lexical, &ranges, params, top_k);

    let preview: String = query.chars().take(40).collect();
    debug!(
        query = %preview,
        vector = vector_count,
        lexical = lexical_count,
        results = results.len(),
        "hybrid search"
    );

    #[cfg(feature = "metrics")]
    {
        counter!(mem_metrics::SEARCHES_TOTAL).increment(1);
        histogram!(mem_metrics::SEARCH_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
    }

    results
}

async fn vector_candidates(
    store: &dyn MemoryStore,
    embedder: &Embedder,
    query: &str,
    limit: usize,
) -> anyhow::Result<Vec<VectorCandidate>> {
    if !embedder.is_available() {
        return Ok(Vec::new());
    }
    let query_vector = embedder.embed(query).await;
    if query_vector.is_empty() {
        return Ok(Vec::new());
    }

    let mut scored: Vec<VectorCandidate> = store
        .embedded_chunks()
        .await?
        .into_iter()
        .map(|chunk| {
            let similarity = cosine_similarity(&query_vector, &blob_to_vector(&chunk.embedding));
            VectorCandidate {
                id: chunk.id,
                content: chunk.content,
                source_file: chunk.source_file,
                line_start: chunk.line_start.max(0) as usize,
                line_end: chunk.line_end.max(0) as usize,
                similarity,
            }
        })
        .collect();
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(limit);
    Ok(scored)
}

/// Weighted union of both candidate lists, best first, at most `top_k`.
///
/// Lexical hits are scored by position. Lexical-only hits take their line
/// range from `ranges`, or `0..0` when it is unknown.
pub fn merge_weighted(
    vector: Vec<VectorCandidate>,
    lexical: Vec<KeywordHit>,
    ranges: &HashMap<String, LineRange>,
    params: &SearchParams,
    top_k: usize,
) -> Vec<SearchResult> {
    struct Merged {
        result: SearchResult,
        vector_score: f32,
        lexical_score: f32,
    }

    let mut merged: HashMap<String, Merged> = HashMap::new();
    for candidate in vector {
        merged.insert(candidate.id.clone(), Merged {
            result: SearchResult {
                id: candidate.id,
                content: candidate.content,
                source_file: candidate.source_file,
                line_start: candidate.line_start,
                line_end: candidate.line_end,
                score: 0.0,
            },
            vector_score: candidate.similarity,
            lexical_score: 0.0,
        });
    }

    for (rank, hit) in lexical.into_iter().enumerate() {
        let score = lexical_score(rank);
        match merged.get_mut(&hit.id) {
            Some(entry) => entry.lexical_score = entry.lexical_score.max(score),
            None => {
                let range = ranges.get(&hit.id).copied().unwrap_or(LineRange {
                    line_start: 0,
                    line_end: 0,
                });
                merged.insert(hit.id.clone(), Merged {
                    result: SearchResult {
                        id: hit.id,
                        content: hit.content,
                        source_file: hit.source_file,
                        line_start: range.line_start,
                        line_end: range.line_end,
                        score: 0.0,
                    },
                    vector_score: 0.0,
                    lexical_score: score,
                });
            },
        }
    }

    let mut results: Vec<SearchResult> = merged
        .into_values()
        .map(|m| SearchResult {
            score: params.vector_weight * m.vector_score + params.keyword_weight * m.lexical_score,
            ..m.result
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.source_file.cmp(&b.source_file))
            .then_with(|| a.line_start.cmp(&b.line_start))
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(top_k);
    for result in &mut results {
        result.score = round3(result.score);
    }
    results
}

fn round3(score: f32) -> f32 {
    (score * 1000.0).round() / 1000.0
}

#[allow(unused_variables)]
fn record_signal_failure(signal: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(mem_metrics::SEARCH_SIGNAL_FAILURES_TOTAL, labels::SIGNAL => signal).increment(1);
}
