use std::{path::PathBuf, time::Duration};

use crate::{chunker::ChunkerOptions, search::SearchParams};

/// What to do with stored chunks when a document reads back empty or is gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyDocumentPolicy {
    /// Remove every stored chunk of the document.
    #[default]
    Purge,
    /// Keep the last indexed state.
    Keep,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MemoryConfigError {
    #[error("search weights must be non-negative (vector {vector}, keyword {keyword})")]
    NegativeWeight { vector: f32, keyword: f32 },

    #[error("search weights must sum to 1.0, got {0}")]
    WeightSum(f32),

    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    Overlap { overlap: usize, size: usize },

    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

/// Runtime settings for indexing and retrieval.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// SQLite database file; `:memory:` keeps everything in process.
    pub db_path: PathBuf,
    /// Root the document ids are relative to.
    pub workspace_dir: PathBuf,
    /// Workspace-relative files indexed individually.
    pub memory_files: Vec<String>,
    /// Workspace-relative directories scanned recursively for markdown files.
    pub memory_dirs: Vec<String>,
    pub chunker: ChunkerOptions,
    /// Share of the fused score given to cosine similarity.
    pub vector_weight: f32,
    /// Share of the fused score given to the lexical rank score.
    pub keyword_weight: f32,
    pub candidate_multiplier: usize,
    pub search_timeout: Duration,
    pub embed_batch_size: usize,
    pub embed_timeout: Duration,
    pub empty_document: EmptyDocumentPolicy,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("memory.db"),
            workspace_dir: PathBuf::from("workspace"),
            memory_files: vec!["MEMORY.md".into()],
            memory_dirs: vec!["memory".into(), "notes".into()],
            chunker: ChunkerOptions::default(),
            vector_weight: 0.7,
            keyword_weight: 0.3,
            candidate_multiplier: 4,
            search_timeout: Duration::from_secs(10),
            embed_batch_size: 100,
            embed_timeout: Duration::from_secs(30),
            empty_document: EmptyDocumentPolicy::Purge,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<(), MemoryConfigError> {
        if self.vector_weight < 0.0 || self.keyword_weight < 0.0 {
            return Err(MemoryConfigError::NegativeWeight {
                vector: self.vector_weight,
                keyword: self.keyword_weight,
            });
        }
        let sum = self.vector_weight + self.keyword_weight;
        if (sum - 1.0).abs() > 1e-4 {
            return Err(MemoryConfigError::WeightSum(sum));
        }
        if self.chunker.target_tokens == 0 {
            return Err(MemoryConfigError::Zero("chunk size"));
        }
        if self.chunker.chars_per_token == 0 {
            return Err(MemoryConfigError::Zero("chars per token"));
        }
        if self.chunker.overlap_tokens >= self.chunker.target_tokens {
            return Err(MemoryConfigError::Overlap {
                overlap: self.chunker.overlap_tokens,
                size: self.chunker.target_tokens,
            });
        }
        if self.candidate_multiplier == 0 {
            return Err(MemoryConfigError::Zero("candidate multiplier"));
        }
        if self.embed_batch_size == 0 {
            return Err(MemoryConfigError::Zero("embedding batch size"));
        }
        Ok(())
    }

    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            vector_weight: self.vector_weight,
            keyword_weight: self.keyword_weight,
            candidate_multiplier: self.candidate_multiplier,
            timeout: self.search_timeout,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(MemoryConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_weights() {
        let config = MemoryConfig {
            vector_weight: 1.2,
            keyword_weight: -0.2,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MemoryConfigError::NegativeWeight { .. })
        ));

        let config = MemoryConfig {
            vector_weight: 0.5,
            keyword_weight: 0.3,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MemoryConfigError::WeightSum(_))));
    }

    #[test]
    fn rejects_overlap_not_below_size() {
        let config = MemoryConfig {
            chunker: ChunkerOptions {
                target_tokens: 100,
                overlap_tokens: 100,
                chars_per_token: 4,
            },
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(MemoryConfigError::Overlap {
                overlap: 100,
                size: 100
            })
        );
    }

    #[test]
    fn search_params_follow_config() {
        let config = MemoryConfig {
            vector_weight: 0.4,
            keyword_weight: 0.6,
            candidate_multiplier: 2,
            ..Default::default()
        };
        let params = config.search_params();
        assert_eq!(params.vector_weight, 0.4);
        assert_eq!(params.keyword_weight, 0.6);
        assert_eq!(params.candidate_multiplier, 2);
    }
}
