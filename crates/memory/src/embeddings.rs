use async_trait::async_trait;

/// A remote or local model turning text into vectors.
///
/// Implementations return one vector per input, in input order, or an error
/// for the whole batch.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Identity of the vector space (provider + model). Persisted cache
    /// entries are only reused under the same key.
    fn provider_key(&self) -> &str {
        self.model_name()
    }
}
