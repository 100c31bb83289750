//! OpenAI-compatible embeddings provider using the `/v1/embeddings` endpoint.
use std::time::Duration;

use async_trait::async_trait;
use {
    secrecy::ExposeSecret,
    serde::{Deserialize, Serialize},
};

#[cfg(feature = "metrics")]
use mnemo_metrics::{counter, histogram, labels, memory as mem_metrics};

use crate::{chunker::sha256_hex, embeddings::EmbeddingProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMS: usize = 1536;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: secrecy::Secret<String>,
    base_url: String,
    model: String,
    dims: usize,
    timeout: Duration,
    provider_key: String,
}

fn compute_provider_key(base_url: &str, model: &str) -> String {
    sha256_hex(&format!("openai:{base_url}:{model}"))[..16].to_string()
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Resolve the embeddings URL for a base URL. A full `/embeddings` URL is
/// used as given; a base ending in an API version segment (`/v1`, `/v4`, ...)
/// gets `/embeddings`; a bare host gets `/v1/embeddings`.
fn embeddings_endpoint(base_url: &str) -> String {
    let base = normalize_base_url(base_url);
    let last = base.rsplit('/').next().unwrap_or_default();
    let versioned = last
        .strip_prefix('v')
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
    match (last, versioned) {
        ("embeddings", _) => base,
        (_, true) => format!("{base}/embeddings"),
        _ => format!("{base}/v1/embeddings"),
    }
}

impl OpenAiEmbeddingProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: secrecy::Secret::new(api_key.into()),
            base_url: normalize_base_url(DEFAULT_BASE_URL),
            model: DEFAULT_MODEL.to_string(),
            dims: DEFAULT_DIMS,
            timeout: DEFAULT_TIMEOUT,
            provider_key: String::new(),
        }
        .rekey()
    }

    pub fn with_model(self, model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            dims,
            ..self
        }
        .rekey()
    }

    pub fn with_base_url(self, url: impl AsRef<str>) -> Self {
        Self {
            base_url: normalize_base_url(url.as_ref()),
            ..self
        }
        .rekey()
    }

    /// Per-request timeout applied to every HTTP call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn rekey(mut self) -> Self {
        self.provider_key = compute_provider_key(&self.base_url, &self.model);
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Restore input order; the API tags each item with its input index, and
/// every index in `0..expected` must appear exactly once.
fn into_ordered(mut data: Vec<EmbeddingData>, expected: usize) -> anyhow::Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        anyhow::bail!(
            "embedding response has {} vectors for {expected} inputs",
            data.len()
        );
    }
    data.sort_by_key(|d| d.index);
    if data.iter().enumerate().any(|(i, d)| d.index != i) {
        anyhow::bail!("embedding response indices do not cover 0..{expected}");
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        #[cfg(feature = "metrics")]
        counter!(mem_metrics::EMBEDDINGS_GENERATED_TOTAL, labels::PROVIDER => "openai")
            .increment(texts.len() as u64);

        let req = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(embeddings_endpoint(&self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .timeout(self.timeout)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("embeddings API returned {status}: {body}");
        }
        let result = response.json::<EmbeddingResponse>().await;

        #[cfg(feature = "metrics")]
        histogram!(mem_metrics::EMBEDDING_DURATION_SECONDS, labels::PROVIDER => "openai")
            .record(start.elapsed().as_secs_f64());

        into_ordered(result?.data, texts.len())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_key(&self) -> &str {
        &self.provider_key
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn resolves_embeddings_endpoint() {
        for (base, expected) in [
            ("https://api.openai.com", "https://api.openai.com/v1/embeddings"),
            ("http://localhost:11434/", "http://localhost:11434/v1/embeddings"),
            ("http://localhost:8080/v1/", "http://localhost:8080/v1/embeddings"),
            ("https://gateway.example.net/openai/v2", "https://gateway.example.net/openai/v2/embeddings"),
            ("https://proxy.example.net/v1/embeddings", "https://proxy.example.net/v1/embeddings"),
            ("https://proxy.example.net/vision", "https://proxy.example.net/vision/v1/embeddings"),
        ] {
            assert_eq!(embeddings_endpoint(base), expected, "{base}");
        }
    }

    #[test]
    fn provider_key_tracks_model_and_base_url() {
        let a = OpenAiEmbeddingProvider::new("k");
        let b = OpenAiEmbeddingProvider::new("k")
            .with_model("text-embedding-3-large", 3072);
        let c = OpenAiEmbeddingProvider::new("k").with_base_url("http://localhost:8080");
        assert_eq!(a.provider_key().len(), 16);
        assert_ne!(a.provider_key(), b.provider_key());
        assert_ne!(a.provider_key(), c.provider_key());
        assert_eq!(b.dimensions(), 3072);
    }

    #[tokio::test]
    async fn embed_batch_restores_input_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]}"#,
            )
            .create_async()
            .await;

        let provider = OpenAiEmbeddingProvider::new("test-key").with_base_url(server.url());
        let vectors = provider
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_error_fails_the_batch() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let provider = OpenAiEmbeddingProvider::new("test-key").with_base_url(server.url());
        let err = provider
            .embed_batch(&["text".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"), "{err}");
    }

    #[tokio::test]
    async fn short_response_fails_the_batch() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_body(r#"{"data": [{"index": 0, "embedding": [1.0]}]}"#)
            .create_async()
            .await;

        let provider = OpenAiEmbeddingProvider::new("test-key").with_base_url(server.url());
        let result = provider
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn duplicate_indices_fail_the_batch() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_body(r#"{"data": [{"embedding": [1.0]}, {"embedding": [2.0]}]}"#)
            .create_async()
            .await;

        let provider = OpenAiEmbeddingProvider::new("test-key").with_base_url(server.url());
        let err = provider
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("indices"), "{err}");
    }

    #[tokio::test]
    async fn empty_batch_skips_the_network() {
        // Unroutable base URL: any request would fail.
        let provider =
            OpenAiEmbeddingProvider::new("k").with_base_url("http://127.0.0.1:1");
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
    }
}
