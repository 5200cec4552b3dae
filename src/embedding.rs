//! Embedding providers and the retrying embedding gateway.
//!
//! Providers implement [`Embedder`] with one HTTP call per `embed`:
//! - **[`DisabledEmbedder`]**: always errors; used when `embedding.provider = "disabled"`.
//! - **[`OpenAIEmbedder`]**: `POST {url}/embeddings` (OpenAI-compatible).
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama.
//!
//! [`EmbeddingGateway`] wraps a provider with bounded retries and
//! exponential backoff (`base * 2^(attempt-1)`) and converts the outcome
//! into a typed [`RagError`]. The backoff sleep is cancellable through a
//! [`CancellationToken`]; cancellation turns the pending retry into an
//! immediate failure.
//!
//! ```rust,no_run
//! # use grounded::config::EmbeddingConfig;
//! # use grounded::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use grounded_core::embedding::Embedder;
use grounded_core::RagError;

use crate::config::EmbeddingConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Build the provider selected by `config.provider`.
///
/// # Errors
///
/// Returns an error for unknown provider names, a missing model, or a
/// missing `OPENAI_API_KEY` for the OpenAI provider.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn parse_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

// ============ Disabled Provider ============

/// Provider that refuses to embed.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// OpenAI-compatible embeddings endpoint.
///
/// Requires `OPENAI_API_KEY` when built from configuration.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());
        Self::with_api_key(&url, &api_key, &model, config.dims.unwrap_or(0), config.timeout_secs)
    }

    pub fn with_api_key(
        url: &str,
        api_key: &str,
        model: &str,
        dims: usize,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[0].embedding` from an embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    json.get("data")
        .and_then(|d| d.as_array())
        .and_then(|items| items.first())
        .and_then(|item| item.get("embedding"))
        .and_then(parse_vector)
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data[0].embedding"))
}

// ============ Ollama Provider ============

/// Local Ollama instance (`ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let url = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims: config.dims.unwrap_or(0),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|items| items.first())
        .and_then(parse_vector)
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings[0]"))
}

// ============ Gateway ============

/// Retry budget for the embedding gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt-1)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_backoff.saturating_mul(1u32 << exp)
    }
}

/// Retrying, cancellable front for an [`Embedder`].
///
/// Stateless apart from its configuration; clone it freely across tasks.
#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn Embedder>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn Embedder>, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            provider,
            policy,
            cancel,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Embed `text`, retrying provider errors.
    ///
    /// # Errors
    ///
    /// - `EmptyInput` for blank text (no provider call).
    /// - `EmbeddingFailure` once all attempts failed, carrying the last cause.
    ///   A vector of the wrong dimensionality also fails immediately.
    /// - `Cancelled` if the token fires during a backoff sleep.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        if text.trim().is_empty() {
            return Err(RagError::empty_input("cannot embed empty text"));
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 1..=max_attempts {
            match self.provider.embed(text).await {
                Ok(vector) => return self.check_dims(vector),
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts,
                        model = self.provider.model_name(),
                        error = %e,
                        "embedding attempt failed"
                    );
                    last_err = Some(e);
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.backoff_for(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        let err = RagError::cancelled(format!(
                            "embedding retry interrupted after {} of {} attempts",
                            attempt, max_attempts
                        ));
                        return Err(match last_err {
                            Some(e) => err.with_source(e),
                            None => err,
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let last = last_err.unwrap_or_else(|| anyhow!("no attempts made"));
        Err(RagError::embedding(format!(
            "failed after {} attempts: {}",
            max_attempts, last
        ))
        .with_source(last))
    }

    fn check_dims(&self, vector: Vec<f32>) -> Result<Vec<f32>, RagError> {
        if vector.is_empty() {
            return Err(RagError::embedding("provider returned an empty vector"));
        }
        let expected = self.provider.dims();
        if expected > 0 && vector.len() != expected {
            return Err(RagError::embedding(format!(
                "expected {} dimensions, provider returned {}",
                expected,
                vector.len()
            )));
        }
        Ok(vector)
    }
}
