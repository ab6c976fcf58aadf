
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::{KbError, ProviderErrorKind, Result};

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Client for OpenAI-compatible `/embeddings` endpoints
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    agent: ureq::Agent,
    timeout: Duration,
    retry_attempts: u32,
    backoff: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    /// Build a client from configuration, reading the API key from the configured variable
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key();
        if api_key.is_none() {
            warn!(
                "Environment variable {} is not set; sending requests without an API key",
                config.api_key_env
            );
        }
        Self::with_api_key(config, api_key)
    }

    #[inline]
    pub fn with_api_key(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self> {
        let endpoint = config
            .api_base_url()
            .and_then(|base| {
                base.join("embeddings")
                    .map_err(|_| crate::config::ConfigError::InvalidUrl(config.api_base.clone()))
            })
            .map_err(|e| KbError::provider(ProviderErrorKind::Configuration, e.to_string()))?;

        let timeout = Duration::from_secs(config.request_timeout_secs);

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            api_key,
            agent: build_agent(timeout),
            timeout,
            retry_attempts: config.retry_attempts.max(1),
            backoff: DEFAULT_BACKOFF,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; doubles on every further attempt
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 1;
        loop {
            debug!(
                "Embedding request attempt {}/{} ({} inputs)",
                attempt,
                self.retry_attempts,
                texts.len()
            );

            match self.request_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() && attempt < self.retry_attempts => {
                    let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                    warn!(
                        "{}, attempt {}/{}; retrying in {:?}",
                        e, attempt, self.retry_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "Embedding request to {} failed after {} attempt(s): {}",
                        self.endpoint, attempt, e
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = self.clone();
        let inputs = texts.to_vec();
        let call = tokio::task::spawn_blocking(move || client.post_embeddings(&inputs));

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(KbError::Other(anyhow::anyhow!(
                "Embedding task failed: {}",
                join_error
            ))),
            Err(_) => Err(KbError::provider(
                ProviderErrorKind::Timeout,
                format!("no response within {:?}", self.timeout),
            )),
        }
    }

    fn post_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request_json = serde_json::to_string(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        })
        .map_err(|e| {
            KbError::provider(
                ProviderErrorKind::Configuration,
                format!("Failed to serialize embedding request: {e}"),
            )
        })?;

        let mut request = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response_text = request
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(classify_error)?;

        parse_response(&response_text, texts.len())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    #[inline]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_with_retry(texts).await
    }

    #[inline]
    fn model(&self) -> &str {
        &self.model
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn classify_error(error: ureq::Error) -> KbError {
    let kind = match &error {
        ureq::Error::StatusCode(401 | 403) => ProviderErrorKind::Auth,
        ureq::Error::StatusCode(429) => ProviderErrorKind::Quota,
        ureq::Error::StatusCode(status) if *status >= 500 => ProviderErrorKind::Server,
        ureq::Error::StatusCode(_) | ureq::Error::BadUri(_) => ProviderErrorKind::Configuration,
        ureq::Error::Timeout(_) => ProviderErrorKind::Timeout,
        _ => ProviderErrorKind::Transport,
    };

    let message = match &error {
        ureq::Error::StatusCode(status) => format!("HTTP {status}"),
        other => other.to_string(),
    };

    KbError::provider(kind, message)
}

/// Vectors ordered by the `index` field, one per input
fn parse_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let response: EmbeddingResponse = serde_json::from_str(body).map_err(|e| {
        KbError::provider(
            ProviderErrorKind::InvalidResponse,
            format!("Failed to parse embedding response: {e}"),
        )
    })?;

    if response.data.len() != expected {
        return Err(KbError::provider(
            ProviderErrorKind::InvalidResponse,
            format!(
                "Mismatch between request and response counts: {} vs {}",
                expected,
                response.data.len()
            ),
        ));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in response.data {
        match slots.get_mut(item.index) {
            Some(slot @ None) => *slot = Some(item.embedding),
            _ => {
                return Err(KbError::provider(
                    ProviderErrorKind::InvalidResponse,
                    format!("Unexpected or duplicate embedding index {}", item.index),
                ));
            }
        }
    }

    Ok(slots.into_iter().flatten().collect())
}
