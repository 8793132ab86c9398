//! Embedding provider and answer generator for OpenAI-compatible APIs.
//!
//! Both talk to `{base_url}/embeddings` and `{base_url}/chat/completions`
//! directly with `reqwest`. Hosted NVIDIA endpoints
//! (`https://integrate.api.nvidia.com/v1`) speak the same protocol, plus an
//! `input_type` field that tells retrieval models whether they are encoding
//! a passage or a query.
//!
//! This module is only available when the `http` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generator::AnswerGenerator;
use crate::http::{self, CallFailure};

/// The default OpenAI-compatible API base.
pub const DEFAULT_BASE_URL: &str = "https://integrate.api.nvidia.com/v1";

/// The default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "nvidia/nv-embedqa-mistral-7b-v2";

/// The dimensionality of [`DEFAULT_EMBEDDING_MODEL`].
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 4096;

/// The default chat model.
pub const DEFAULT_CHAT_MODEL: &str = "meta/llama-3.1-70b-instruct";

const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{path}", base_url.trim_end_matches('/'))
}

// ── Embeddings ─────────────────────────────────────────────────────

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible `/embeddings` endpoint.
///
/// # Configuration
///
/// - `model` – defaults to `nvidia/nv-embedqa-mistral-7b-v2`.
/// - `dimensions` – expected vector length, checked on every response.
/// - `input_types` – when set, sent as `input_type` (`passage` / `query`).
/// - `batch_size` – passages per request, default 32.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::openai::OpenAiEmbeddingProvider;
///
/// let provider = OpenAiEmbeddingProvider::new("nvapi-...", docqa_rag::openai::DEFAULT_BASE_URL)?
///     .with_input_types("passage", "query");
/// let vectors = provider.embed_documents(&["hello world"]).await?;
/// ```
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
    input_types: Option<(String, String)>,
}

impl OpenAiEmbeddingProvider {
    /// Create a provider for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the API key is empty or the HTTP
    /// client cannot be built.
    pub fn new(api_key: impl Into<String>, base_url: &str) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::ConfigError("embedding API key must not be empty".into()));
        }
        Ok(Self {
            client: http::client(DEFAULT_TIMEOUT).map_err(RagError::ConfigError)?,
            api_key,
            url: endpoint(base_url, "embeddings"),
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            input_types: None,
        })
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the expected embedding dimensionality.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self
    }

    /// Send `input_type` with each request: `passage` for documents, `query` for questions.
    pub fn with_input_types(mut self, passage: impl Into<String>, query: impl Into<String>) -> Self {
        self.input_types = Some((passage.into(), query.into()));
        self
    }

    /// Set the maximum number of texts per request. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the HTTP client cannot be rebuilt.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = http::client(timeout).map_err(RagError::ConfigError)?;
        Ok(self)
    }

    fn failure(&self, failure: CallFailure) -> RagError {
        error!(provider = %self.model, error = %failure.message, "embedding request failed");
        RagError::EmbeddingError {
            provider: self.model.clone(),
            message: failure.message,
            transient: failure.transient,
        }
    }

    async fn request(&self, texts: &[&str], input_type: Option<&str>) -> Result<Vec<Vec<f32>>> {
        debug!(provider = %self.model, batch_size = texts.len(), input_type, "embedding batch");

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            input_type,
            encoding_format: "float",
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.failure(http::request_failure(&e)))?;

        if !response.status().is_success() {
            return Err(self.failure(http::status_failure(response).await));
        }

        let mut parsed: EmbeddingResponse =
            http::read_json(response).await.map_err(|f| self.failure(f))?;
        parsed.data.sort_by_key(|d| d.index);
        let embeddings: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        check_embeddings(&self.model, &embeddings, texts.len(), self.dimensions)?;
        Ok(embeddings)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'a str>,
    encoding_format: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Check that a response holds `expected` vectors of `dimensions` components.
fn check_embeddings(
    provider: &str,
    embeddings: &[Vec<f32>],
    expected: usize,
    dimensions: usize,
) -> Result<()> {
    if embeddings.len() != expected {
        return Err(RagError::EmbeddingError {
            provider: provider.to_string(),
            message: format!("expected {expected} embeddings, received {}", embeddings.len()),
            transient: false,
        });
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dimensions) {
        return Err(RagError::EmbeddingError {
            provider: provider.to_string(),
            message: format!("expected {dimensions}-dimensional embeddings, received {}", bad.len()),
            transient: false,
        });
    }
    Ok(())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let input_type = self.input_types.as_ref().map(|(passage, _)| passage.as_str());
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            embeddings.extend(self.request(batch, input_type).await?);
        }
        Ok(embeddings)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let input_type = self.input_types.as_ref().map(|(_, query)| query.as_str());
        self.request(&[text], input_type).await?.pop().ok_or_else(|| {
            self.failure(CallFailure {
                message: "no embedding returned for the query".to_string(),
                transient: false,
            })
        })
    }

    fn max_batch_size(&self) -> Option<usize> {
        Some(self.batch_size)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ── Chat completions ───────────────────────────────────────────────

/// An [`AnswerGenerator`] backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatGenerator {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiChatGenerator {
    /// Create a generator for the API rooted at `base_url`.
    ///
    /// Uses `meta/llama-3.1-70b-instruct` at temperature 0.5.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the API key is empty or the HTTP
    /// client cannot be built.
    pub fn new(api_key: impl Into<String>, base_url: &str) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::ConfigError("chat API key must not be empty".into()));
        }
        Ok(Self {
            client: http::client(DEFAULT_TIMEOUT).map_err(RagError::ConfigError)?,
            api_key,
            url: endpoint(base_url, "chat/completions"),
            model: DEFAULT_CHAT_MODEL.into(),
            temperature: 0.5,
            max_tokens: None,
        })
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Cap the length of generated answers.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the HTTP client cannot be rebuilt.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = http::client(timeout).map_err(RagError::ConfigError)?;
        Ok(self)
    }

    fn failure(&self, failure: CallFailure) -> RagError {
        error!(model = %self.model, error = %failure.message, "chat completion failed");
        RagError::GenerationError {
            model: self.model.clone(),
            message: failure.message,
            transient: failure.transient,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl AnswerGenerator for OpenAiChatGenerator {
    async fn generate(&self, system_instruction: &str, input: &str) -> Result<String> {
        debug!(model = %self.model, input_len = input.len(), "requesting chat completion");

        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: system_instruction },
                ChatMessage { role: "user", content: input },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.failure(http::request_failure(&e)))?;

        if !response.status().is_success() {
            return Err(self.failure(http::status_failure(response).await));
        }

        let parsed: ChatResponse = http::read_json(response).await.map_err(|f| self.failure(f))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                self.failure(CallFailure {
                    message: "response contained no answer text".into(),
                    transient: false,
                })
            })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(
            endpoint("https://integrate.api.nvidia.com/v1/", "embeddings"),
            "https://integrate.api.nvidia.com/v1/embeddings"
        );
        assert_eq!(endpoint("http://localhost:8080/v1", "chat/completions"),
            "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn empty_api_key_is_a_configuration_error() {
        assert!(matches!(
            OpenAiEmbeddingProvider::new("", DEFAULT_BASE_URL),
            Err(RagError::ConfigError(_))
        ));
        assert!(matches!(
            OpenAiChatGenerator::new("", DEFAULT_BASE_URL),
            Err(RagError::ConfigError(_))
        ));
    }

    #[test]
    fn embedding_request_includes_input_type_only_when_set() {
        let texts = ["a", "b"];
        let with = EmbeddingRequest {
            model: "m",
            input: &texts,
            input_type: Some("passage"),
            encoding_format: "float",
        };
        let json = serde_json::to_value(&with).unwrap();
        assert_eq!(json["input_type"], "passage");
        assert_eq!(json["input"], serde_json::json!(["a", "b"]));

        let without =
            EmbeddingRequest { model: "m", input: &texts, input_type: None, encoding_format: "float" };
        assert!(serde_json::to_value(&without).unwrap().get("input_type").is_none());
    }

    #[test]
    fn response_count_and_dimensions_are_checked() {
        let ok = vec![vec![0.0; 3], vec![1.0; 3]];
        assert!(check_embeddings("m", &ok, 2, 3).is_ok());
        assert!(check_embeddings("m", &ok, 3, 3).is_err());
        assert!(check_embeddings("m", &ok, 2, 4).is_err());
    }
}
