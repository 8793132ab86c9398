//! Cross-encoder reranker backed by the NVIDIA retrieval reranking API.
//!
//! The service receives the question and the candidate texts and answers with
//! `rankings: [{index, logit}]`, most relevant first, where `index` is the
//! position of the passage in the request. Positions are mapped back to the
//! candidates' [`PassageId`](crate::PassageId)s, so passages with identical
//! text stay distinguishable.
//!
//! This module is only available when the `http` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::document::Candidate;
use crate::error::{RagError, Result};
use crate::http::{self, CallFailure};
use crate::reranker::{RerankScore, Reranker};

/// The default reranking endpoint.
pub const DEFAULT_RERANK_URL: &str =
    "https://ai.api.nvidia.com/v1/retrieval/nvidia/nv-rerankqa-mistral-4b-v3/reranking";

/// The default reranking model.
pub const DEFAULT_RERANK_MODEL: &str = "nvidia/nv-rerankqa-mistral-4b-v3";

/// A [`Reranker`] calling an NVIDIA-style `/reranking` endpoint.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::nvidia::{NvidiaReranker, DEFAULT_RERANK_URL};
///
/// let reranker = NvidiaReranker::new("nvapi-...", DEFAULT_RERANK_URL)?;
/// let scores = reranker.rerank("How do I paginate?", &candidates).await?;
/// ```
pub struct NvidiaReranker {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
}

impl NvidiaReranker {
    /// Create a reranker posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the API key is empty or the HTTP
    /// client cannot be built.
    pub fn new(api_key: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::ConfigError("reranker API key must not be empty".into()));
        }
        Ok(Self {
            client: http::client(Duration::from_secs(60)).map_err(RagError::ConfigError)?,
            api_key,
            url: url.into(),
            model: DEFAULT_RERANK_MODEL.into(),
        })
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
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
        error!(reranker = %self.model, error = %failure.message, "rerank request failed");
        RagError::RerankerError {
            reranker: self.model.clone(),
            message: failure.message,
            transient: failure.transient,
        }
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: TextField<'a>,
    passages: Vec<TextField<'a>>,
}

#[derive(Serialize)]
struct TextField<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct RerankResponse {
    rankings: Vec<Ranking>,
}

#[derive(Deserialize)]
struct Ranking {
    index: usize,
    logit: f32,
}

/// Map response positions back to candidate ids.
fn scores_from_rankings(
    rankings: Vec<Ranking>,
    candidates: &[Candidate],
) -> std::result::Result<Vec<RerankScore>, String> {
    rankings
        .into_iter()
        .map(|ranking| {
            candidates
                .get(ranking.index)
                .map(|c| RerankScore { id: c.id, score: ranking.logit })
                .ok_or_else(|| {
                    format!(
                        "ranking index {} out of range for {} passages",
                        ranking.index,
                        candidates.len()
                    )
                })
        })
        .collect()
}

#[async_trait]
impl Reranker for NvidiaReranker {
    async fn rerank(&self, query: &str, candidates: &[Candidate]) -> Result<Vec<RerankScore>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        debug!(reranker = %self.model, passages = candidates.len(), "reranking");

        let body = RerankRequest {
            model: &self.model,
            query: TextField { text: query },
            passages: candidates.iter().map(|c| TextField { text: &c.chunk.text }).collect(),
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.failure(http::request_failure(&e)))?;

        if !response.status().is_success() {
            return Err(self.failure(http::status_failure(response).await));
        }

        let parsed: RerankResponse =
            http::read_json(response).await.map_err(|f| self.failure(f))?;

        scores_from_rankings(parsed.rankings, candidates)
            .map_err(|message| self.failure(CallFailure { message, transient: false }))
    }

    fn name(&self) -> &str {
        &self.model
    }
}
