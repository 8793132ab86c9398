//! Re-rank integration and context assembly.
//!
//! [`ContextAssembler`] sends the retriever's candidates to the [`Reranker`]
//! in one call, joins the returned scores back to their chunks by
//! [`PassageId`](crate::PassageId), keeps the top `context_size`, and renders
//! the text block handed to the answer generator.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::RetryPolicy;
use crate::document::{Candidate, RerankedResult};
use crate::error::{RagError, Result};
use crate::reranker::Reranker;
use crate::retry::with_retry;

/// The exact input handed to the answer generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryContext {
    /// The user's question.
    pub question: String,
    /// Re-ranked passages, most relevant first.
    pub passages: Vec<RerankedResult>,
    /// Rendered context followed by the question.
    pub text: String,
}

/// Re-ranks candidates and builds the [`QueryContext`].
pub struct ContextAssembler {
    reranker: Arc<dyn Reranker>,
    context_size: usize,
    retry: RetryPolicy,
}

impl ContextAssembler {
    /// Create an assembler keeping at most `context_size` passages.
    pub fn new(reranker: Arc<dyn Reranker>, context_size: usize) -> Self {
        Self { reranker, context_size, retry: RetryPolicy::default() }
    }

    /// Set the retry policy for the re-ranking call.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Maximum number of passages kept in the context.
    pub fn context_size(&self) -> usize {
        self.context_size
    }

    /// Re-rank `candidates` against `question` and keep the top `context_size`.
    ///
    /// The order returned by the reranker is preserved. When it returns fewer
    /// scores than candidates, exactly those are used.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::RerankerError`] if the call fails or a returned
    /// score refers to a passage that was not sent.
    pub async fn rerank(
        &self,
        question: &str,
        candidates: Vec<Candidate>,
    ) -> Result<Vec<RerankedResult>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let reranker = self.reranker.as_ref();
        let scores = with_retry(&self.retry, "rerank", || reranker.rerank(question, &candidates))
            .await
            .inspect_err(|e| error!(error = %e, "reranking failed"))?;

        let requested = candidates.len();
        let mut by_id: HashMap<_, _> = candidates.into_iter().map(|c| (c.id, c)).collect();
        let mut results = Vec::with_capacity(self.context_size.min(scores.len()));
        for score in scores {
            if results.len() == self.context_size {
                break;
            }
            match by_id.remove(&score.id) {
                Some(candidate) => results.push(RerankedResult {
                    id: candidate.id,
                    chunk: candidate.chunk,
                    relevance: score.score,
                }),
                None if results.iter().any(|r: &RerankedResult| r.id == score.id) => {
                    warn!(id = %score.id, "reranker returned a passage twice; keeping the first");
                }
                None => {
                    return Err(RagError::RerankerError {
                        reranker: reranker.name().to_string(),
                        message: format!("response refers to unknown passage {}", score.id),
                        transient: false,
                    });
                }
            }
        }

        debug!(stage = "reranked", requested, kept = results.len(), "reranked candidates");
        Ok(results)
    }

    /// Render the generator input: each passage annotated with its source,
    /// in order, followed by the question.
    pub fn assemble(&self, question: &str, passages: Vec<RerankedResult>) -> QueryContext {
        let mut text = String::new();
        for passage in &passages {
            let chunk = &passage.chunk;
            let source = chunk.metadata.get("name").unwrap_or(&chunk.document_id);
            let _ = writeln!(
                text,
                "Context: {} (Source: {source}, chunk {})",
                chunk.text, chunk.index
            );
        }
        let _ = writeln!(text, "Question: {question}");
        debug!(stage = "assembled", passages = passages.len(), chars = text.len(), "assembled context");
        QueryContext { question: question.to_string(), passages, text }
    }
}

impl std::fmt::Debug for ContextAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextAssembler")
            .field("reranker", &self.reranker.name())
            .field("context_size", &self.context_size)
            .finish()
    }
}
