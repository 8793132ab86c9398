//! Reranker trait for re-scoring retrieved candidates.

use async_trait::async_trait;

use crate::document::{Candidate, PassageId};
use crate::error::Result;

/// A relevance score assigned to one candidate by a [`Reranker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankScore {
    /// The candidate this score belongs to.
    pub id: PassageId,
    /// Relevance to the question; higher is more relevant.
    pub score: f32,
}

/// A reranker that re-scores and reorders candidates against the question.
///
/// Implementations can use cross-encoder services, LLM-based scoring, or
/// other strategies to improve precision beyond initial vector similarity.
/// Scores are keyed by [`PassageId`] so callers never need to match passages
/// by text.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score `candidates` against `query`.
    ///
    /// Returns scores most relevant first. The result may cover fewer
    /// candidates than were supplied.
    async fn rerank(&self, query: &str, candidates: &[Candidate]) -> Result<Vec<RerankScore>>;

    /// Short name used in errors and logs.
    fn name(&self) -> &str;
}

/// A reranker that keeps the retrieval order and similarity scores.
///
/// Useful when no re-ranking service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(&self, _query: &str, candidates: &[Candidate]) -> Result<Vec<RerankScore>> {
        Ok(candidates.iter().map(|c| RerankScore { id: c.id, score: c.score }).collect())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
