//! Question → candidate passages.

use std::sync::Arc;

use tracing::{debug, error};

use crate::config::RetryPolicy;
use crate::document::Candidate;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::retry::with_retry;
use crate::slot::IndexSlot;

/// Embeds a question and pulls the `candidate_count` nearest chunks from the
/// index.
///
/// The breadth should be larger than the final context size since re-ranking
/// narrows the set further.
pub struct Retriever {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    slot: Arc<IndexSlot>,
    candidate_count: usize,
    min_similarity: Option<f32>,
    retry: RetryPolicy,
}

impl Retriever {
    /// Create a retriever over the index held in `slot`.
    pub fn new(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        slot: Arc<IndexSlot>,
        candidate_count: usize,
    ) -> Self {
        Self {
            embedding_provider,
            slot,
            candidate_count,
            min_similarity: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Drop candidates scoring below `threshold`.
    pub fn with_min_similarity(mut self, threshold: Option<f32>) -> Self {
        self.min_similarity = threshold;
        self
    }

    /// Set the retry policy for the question embedding call.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Number of candidates requested from the index.
    pub fn candidate_count(&self) -> usize {
        self.candidate_count
    }

    /// Retrieve candidates for `question`, most similar first.
    ///
    /// The index is checked before the embedding call, so asking before any
    /// upload fails fast without touching the network.
    ///
    /// # Errors
    ///
    /// - [`RagError::NotIndexed`](crate::RagError::NotIndexed) if no index exists yet
    /// - [`RagError::EmbeddingError`](crate::RagError::EmbeddingError) if embedding the question fails
    /// - [`RagError::DataError`](crate::RagError::DataError) if the question vector does not fit the index
    pub async fn retrieve(&self, question: &str) -> Result<Vec<Candidate>> {
        let index = self.slot.require()?;

        let provider = self.embedding_provider.as_ref();
        let query_embedding =
            with_retry(&self.retry, "embed_query", || provider.embed_query(question))
                .await
                .inspect_err(|e| error!(error = %e, "embedding failed during retrieval"))?;

        let mut candidates = index.search(&query_embedding, self.candidate_count)?;
        if let Some(threshold) = self.min_similarity {
            candidates.retain(|c| c.score >= threshold);
        }

        debug!(
            stage = "retrieved",
            candidate_count = candidates.len(),
            requested = self.candidate_count,
            "retrieved candidates"
        );
        Ok(candidates)
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedding_provider", &self.embedding_provider.name())
            .field("candidate_count", &self.candidate_count)
            .field("min_similarity", &self.min_similarity)
            .finish()
    }
}
