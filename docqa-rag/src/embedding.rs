//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap a specific embedding backend behind a unified async
/// interface. Passages and questions are embedded through separate methods
/// because retrieval-tuned models encode the two sides differently; backends
/// without that distinction can rely on the default
/// [`embed_query`](EmbeddingProvider::embed_query).
///
/// Every vector a provider returns must have [`dimensions`](EmbeddingProvider::dimensions)
/// components.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate one embedding per passage, in input order.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Generate an embedding for a search question.
    ///
    /// The default implementation embeds the question as a single passage.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text]).await?.into_iter().next().ok_or_else(|| {
            RagError::EmbeddingError {
                provider: self.name().to_string(),
                message: "provider returned no embedding for the query".to_string(),
                transient: false,
            }
        })
    }

    /// Largest number of passages one [`embed_documents`](EmbeddingProvider::embed_documents)
    /// call should carry, or `None` for no limit.
    ///
    /// Indexing splits its input accordingly and retries each batch on its own.
    fn max_batch_size(&self) -> Option<usize> {
        None
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Short name used in errors and logs.
    fn name(&self) -> &str;
}
