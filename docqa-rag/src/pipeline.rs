//! RAG pipeline orchestrator.
//!
//! The [`RagPipeline`] coordinates the build phase (chunk → embed → index →
//! persist) and the query phase (embed → retrieve → rerank → assemble →
//! generate) by composing an [`EmbeddingProvider`], a [`Chunker`], a
//! [`Reranker`] and an [`AnswerGenerator`] around a single [`IndexSlot`].
//!
//! Each query runs its stages strictly in order; a failing stage aborts the
//! query and its error is returned unchanged. Nothing is retried except the
//! individual external calls, under the configured [`RetryPolicy`].
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{RagPipeline, RagConfig, RecursiveChunker};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .reranker(Arc::new(reranker))
//!     .generator(Arc::new(generator))
//!     .snapshot_path("data/index.json")
//!     .build()?;
//!
//! pipeline.index_documents(documents).await?;
//! let answer = pipeline.ask("How do I authenticate?").await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{Instrument, error, info, info_span, warn};

use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::{RagConfig, RetryPolicy};
use crate::context::{ContextAssembler, QueryContext};
use crate::document::{Candidate, Document};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generator::{AnswerGenerator, DEFAULT_SYSTEM_INSTRUCTION};
use crate::index::{Similarity, VectorIndex};
use crate::reranker::Reranker;
use crate::retriever::Retriever;
use crate::retry::with_retry;
use crate::slot::IndexSlot;

/// Outcome of [`RagPipeline::index_documents`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexStatus {
    /// This call built (and persisted) the index.
    Created {
        /// Documents indexed.
        documents: usize,
        /// Chunks stored in the index.
        chunks: usize,
    },
    /// An index already existed; nothing was indexed.
    AlreadyExists,
}

/// The generated answer and the context it was conditioned on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// The generator's answer text.
    pub text: String,
    /// The context handed to the generator.
    pub context: QueryContext,
}

/// The RAG pipeline orchestrator.
///
/// Construct one via [`RagPipeline::builder()`].
pub struct RagPipeline {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
    generator: Arc<dyn AnswerGenerator>,
    slot: Arc<IndexSlot>,
    retriever: Retriever,
    assembler: ContextAssembler,
    system_instruction: String,
    snapshot_path: Option<PathBuf>,
    metric: Similarity,
    retry: RetryPolicy,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The slot holding the served index.
    pub fn slot(&self) -> &Arc<IndexSlot> {
        &self.slot
    }

    /// Whether an index has been built or loaded.
    pub fn is_indexed(&self) -> bool {
        self.slot.is_ready()
    }

    /// Where the index snapshot is written, if snapshotting is enabled.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Load the snapshot into an empty slot.
    ///
    /// Returns `true` if an index was loaded, `false` if snapshotting is
    /// disabled, no snapshot exists, or an index is already being served.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::SnapshotError`] or [`RagError::DataError`] if the
    /// snapshot exists but cannot be restored, and [`RagError::DataError`] if
    /// its dimensionality differs from the embedding provider's.
    pub async fn load_snapshot(&self) -> Result<bool> {
        let Some(path) = &self.snapshot_path else {
            return Ok(false);
        };
        if self.slot.is_ready() || !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(false);
        }
        let index = VectorIndex::load(path).await?;
        self.check_dimensions(&index)?;
        Ok(self.slot.set(index))
    }

    /// Build the index from `documents` unless one already exists.
    ///
    /// Concurrent calls share one build. On any failure the slot stays
    /// empty, so a half-built index is never served.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidInput`] if `documents` is empty
    /// - [`RagError::DataError`] naming the first document with no text
    /// - [`RagError::EmbeddingError`] if embedding fails
    /// - [`RagError::SnapshotError`] if persisting fails
    pub async fn index_documents(&self, documents: Vec<Document>) -> Result<IndexStatus> {
        if self.slot.is_ready() {
            info!(documents = documents.len(), "index already exists, skipping indexing");
            return Ok(IndexStatus::AlreadyExists);
        }

        let document_count = documents.len();
        let (index, built) = self
            .slot
            .get_or_try_build(|| self.build_index(documents))
            .instrument(info_span!("index_documents", documents = document_count))
            .await?;

        if built {
            Ok(IndexStatus::Created { documents: document_count, chunks: index.len() })
        } else {
            Ok(IndexStatus::AlreadyExists)
        }
    }

    async fn build_index(&self, documents: Vec<Document>) -> Result<VectorIndex> {
        if documents.is_empty() {
            return Err(RagError::InvalidInput("no documents to index".to_string()));
        }

        let mut chunks = Vec::new();
        for document in &documents {
            if document.text.trim().is_empty() {
                error!(document.id = %document.id, "document has no extractable text");
                return Err(RagError::data(&document.id, "extracted text is empty"));
            }
            let document_chunks = self.chunker.chunk(document);
            info!(document.id = %document.id, chunk_count = document_chunks.len(), "chunked document");
            chunks.extend(document_chunks);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let provider = self.embedding_provider.as_ref();
        let batch_size = provider.max_batch_size().unwrap_or(texts.len()).max(1);
        let mut embeddings = Vec::with_capacity(texts.len());
        // Each batch gets its own attempt budget; finished batches are never re-sent.
        for (batch, batch_texts) in texts.chunks(batch_size).enumerate() {
            let vectors =
                with_retry(&self.retry, "embed_documents", || provider.embed_documents(batch_texts))
                    .await
                    .inspect_err(|e| error!(error = %e, batch, "embedding failed during indexing"))?;
            embeddings.extend(vectors);
        }
        drop(texts);

        let index = VectorIndex::build(chunks, embeddings, self.metric)?;
        self.check_dimensions(&index)?;

        if let Some(path) = &self.snapshot_path {
            index.persist(path).await?;
        }
        info!(chunk_count = index.len(), "index ready");
        Ok(index)
    }

    fn check_dimensions(&self, index: &VectorIndex) -> Result<()> {
        let expected = self.embedding_provider.dimensions();
        if index.dimensions() != expected {
            return Err(RagError::data(
                "index",
                format!(
                    "index is {}-dimensional but {} produces {expected}-dimensional embeddings",
                    index.dimensions(),
                    self.embedding_provider.name()
                ),
            ));
        }
        Ok(())
    }

    /// Retrieve the candidates for `question`, most similar first.
    ///
    /// # Errors
    ///
    /// See [`Retriever::retrieve`].
    pub async fn retrieve(&self, question: &str) -> Result<Vec<Candidate>> {
        self.retriever.retrieve(question).await
    }

    /// Answer `question` from the indexed corpus.
    ///
    /// Runs `embedded → retrieved(N) → reranked(K) → assembled → generated`.
    /// Dropping the returned future cancels whichever external call is in
    /// flight.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidInput`] if the question is blank
    /// - [`RagError::NotIndexed`] if no index exists yet
    /// - the error of whichever external call failed
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput("question must not be empty".to_string()));
        }
        let span = info_span!("ask", question_len = question.len());
        async {
            let candidates = self.retriever.retrieve(question).await?;
            let passages = self.assembler.rerank(question, candidates).await?;
            if passages.is_empty() {
                warn!("no passages survived reranking, generating without context");
            }
            let context = self.assembler.assemble(question, passages);

            let generator = self.generator.as_ref();
            let system_instruction = self.system_instruction.as_str();
            let text = with_retry(&self.retry, "generate", || {
                generator.generate(system_instruction, &context.text)
            })
            .await
            .inspect_err(|e| error!(error = %e, "answer generation failed"))?;

            let sources: Vec<&str> =
                context.passages.iter().map(|p| p.chunk.id.as_str()).collect();
            info!(
                target: "docqa::audit",
                question,
                answer_chars = text.chars().count(),
                ?sources,
                "answered question"
            );
            Ok(Answer { text, context })
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPipeline")
            .field("config", &self.config)
            .field("embedding_provider", &self.embedding_provider.name())
            .field("generator", &self.generator.name())
            .field("retriever", &self.retriever)
            .field("assembler", &self.assembler)
            .field("indexed", &self.slot.is_ready())
            .field("snapshot_path", &self.snapshot_path)
            .field("metric", &self.metric)
            .finish()
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `embedding_provider`, `reranker` and `generator` are required. The chunker
/// defaults to a [`RecursiveChunker`] sized from the config, the slot to a
/// fresh empty one, and the system instruction to
/// [`DEFAULT_SYSTEM_INSTRUCTION`].
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    chunker: Option<Arc<dyn Chunker>>,
    reranker: Option<Arc<dyn Reranker>>,
    generator: Option<Arc<dyn AnswerGenerator>>,
    slot: Option<Arc<IndexSlot>>,
    system_instruction: Option<String>,
    snapshot_path: Option<PathBuf>,
    metric: Similarity,
    retry: RetryPolicy,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Override the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the reranker.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Set the answer generator.
    pub fn generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Serve the index held in `slot`, e.g. a fixture built by a test.
    pub fn slot(mut self, slot: Arc<IndexSlot>) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Set the system instruction given to the generator.
    pub fn system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Persist every built index to `path`.
    pub fn snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Set the similarity metric for newly built indices.
    pub fn metric(mut self, metric: Similarity) -> Self {
        self.metric = metric;
        self
    }

    /// Set the retry policy for external calls.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the [`RagPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required field is missing or
    /// the configuration is inconsistent.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let reranker =
            self.reranker.ok_or_else(|| RagError::ConfigError("reranker is required".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| RagError::ConfigError("generator is required".to_string()))?;
        let chunker: Arc<dyn Chunker> = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(RecursiveChunker::new(config.chunk_size, config.chunk_overlap)?),
        };
        let slot = self.slot.unwrap_or_default();

        let retriever =
            Retriever::new(Arc::clone(&embedding_provider), Arc::clone(&slot), config.candidate_count)
                .with_min_similarity(config.min_similarity)
                .with_retry_policy(self.retry);
        let assembler =
            ContextAssembler::new(reranker, config.context_size).with_retry_policy(self.retry);

        Ok(RagPipeline {
            config,
            embedding_provider,
            chunker,
            generator,
            slot,
            retriever,
            assembler,
            system_instruction: self
                .system_instruction
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            snapshot_path: self.snapshot_path,
            metric: self.metric,
            retry: self.retry,
        })
    }
}
