//! # docqa-rag
//!
//! Retrieval-augmentation pipeline for answering questions over uploaded
//! documentation.
//!
//! The crate covers the whole path from raw document text to the input of an
//! answer-generating model:
//!
//! - [`RecursiveChunker`] splits documents into overlapping passages
//! - [`VectorIndex`] stores passage embeddings and answers top-k queries
//! - [`Retriever`] embeds a question and fetches candidates from the index
//! - [`ContextAssembler`] re-ranks candidates and renders the context block
//! - [`RagPipeline`] orchestrates indexing and `ask`
//!
//! External services sit behind the [`EmbeddingProvider`], [`Reranker`] and
//! [`AnswerGenerator`] traits. With the `http` feature (on by default) the
//! crate ships OpenAI-compatible embedding and chat clients plus an NVIDIA
//! reranking client.
//!
//! ## Feature flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `http`  | HTTP clients for embeddings, chat completion and re-ranking |

pub mod chunking;
pub mod config;
pub mod context;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod index;
pub mod pipeline;
pub mod reranker;
pub mod retriever;
pub mod retry;
pub mod slot;

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub mod nvidia;
#[cfg(feature = "http")]
pub mod openai;

pub use chunking::{Chunker, RecursiveChunker};
pub use config::{RagConfig, RagConfigBuilder, RetryPolicy};
pub use context::{ContextAssembler, QueryContext};
pub use document::{Candidate, Chunk, Document, PassageId, RerankedResult};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use generator::{AnswerGenerator, DEFAULT_SYSTEM_INSTRUCTION};
pub use index::{Similarity, VectorIndex};
pub use pipeline::{Answer, IndexStatus, RagPipeline, RagPipelineBuilder};
pub use reranker::{NoOpReranker, RerankScore, Reranker};
pub use retriever::Retriever;
pub use slot::IndexSlot;
