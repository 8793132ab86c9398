//! Data types for documents, chunks, candidates and re-ranked passages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A source document containing extracted text and metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable identifier for the document (the uploaded filename).
    pub id: String,
    /// The extracted text content of the document.
    pub text: String,
    /// Key-value metadata associated with the document.
    pub metadata: HashMap<String, String>,
    /// Optional URI pointing to the original source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
}

impl Document {
    /// Create a document with a `name` metadata entry equal to its id.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        let metadata = HashMap::from([("name".to_string(), id.clone())]);
        Self { id, text: text.into(), metadata, source_uri: None }
    }

    /// Attach the path or URI the document was read from.
    pub fn with_source_uri(mut self, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        self.metadata.insert("source".to_string(), uri.clone());
        self.source_uri = Some(uri);
        self
    }
}

/// A contiguous slice of a [`Document`]'s text.
///
/// `start` and `end` are character offsets into the parent text, so
/// `text == parent.chars().skip(start).take(end - start)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk, `{document_id}_{index}`.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Position of this chunk within its document.
    pub index: usize,
    /// Character offset of the first character in the parent text.
    pub start: usize,
    /// Character offset one past the last character in the parent text.
    pub end: usize,
    /// Metadata inherited from the parent document plus `chunk_index`.
    pub metadata: HashMap<String, String>,
}

/// Opaque identifier of an entry in a [`VectorIndex`](crate::VectorIndex).
///
/// Carried through re-ranking so results are joined back to their chunk by
/// identity rather than by text equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassageId(pub u64);

impl std::fmt::Display for PassageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A retrieved [`Chunk`] paired with its vector similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// Index entry the chunk was found under.
    pub id: PassageId,
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

/// A candidate after re-ranking, with the re-ranker's relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RerankedResult {
    /// Index entry the chunk was found under.
    pub id: PassageId,
    /// The re-ranked chunk.
    pub chunk: Chunk,
    /// Relevance score assigned by the re-ranker.
    pub relevance: f32,
}
