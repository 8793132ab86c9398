//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`RecursiveChunker`], which
//! cuts text into overlapping windows of at most `chunk_size` characters,
//! preferring paragraph, line, sentence and word boundaries (in that order)
//! and falling back to a hard character cut.
//!
//! Sizes and offsets are measured in characters, never bytes, so multi-byte
//! text is never split inside a code point.

use crate::document::{Chunk, Document};
use crate::error::{RagError, Result};

/// Boundaries tried from first to last when looking for a cut point.
const DEFAULT_SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "! ", "? ", " "];

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has empty text.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Splits text into overlapping, boundary-aware chunks.
///
/// Every chunk holds at most `chunk_size` characters. Consecutive chunks of a
/// document share exactly `chunk_overlap` characters, so dropping the shared
/// prefix of each chunk and concatenating reproduces the input text.
///
/// Chunk IDs are generated as `{document_id}_{chunk_index}`. Each chunk inherits
/// the parent document's metadata plus a `chunk_index` field.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(400, 50)?;
/// for chunk in chunker.split(&document) {
///     println!("{}..{}", chunk.start, chunk.end);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// Create a chunker that prefers natural text boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Create a chunker that always cuts at exactly `chunk_size` characters.
    ///
    /// # Errors
    ///
    /// Same as [`RecursiveChunker::new`].
    pub fn fixed(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Ok(Self::new(chunk_size, chunk_overlap)?.with_separators(Vec::new()))
    }

    /// Replace the boundary separators, highest priority first.
    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators.into_iter().filter(|s| !s.is_empty()).collect();
        self
    }

    /// Maximum characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters shared by consecutive chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Lazily split a document into chunks.
    pub fn split<'a>(&'a self, document: &'a Document) -> ChunkIter<'a> {
        let mut offsets: Vec<usize> = document.text.char_indices().map(|(i, _)| i).collect();
        offsets.push(document.text.len());
        ChunkIter { chunker: self, document, offsets, start: 0, index: 0, done: false }
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        self.split(document).collect()
    }
}

/// Iterator over the chunks of one document, produced by [`RecursiveChunker::split`].
#[derive(Debug)]
pub struct ChunkIter<'a> {
    chunker: &'a RecursiveChunker,
    document: &'a Document,
    /// Byte offset of every character, plus the text length as a sentinel.
    offsets: Vec<usize>,
    start: usize,
    index: usize,
    done: bool,
}

impl ChunkIter<'_> {
    fn char_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Pick the end of the chunk starting at `self.start` when the hard limit
    /// `hard_end` falls before the end of the text.
    ///
    /// The cut is never placed closer than `max(chunk_size / 2, overlap + 1)`
    /// characters to the start, which keeps chunks reasonably full and
    /// guarantees the next start moves forward.
    fn cut_point(&self, hard_end: usize) -> usize {
        let chunker = self.chunker;
        let min_len = (chunker.chunk_size / 2).max(chunker.chunk_overlap + 1);
        let min_end = (self.start + min_len).min(hard_end);
        let window_start = self.offsets[min_end];
        let window = &self.document.text[window_start..self.offsets[hard_end]];

        for separator in &chunker.separators {
            if let Some(pos) = window.rfind(separator.as_str()) {
                let cut_byte = window_start + pos + separator.len();
                if let Ok(cut) = self.offsets.binary_search(&cut_byte) {
                    return cut;
                }
            }
        }
        hard_end
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let total = self.char_count();
        if self.done || total == 0 {
            self.done = true;
            return None;
        }

        let hard_end = (self.start + self.chunker.chunk_size).min(total);
        let end = if hard_end == total { total } else { self.cut_point(hard_end) };

        let document = self.document;
        let text = &document.text[self.offsets[self.start]..self.offsets[end]];
        let mut metadata = document.metadata.clone();
        metadata.insert("chunk_index".to_string(), self.index.to_string());

        let chunk = Chunk {
            id: format!("{}_{}", document.id, self.index),
            text: text.to_string(),
            document_id: document.id.clone(),
            index: self.index,
            start: self.start,
            end,
            metadata,
        };

        if end == total {
            self.done = true;
        } else {
            self.start = end - self.chunker.chunk_overlap;
            self.index += 1;
        }
        Some(chunk)
    }
}
