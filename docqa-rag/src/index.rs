//! Flat vector index with exact nearest-neighbour search and snapshotting.
//!
//! [`VectorIndex`] stores one `(vector, chunk)` entry per passage in insertion
//! order and scores every entry on each search. For the corpora this service
//! targets (thousands of chunks) exact search is fast enough and recall is
//! exact by construction.
//!
//! An index is immutable once built. It can be written to a JSON snapshot
//! with [`VectorIndex::persist`] and restored with [`VectorIndex::load`];
//! a restored index answers every query with the same results, in the same
//! order and with the same scores, as the index it was saved from.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::{Candidate, Chunk, PassageId};
use crate::error::{RagError, Result};

/// Version written into every snapshot. Bump when the layout changes.
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Similarity metric used to compare vectors.
///
/// Must match what the embedding model was tuned for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    /// Cosine similarity; zero-magnitude vectors score `0.0`.
    #[default]
    Cosine,
    /// Raw inner product.
    DotProduct,
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct IndexEntry {
    id: PassageId,
    chunk: Chunk,
    vector: Vec<f32>,
}

/// A searchable collection of embedded chunks.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    metric: Similarity,
    dimensions: usize,
    created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
    /// L2 norm of each entry's vector, parallel to `entries`.
    norms: Vec<f32>,
}

impl VectorIndex {
    /// Build an index from parallel lists of chunks and their embeddings.
    ///
    /// Entry `i` pairs `chunks[i]` with `embeddings[i]` and receives
    /// `PassageId(i)`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DataError`] if the lists differ in length, are
    /// empty, or any vector is empty, non-finite, or differs in
    /// dimensionality from the first one.
    pub fn build(
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
        metric: Similarity,
    ) -> Result<Self> {
        if chunks.len() != embeddings.len() {
            return Err(RagError::data(
                "index",
                format!(
                    "chunk/embedding count mismatch: {} chunks, {} embeddings",
                    chunks.len(),
                    embeddings.len()
                ),
            ));
        }
        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (chunk, vector))| IndexEntry { id: PassageId(i as u64), chunk, vector })
            .collect();
        let index = Self::from_entries(metric, Utc::now(), entries)?;
        info!(entries = index.len(), dimensions = index.dimensions, ?metric, "built vector index");
        Ok(index)
    }

    fn from_entries(
        metric: Similarity,
        created_at: DateTime<Utc>,
        entries: Vec<IndexEntry>,
    ) -> Result<Self> {
        let Some(first) = entries.first() else {
            return Err(RagError::data("index", "no chunks to index"));
        };
        let dimensions = first.vector.len();
        if dimensions == 0 {
            return Err(RagError::data(&first.chunk.document_id, "embedding has zero dimensions"));
        }
        for entry in &entries {
            if entry.vector.len() != dimensions {
                return Err(RagError::data(
                    &entry.chunk.document_id,
                    format!(
                        "chunk '{}' has a {}-dimensional embedding, index is {dimensions}-dimensional",
                        entry.chunk.id,
                        entry.vector.len()
                    ),
                ));
            }
            if entry.vector.iter().any(|x| !x.is_finite()) {
                return Err(RagError::data(
                    &entry.chunk.document_id,
                    format!("chunk '{}' has a non-finite embedding component", entry.chunk.id),
                ));
            }
        }
        let norms = entries.iter().map(|e| norm(&e.vector)).collect();
        Ok(Self { metric, dimensions, created_at, entries, norms })
    }

    /// Number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no entries. Always false for a built index.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimensionality shared by every vector in the index.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The similarity metric used by [`search`](Self::search).
    pub fn metric(&self) -> Similarity {
        self.metric
    }

    /// When the index was originally built.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Look up the chunk stored under `id`.
    pub fn chunk(&self, id: PassageId) -> Option<&Chunk> {
        usize::try_from(id.0).ok().and_then(|i| self.entries.get(i)).map(|e| &e.chunk)
    }

    /// Return the `k` entries most similar to `query`, most similar first.
    ///
    /// Ties keep insertion order. Fewer than `k` results are returned when
    /// the index holds fewer entries.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DataError`] if `query` has the wrong dimensionality.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Candidate>> {
        if query.len() != self.dimensions {
            return Err(RagError::data(
                "query",
                format!(
                    "query vector has {} dimensions, index is {}-dimensional",
                    query.len(),
                    self.dimensions
                ),
            ));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_norm = norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(position, (entry, entry_norm))| {
                let score = match self.metric {
                    Similarity::DotProduct => dot(&entry.vector, query),
                    Similarity::Cosine if query_norm == 0.0 || *entry_norm == 0.0 => 0.0,
                    Similarity::Cosine => dot(&entry.vector, query) / (entry_norm * query_norm),
                };
                (position, score)
            })
            .collect();

        // `sort_by` is stable, which is what keeps ties in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        debug!(k, returned = scored.len(), "vector index search");
        Ok(scored
            .into_iter()
            .map(|(position, score)| {
                let entry = &self.entries[position];
                Candidate { id: entry.id, chunk: entry.chunk.clone(), score }
            })
            .collect())
    }

    /// Write the full index (vectors, chunk text and metadata) to `path`.
    ///
    /// The snapshot is written to a temporary sibling file first and renamed
    /// into place, so a crash never leaves a truncated snapshot behind.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::SnapshotError`] on serialization or I/O failure.
    pub async fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = SnapshotRef {
            format_version: SNAPSHOT_FORMAT_VERSION,
            metric: self.metric,
            dimensions: self.dimensions,
            created_at: self.created_at,
            entries: &self.entries,
        };
        let bytes = serde_json::to_vec(&snapshot).map_err(|e| snapshot_error(path, e))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| snapshot_error(path, e))?;
        }
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| snapshot_error(&tmp, e))?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| snapshot_error(path, e))?;

        info!(path = %path.display(), bytes = bytes.len(), entries = self.len(), "persisted vector index");
        Ok(())
    }

    /// Restore an index previously written by [`persist`](Self::persist).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::SnapshotError`] if the file cannot be read, is not
    /// a snapshot, or has an unsupported format version, and
    /// [`RagError::DataError`] if its entries are inconsistent.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| snapshot_error(path, e))?;
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| snapshot_error(path, e))?;

        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(snapshot_error(
                path,
                format!("unsupported snapshot format version {}", snapshot.format_version),
            ));
        }
        let index = Self::from_entries(snapshot.metric, snapshot.created_at, snapshot.entries)?;
        if index.dimensions != snapshot.dimensions {
            return Err(snapshot_error(
                path,
                format!(
                    "header declares {} dimensions, entries have {}",
                    snapshot.dimensions, index.dimensions
                ),
            ));
        }
        if index.entries.iter().enumerate().any(|(i, e)| e.id != PassageId(i as u64)) {
            return Err(snapshot_error(path, "entry ids are not sequential"));
        }

        info!(path = %path.display(), entries = index.len(), "loaded vector index snapshot");
        Ok(index)
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    format_version: u32,
    metric: Similarity,
    dimensions: usize,
    created_at: DateTime<Utc>,
    entries: &'a [IndexEntry],
}

#[derive(Deserialize)]
struct Snapshot {
    format_version: u32,
    metric: Similarity,
    dimensions: usize,
    created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn snapshot_error(path: &Path, error: impl std::fmt::Display) -> RagError {
    RagError::SnapshotError { path: path.display().to_string(), message: error.to_string() }
}
