//! Single-assignment holder for the process's vector index.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::{RagError, Result};
use crate::index::VectorIndex;

/// Owns the one [`VectorIndex`] a pipeline serves.
///
/// The slot starts empty and is filled at most once. Readers never observe a
/// partially built index: an index becomes visible only after its build
/// future completes successfully, and a failed build leaves the slot empty so
/// a later upload can try again. Searches run on a shared `Arc` without any
/// locking.
///
/// Holding the slot in the pipeline, rather than in a global, lets tests
/// inject fixture indices with [`IndexSlot::with_index`].
#[derive(Debug, Default)]
pub struct IndexSlot {
    cell: OnceCell<Arc<VectorIndex>>,
}

impl IndexSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot that already holds `index`.
    pub fn with_index(index: VectorIndex) -> Self {
        Self { cell: OnceCell::new_with(Some(Arc::new(index))) }
    }

    /// Whether an index has been built or loaded.
    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }

    /// The current index, if any.
    pub fn get(&self) -> Option<Arc<VectorIndex>> {
        self.cell.get().cloned()
    }

    /// The current index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotIndexed`] if the slot is empty.
    pub fn require(&self) -> Result<Arc<VectorIndex>> {
        self.get().ok_or(RagError::NotIndexed)
    }

    /// Fill an empty slot with `index`. Returns `false`, leaving the slot
    /// untouched, if it was already filled.
    pub fn set(&self, index: VectorIndex) -> bool {
        self.cell.set(Arc::new(index)).is_ok()
    }

    /// Run `build` if the slot is empty and store its result.
    ///
    /// Concurrent callers wait for a single in-flight build instead of
    /// starting their own. Returns the index and `true` when this call
    /// performed the build, or the existing index and `false` otherwise.
    ///
    /// # Errors
    ///
    /// Propagates the error from `build`; the slot stays empty.
    pub async fn get_or_try_build<F, Fut>(&self, build: F) -> Result<(Arc<VectorIndex>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<VectorIndex>>,
    {
        let mut built = false;
        let built_here = &mut built;
        let index = self
            .cell
            .get_or_try_init(|| async move {
                let index = build().await?;
                *built_here = true;
                Ok::<_, RagError>(Arc::new(index))
            })
            .await?;
        Ok((Arc::clone(index), built))
    }
}
