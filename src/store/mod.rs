//! Context-item store abstraction.
//!
//! The persistent store (vector database, relational tables) is an external
//! collaborator; this module defines the seam the pipeline talks through and
//! an in-memory backend for tests and single-process use.
//!
//! # Implementor Notes
//!
//! - Methods take `&self` to enable sharing via `Arc<dyn ContextStore>`
//! - Use interior mutability (e.g., `Mutex<HashMap<K,V>>`) for mutable state
//! - Counter updates must have increment-and-fetch semantics so concurrent
//!   recorder writes never lose updates

mod memory;

pub use memory::MemoryStore;

use crate::Result;
use crate::models::{ContextItem, ContextItemId, RetrievedItem, RunMetadata};
use async_trait::async_trait;

/// Trait for context-item stores.
///
/// The retriever only calls [`search`](ContextStore::search); the outcome
/// recorder is the sole caller of the write methods on the hot path.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Inserts or replaces a context item.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn upsert(&self, item: ContextItem) -> Result<()>;

    /// Fetches an item by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn get(&self, id: &ContextItemId) -> Result<Option<ContextItem>>;

    /// Searches for items similar to `query_embedding` within `domain`,
    /// returning up to `limit` results ordered by similarity descending.
    ///
    /// An unknown or empty domain yields an empty result, never an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    async fn search(
        &self,
        query_embedding: &[f32],
        domain: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedItem>>;

    /// Atomically increments the helpful or harmful counter of an item and
    /// stamps its last-used time. Returns the new counter value, or `None`
    /// if the item no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    async fn record_usage(
        &self,
        id: &ContextItemId,
        helpful: bool,
        used_at: u64,
    ) -> Result<Option<u64>>;

    /// Appends a run-metadata record.
    ///
    /// # Errors
    ///
    /// Returns an error if the append fails.
    async fn append_run(&self, metadata: RunMetadata) -> Result<()>;

    /// Returns the most recent run-metadata records, newest first, bounded
    /// to `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunMetadata>>;

    /// Removes items whose harmful count dominates after at least
    /// `min_uses` uses. Returns the removed ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the prune fails.
    async fn prune(&self, min_uses: u64) -> Result<Vec<ContextItemId>>;

    /// Total number of stored items.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    async fn count(&self) -> Result<usize>;
}
