//! In-memory context store backend.

use super::ContextStore;
use crate::Result;
use crate::embedding::cosine_similarity;
use crate::models::{ContextItem, ContextItemId, RetrievedItem, RunMetadata};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory [`ContextStore`] backed by a `Mutex<HashMap>`.
///
/// Similarity search is a linear scan with cosine similarity; fine for the
/// item counts a single process accumulates, and the reference behavior a
/// persistent backend must match.
pub struct MemoryStore {
    items: Mutex<HashMap<ContextItemId, ContextItem>>,
    runs: Mutex<Vec<RunMetadata>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            runs: Mutex::new(Vec::new()),
        }
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, HashMap<ContextItemId, ContextItem>> {
        self.items
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_runs(&self) -> std::sync::MutexGuard<'_, Vec<RunMetadata>> {
        self.runs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    async fn upsert(&self, item: ContextItem) -> Result<()> {
        self.lock_items().insert(item.id.clone(), item);
        Ok(())
    }

    async fn get(&self, id: &ContextItemId) -> Result<Option<ContextItem>> {
        Ok(self.lock_items().get(id).cloned())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        domain: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let items = self.lock_items();
        let mut scored: Vec<RetrievedItem> = items
            .values()
            .filter(|item| item.domain == domain)
            .filter_map(|item| {
                let embedding = item.embedding.as_ref()?;
                let score = cosine_similarity(query_embedding, embedding);
                Some(RetrievedItem {
                    item: item.clone(),
                    score,
                })
            })
            .collect();
        drop(items);
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item.id.as_str().cmp(b.item.id.as_str()))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn record_usage(
        &self,
        id: &ContextItemId,
        helpful: bool,
        used_at: u64,
    ) -> Result<Option<u64>> {
        let mut items = self.lock_items();
        Ok(items.get_mut(id).map(|item| {
            item.last_used_at = used_at;
            if helpful {
                item.helpful_count += 1;
                item.helpful_count
            } else {
                item.harmful_count += 1;
                item.harmful_count
            }
        }))
    }

    async fn append_run(&self, metadata: RunMetadata) -> Result<()> {
        self.lock_runs().push(metadata);
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunMetadata>> {
        let runs = self.lock_runs();
        Ok(runs.iter().rev().take(limit).cloned().collect())
    }

    async fn prune(&self, min_uses: u64) -> Result<Vec<ContextItemId>> {
        let mut items = self.lock_items();
        let doomed: Vec<ContextItemId> = items
            .values()
            .filter(|item| item.is_prunable(min_uses))
            .map(|item| item.id.clone())
            .collect();
        for id in &doomed {
            items.remove(id);
        }
        Ok(doomed)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.lock_items().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, HashEmbedder};

    fn item(id: &str, content: &str, domain: &str) -> ContextItem {
        let embedder = HashEmbedder::new();
        let embedding = embedder.embed(content).unwrap();
        ContextItem::new(id, content, domain).with_embedding(embedding)
    }

    #[tokio::test]
    async fn test_search_filters_by_domain() {
        let store = MemoryStore::new();
        store.upsert(item("a", "integrate by parts", "math")).await.unwrap();
        store.upsert(item("b", "integrate by parts", "cooking")).await.unwrap();

        let embedder = HashEmbedder::new();
        let query = embedder.embed("how to integrate").unwrap();
        let results = store.search(&query, "math", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.id.as_str(), "a");
    }

    #[tokio::test]
    async fn test_search_unknown_domain_is_empty_not_error() {
        let store = MemoryStore::new();
        let results = store.search(&[0.1, 0.2], "brand-new", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity_descending() {
        let store = MemoryStore::new();
        store
            .upsert(item("close", "rust borrow checker lifetimes", "rust"))
            .await
            .unwrap();
        store
            .upsert(item("far", "gardening tomato soil", "rust"))
            .await
            .unwrap();

        let embedder = HashEmbedder::new();
        let query = embedder.embed("borrow checker").unwrap();
        let results = store.search(&query, "rust", 10).await.unwrap();
        assert_eq!(results[0].item.id.as_str(), "close");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_record_usage_increments_and_fetches() {
        let store = MemoryStore::new();
        store.upsert(item("a", "x", "d")).await.unwrap();
        let id = ContextItemId::new("a");
        assert_eq!(store.record_usage(&id, true, 100).await.unwrap(), Some(1));
        assert_eq!(store.record_usage(&id, true, 101).await.unwrap(), Some(2));
        assert_eq!(store.record_usage(&id, false, 102).await.unwrap(), Some(1));
        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.last_used_at, 102);
    }

    #[tokio::test]
    async fn test_record_usage_missing_item_is_none() {
        let store = MemoryStore::new();
        let id = ContextItemId::new("ghost");
        assert_eq!(store.record_usage(&id, true, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prune_removes_harmful_dominant_items() {
        let store = MemoryStore::new();
        let mut bad = item("bad", "always guess", "d");
        bad.harmful_count = 8;
        bad.helpful_count = 2;
        let mut good = item("good", "check units", "d");
        good.helpful_count = 9;
        good.harmful_count = 1;
        store.upsert(bad).await.unwrap();
        store.upsert(good).await.unwrap();

        let removed = store.prune(5).await.unwrap();
        assert_eq!(removed, vec![ContextItemId::new("bad")]);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recent_runs_newest_first() {
        let store = MemoryStore::new();
        for i in 0..3u64 {
            let mut metadata = crate::models::RunMetadata::new(uuid::Uuid::now_v7(), "d");
            metadata.student_calls = 1;
            metadata.converged = true;
            metadata.quality_score = 0.5;
            metadata.duration_ms = i;
            metadata.success = true;
            store.append_run(metadata).await.unwrap();
        }
        let runs = store.recent_runs(2).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].duration_ms, 2);
    }
}
