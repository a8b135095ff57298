//! Context retrieval.
//!
//! Read-only path: embeds the query (and its expansions), runs similarity
//! search against the context store, and fuses the per-query rankings with
//! reciprocal rank fusion (RRF) before truncating to `k`. Counter updates
//! happen only in the outcome recorder, never here.
//!
//! RRF: for each item `d` at 1-indexed `rank_r(d)` in ranking `r`,
//! `score(d) = sum(1 / (k + rank_r(d)))` with the standard `k = 60`.

mod expander;

pub use expander::QueryExpander;

use crate::Result;
use crate::embedding::Embedder;
use crate::models::{ContextItemId, RetrievedItem};
use crate::store::ContextStore;
use std::collections::HashMap;
use std::sync::Arc;

/// The RRF rank-dampening constant.
const RRF_K: f32 = 60.0;

/// Context retriever over a store and an embedder.
pub struct ContextRetriever {
    store: Arc<dyn ContextStore>,
    embedder: Arc<dyn Embedder>,
    min_similarity: f32,
}

impl ContextRetriever {
    /// Creates a retriever.
    #[must_use]
    pub fn new(
        store: Arc<dyn ContextStore>,
        embedder: Arc<dyn Embedder>,
        min_similarity: f32,
    ) -> Self {
        Self {
            store,
            embedder,
            min_similarity,
        }
    }

    /// Retrieves up to `k` items for a single query, similarity descending,
    /// filtered by the configured similarity threshold.
    ///
    /// A cold-start domain (no stored items) yields an empty result.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the store search fails.
    pub async fn retrieve(
        &self,
        query_text: &str,
        domain: &str,
        k: usize,
    ) -> Result<Vec<RetrievedItem>> {
        let embedding = self.embedder.embed(query_text)?;
        let mut results = self.store.search(&embedding, domain, k).await?;
        results.retain(|r| r.score >= self.min_similarity);
        Ok(results)
    }

    /// Retrieves for every expanded query and fuses the rankings with RRF,
    /// returning up to `k` items. Each returned item carries the maximum
    /// similarity it achieved across the expanded queries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store search fails for the original query;
    /// failures on expansion queries are logged and skipped, since expansion
    /// results only widen recall.
    pub async fn retrieve_fused(
        &self,
        queries: &[String],
        domain: &str,
        k: usize,
    ) -> Result<Vec<RetrievedItem>> {
        let Some((original, expansions)) = queries.split_first() else {
            return Ok(Vec::new());
        };

        let mut rankings: Vec<Vec<RetrievedItem>> =
            vec![self.retrieve(original, domain, k).await?];
        let expansion_results =
            futures::future::join_all(expansions.iter().map(|q| self.retrieve(q, domain, k)))
                .await;
        for (query, result) in expansions.iter().zip(expansion_results) {
            match result {
                Ok(ranking) => rankings.push(ranking),
                Err(e) => {
                    tracing::debug!(query = %query, error = %e, "expansion retrieval skipped");
                },
            }
        }

        Ok(fuse_rankings(&rankings, k))
    }
}

/// Fuses multiple rankings with reciprocal rank fusion, truncated to `limit`.
fn fuse_rankings(rankings: &[Vec<RetrievedItem>], limit: usize) -> Vec<RetrievedItem> {
    let mut fused: HashMap<ContextItemId, (RetrievedItem, f32)> = HashMap::new();

    for ranking in rankings {
        for (index, retrieved) in ranking.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let rrf = 1.0 / (RRF_K + index as f32 + 1.0);
            fused
                .entry(retrieved.item.id.clone())
                .and_modify(|(best, score)| {
                    *score += rrf;
                    if retrieved.score > best.score {
                        best.score = retrieved.score;
                    }
                })
                .or_insert_with(|| (retrieved.clone(), rrf));
        }
    }

    let mut merged: Vec<(RetrievedItem, f32)> = fused.into_values().collect();
    merged.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.item.id.as_str().cmp(b.0.item.id.as_str()))
    });
    merged.truncate(limit);
    merged.into_iter().map(|(item, _)| item).collect()
}
