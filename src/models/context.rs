//! Context items: strategy notes and past-outcome memories.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a context item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextItemId(String);

impl ContextItemId {
    /// Creates a new context item ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContextItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ContextItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A reusable strategy note or past-outcome memory.
///
/// Shared across all requests in a domain. The retriever only reads items;
/// the outcome recorder is the sole writer of the usage counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    /// Unique identifier.
    pub id: ContextItemId,
    /// The note or memory content.
    pub content: String,
    /// The domain this item belongs to.
    pub domain: String,
    /// Times a run using this item was judged successful.
    pub helpful_count: u64,
    /// Times a run using this item was judged unsuccessful.
    pub harmful_count: u64,
    /// Optional embedding vector for similarity search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Unix timestamp of the last run that retrieved this item.
    pub last_used_at: u64,
}

impl ContextItem {
    /// Creates a new item with zeroed counters.
    #[must_use]
    pub fn new(
        id: impl Into<ContextItemId>,
        content: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            domain: domain.into(),
            helpful_count: 0,
            harmful_count: 0,
            embedding: None,
            last_used_at: 0,
        }
    }

    /// Sets the embedding vector.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Total recorded uses.
    #[must_use]
    pub const fn use_count(&self) -> u64 {
        self.helpful_count + self.harmful_count
    }

    /// Whether this item is eligible for pruning: it has been used at least
    /// `min_uses` times and its harmful count dominates.
    #[must_use]
    pub const fn is_prunable(&self, min_uses: u64) -> bool {
        self.use_count() >= min_uses && self.harmful_count > self.helpful_count
    }

    /// Helpfulness ratio in [0, 1]; 0.5 for unused items.
    #[must_use]
    pub fn helpfulness(&self) -> f64 {
        let total = self.use_count();
        if total == 0 {
            0.5
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                self.helpful_count as f64 / total as f64
            }
        }
    }
}

/// A context item paired with the similarity score that retrieved it.
#[derive(Debug, Clone)]
pub struct RetrievedItem {
    /// The retrieved item.
    pub item: ContextItem,
    /// Similarity score in [0, 1], descending across a result set.
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prunable_requires_usage_threshold() {
        let mut item = ContextItem::new("c1", "prefer closed forms", "math");
        item.harmful_count = 3;
        item.helpful_count = 1;
        assert!(!item.is_prunable(10));
        assert!(item.is_prunable(4));
    }

    #[test]
    fn test_helpful_items_are_never_prunable() {
        let mut item = ContextItem::new("c2", "cite sources", "history");
        item.helpful_count = 20;
        item.harmful_count = 20;
        assert!(!item.is_prunable(1));
    }

    #[test]
    fn test_helpfulness_of_unused_item_is_neutral() {
        let item = ContextItem::new("c3", "x", "d");
        assert!((item.helpfulness() - 0.5).abs() < f64::EPSILON);
    }
}
