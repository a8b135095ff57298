//! Text embedding abstraction.
//!
//! The real embedding algorithm is an external concern; similarity search
//! only needs a deterministic mapping from text to a fixed-dimension vector.
//! [`HashEmbedder`] provides that with no model download, hashing tokens into
//! buckets so related texts share dimensions through shared vocabulary.

use crate::Result;
use sha2::{Digest, Sha256};

/// Trait for text embedders.
pub trait Embedder: Send + Sync {
    /// The dimensionality of produced vectors.
    fn dimensions(&self) -> usize;

    /// Embeds the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic feature-hash embedder.
///
/// Each lowercased token is hashed into one of `dimensions` buckets; the
/// resulting count vector is L2-normalized. Not semantically rich, but
/// deterministic, dependency-free, and good enough for lexical-overlap
/// similarity.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Default vector dimensionality.
    pub const DEFAULT_DIMENSIONS: usize = 256;

    /// Creates an embedder with the default dimensionality.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dimensions: Self::DEFAULT_DIMENSIONS,
        }
    }

    /// Creates an embedder with a custom dimensionality (minimum 8).
    #[must_use]
    pub const fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: if dimensions < 8 { 8 } else { dimensions },
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut value = [0u8; 8];
        value.copy_from_slice(&digest[..8]);
        #[allow(clippy::cast_possible_truncation)]
        {
            (u64::from_be_bytes(value) % self.dimensions as u64) as usize
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            vector[self.bucket(token)] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// Cosine similarity between two vectors of equal length, in [-1, 1].
///
/// Returns 0.0 for mismatched lengths or zero vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
