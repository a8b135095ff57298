//! Query request types.

use uuid::Uuid;

/// A single accepted query, immutable for the lifetime of its pipeline run.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Unique identifier for this pipeline run.
    pub run_id: Uuid,
    /// The raw query text as supplied by the caller.
    pub text: String,
    /// The domain tag the caller filed the query under.
    pub domain: String,
}

impl QueryRequest {
    /// Creates a new request with a fresh run id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the query text is empty or
    /// whitespace-only.
    pub fn new(text: impl Into<String>, domain: impl Into<String>) -> crate::Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "query text must not be empty".to_string(),
            ));
        }
        Ok(Self {
            run_id: Uuid::now_v7(),
            text,
            domain: domain.into(),
        })
    }

    /// Returns the query text normalized for cache keying and deduplication:
    /// lowercased with whitespace runs collapsed to single spaces.
    #[must_use]
    pub fn normalized_text(&self) -> String {
        normalize(&self.text)
    }
}

/// Lowercases and collapses whitespace runs to single spaces.
#[must_use]
pub(crate) fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_query() {
        assert!(QueryRequest::new("", "general").is_err());
        assert!(QueryRequest::new("   \t\n", "general").is_err());
    }

    #[test]
    fn test_normalized_text() {
        let req = QueryRequest::new("  What IS\t2+2? ", "math").unwrap();
        assert_eq!(req.normalized_text(), "what is 2+2?");
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = QueryRequest::new("q", "d").unwrap();
        let b = QueryRequest::new("q", "d").unwrap();
        assert_ne!(a.run_id, b.run_id);
    }
}
