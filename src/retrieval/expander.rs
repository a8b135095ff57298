//! Query expansion.
//!
//! Widens retrieval recall by generating reformulations of the query.
//! Expansion is an optimization, never a correctness requirement: the
//! original query is always element 0 of the result, and any internal
//! failure degrades to `[original]`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static INTERROGATIVE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(
        r"(?i)^(what (is|are|was|were)|how (do|does|did|can|to)( i| you| we)?|why (is|are|does|do)|when (is|was|did|does)|where (is|are|can)|who (is|was|are)|can you|could you|please)\s+",
    )
    .unwrap()
});

static CONJUNCTION_SPLIT: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)\s+(?:and|versus|vs\.?)\s+|;|, and ").unwrap()
});

/// Small substitution table for entity-substitution style expansion.
const SUBSTITUTIONS: &[(&str, &str)] = &[
    ("build", "create"),
    ("create", "build"),
    ("error", "failure"),
    ("failure", "error"),
    ("fast", "efficient"),
    ("fix", "resolve"),
    ("difference", "comparison"),
    ("best", "recommended"),
    ("use", "apply"),
    ("write", "implement"),
];

/// Generates up to `n` reformulations of a query.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExpander;

impl QueryExpander {
    /// Creates an expander.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Expands `query` into up to `n` variants.
    ///
    /// Guarantees:
    /// - element 0 is always the original query
    /// - variants are deduplicated case-insensitively with whitespace
    ///   normalized
    /// - the result never exceeds `n` entries (and never falls below 1)
    #[must_use]
    pub fn expand(&self, query: &str, n: usize) -> Vec<String> {
        let original = query.trim();
        if original.is_empty() {
            return vec![query.to_string()];
        }
        let budget = n.max(1);

        let mut seen: HashSet<String> = HashSet::new();
        // Capacity is a hint only; `budget` itself is not trusted here.
        let mut out: Vec<String> = Vec::with_capacity(budget.min(16));
        let push = |candidate: &str, seen: &mut HashSet<String>, out: &mut Vec<String>| {
            let normalized = normalize_for_dedup(candidate);
            if normalized.is_empty() || out.len() >= budget {
                return;
            }
            if seen.insert(normalized) {
                out.push(candidate.trim().to_string());
            }
        };

        push(original, &mut seen, &mut out);

        // Paraphrase style: strip the interrogative scaffold down to keywords.
        let keyword_form = INTERROGATIVE_PREFIX.replace(original, "");
        let keyword_form = keyword_form.trim_end_matches(['?', '.', '!']).trim();
        if keyword_form.len() > 2 {
            push(keyword_form, &mut seen, &mut out);
        }

        // Decomposition style: split compound questions into sub-queries.
        for part in CONJUNCTION_SPLIT.split(original) {
            let part = part.trim_end_matches(['?', '.', '!']).trim();
            if part.split_whitespace().count() >= 2 {
                push(part, &mut seen, &mut out);
            }
        }

        // Entity-substitution style: swap common terms for synonyms.
        let lower = original.to_lowercase();
        for (from, to) in SUBSTITUTIONS {
            if out.len() >= budget {
                break;
            }
            if lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|t| t == *from)
            {
                let substituted = replace_word(original, from, to);
                push(&substituted, &mut seen, &mut out);
            }
        }

        out
    }
}

/// Case-insensitive whole-word replacement preserving surrounding text.
fn replace_word(text: &str, from: &str, to: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut word = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            word.push(c);
        } else {
            flush_word(&mut result, &mut word, from, to);
            result.push(c);
        }
    }
    flush_word(&mut result, &mut word, from, to);
    result
}

fn flush_word(result: &mut String, word: &mut String, from: &str, to: &str) {
    if word.is_empty() {
        return;
    }
    if word.eq_ignore_ascii_case(from) {
        result.push_str(to);
    } else {
        result.push_str(word);
    }
    word.clear();
}

fn normalize_for_dedup(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_is_always_first() {
        let expander = QueryExpander::new();
        let out = expander.expand("How do I fix a borrow checker error?", 5);
        assert_eq!(out[0], "How do I fix a borrow checker error?");
    }

    #[test]
    fn test_respects_bound() {
        let expander = QueryExpander::new();
        let out = expander.expand("how do I build a fast error-free cache and fix the best use of memory?", 3);
        assert!(out.len() <= 3);
        assert!(!out.is_empty());
    }

    #[test]
    fn test_huge_bound_does_not_overallocate() {
        let expander = QueryExpander::new();
        let out = expander.expand("how do I fix this error?", usize::MAX);
        assert_eq!(out[0], "how do I fix this error?");
        assert!(out.len() <= 8);
    }

    #[test]
    fn test_deduplicates_case_and_whitespace() {
        let expander = QueryExpander::new();
        // The keyword form of this query is the query itself modulo case.
        let out = expander.expand("BORROW   checker", 5);
        let normalized: Vec<String> = out.iter().map(|s| normalize_for_dedup(s)).collect();
        let unique: HashSet<&String> = normalized.iter().collect();
        assert_eq!(unique.len(), normalized.len());
    }

    #[test]
    fn test_strips_interrogative_scaffold() {
        let expander = QueryExpander::new();
        let out = expander.expand("What is reciprocal rank fusion?", 4);
        assert!(out.iter().any(|q| q == "reciprocal rank fusion"));
    }

    #[test]
    fn test_decomposes_compound_queries() {
        let expander = QueryExpander::new();
        let out = expander.expand("explain lifetimes and explain borrowing?", 6);
        assert!(out.iter().any(|q| q == "explain lifetimes"));
        assert!(out.iter().any(|q| q == "explain borrowing"));
    }

    #[test]
    fn test_substitutes_entities() {
        let expander = QueryExpander::new();
        let out = expander.expand("fix the error in my code", 6);
        assert!(out.iter().any(|q| q.contains("resolve")) || out.iter().any(|q| q.contains("failure")));
    }

    #[test]
    fn test_blank_query_degrades_to_identity() {
        let expander = QueryExpander::new();
        let out = expander.expand("   ", 4);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_n_of_one_returns_only_original() {
        let expander = QueryExpander::new();
        let out = expander.expand("why is the sky blue and the ocean salty?", 1);
        assert_eq!(out, vec!["why is the sky blue and the ocean salty?"]);
    }
}
