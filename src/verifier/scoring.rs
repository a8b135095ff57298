//! Draft confidence scoring.
//!
//! A pure function of (query, draft, retrieved context) so verification runs
//! are replayable. The blend: query-term coverage, agreement with retrieved
//! context, and a length prior that penalizes one-word and runaway answers.

use crate::models::RetrievedItem;
use std::collections::HashSet;

const WEIGHT_COVERAGE: f64 = 0.5;
const WEIGHT_CONSISTENCY: f64 = 0.3;
const WEIGHT_LENGTH: f64 = 0.2;

/// Deterministic confidence scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    /// Creates a scorer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Scores a draft against the query and retrieved context, in [0, 1].
    #[must_use]
    pub fn score(&self, query: &str, draft: &str, context: &[RetrievedItem]) -> f64 {
        let draft_words = content_words(draft);
        let coverage = coverage(&content_words(query), &draft_words);
        let consistency = consistency(&draft_words, context);
        let length = length_prior(&draft_words);

        let score = WEIGHT_LENGTH.mul_add(
            length,
            WEIGHT_COVERAGE.mul_add(coverage, WEIGHT_CONSISTENCY * consistency),
        );
        score.clamp(0.0, 1.0)
    }
}

fn content_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(ToString::to_string)
        .collect()
}

/// Fraction of query content words present in the draft; 1.0 when the query
/// has no content words to cover.
fn coverage(query_words: &HashSet<String>, draft_words: &HashSet<String>) -> f64 {
    if query_words.is_empty() {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    {
        query_words.intersection(draft_words).count() as f64 / query_words.len() as f64
    }
}

/// Fraction of context items sharing at least one content word with the
/// draft; neutral 0.5 with no context (nothing to agree or disagree with).
fn consistency(draft_words: &HashSet<String>, context: &[RetrievedItem]) -> f64 {
    if context.is_empty() {
        return 0.5;
    }
    let agreeing = context
        .iter()
        .filter(|retrieved| {
            content_words(&retrieved.item.content)
                .intersection(draft_words)
                .next()
                .is_some()
        })
        .count();
    #[allow(clippy::cast_precision_loss)]
    {
        agreeing as f64 / context.len() as f64
    }
}

/// 1.0 inside the 10..=200 word band, tapering outside it.
fn length_prior(draft_words: &HashSet<String>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = draft_words.len() as f64;
    if n < 10.0 {
        n / 10.0
    } else if n > 200.0 {
        200.0 / n
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContextItem;

    fn item(content: &str) -> RetrievedItem {
        RetrievedItem {
            item: ContextItem::new("id", content, "d"),
            score: 0.8,
        }
    }

    #[test]
    fn test_score_is_deterministic_and_bounded() {
        let scorer = ConfidenceScorer::new();
        let a = scorer.score("why is the sky blue", "rayleigh scattering", &[]);
        let b = scorer.score("why is the sky blue", "rayleigh scattering", &[]);
        assert!((a - b).abs() < f64::EPSILON);
        assert!((0.0..=1.0).contains(&a));
    }

    #[test]
    fn test_higher_coverage_scores_higher() {
        let scorer = ConfidenceScorer::new();
        let partial = scorer.score(
            "explain rayleigh scattering in the atmosphere",
            "light scatters",
            &[],
        );
        let full = scorer.score(
            "explain rayleigh scattering in the atmosphere",
            "rayleigh scattering happens when sunlight interacts with molecules in the \
             atmosphere, scattering short wavelengths most strongly",
            &[],
        );
        assert!(full > partial);
    }

    #[test]
    fn test_context_agreement_raises_score() {
        let scorer = ConfidenceScorer::new();
        let draft = "rayleigh scattering of sunlight by air molecules makes the sky blue \
                     because shorter wavelengths scatter more";
        let agreeing = scorer.score("why is the sky blue", draft, &[item("rayleigh scattering explains sky color")]);
        let disagreeing = scorer.score("why is the sky blue", draft, &[item("tomatoes need watering daily")]);
        assert!(agreeing > disagreeing);
    }

    #[test]
    fn test_one_word_answers_are_penalized() {
        let scorer = ConfidenceScorer::new();
        let terse = scorer.score("describe the borrow checker rules", "rules", &[]);
        let fuller = scorer.score(
            "describe the borrow checker rules",
            "the borrow checker rules enforce unique mutable access and arbitrary shared \
             reads, validated over region lifetimes",
            &[],
        );
        assert!(fuller > terse);
    }
}
