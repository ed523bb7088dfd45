//! Quality gate: decides whether retrieved context is good enough to spend
//! a generation call on.

use crate::models::RankedResult;

/// Minimum rerank grade of the top result.
pub const MIN_RERANK_SCORE: u8 = 3;

/// Minimum similarity of the top result when it carries no rerank grade.
pub const MIN_SIMILARITY: f32 = 0.3;

/// Answer emitted instead of a generated one when the gate fails.
pub const REFUSAL_MESSAGE: &str = "I could not find code in this repository that is relevant enough to answer that question. \
Try naming a specific program, paragraph, or copybook, or ask again in general chat mode.";

/// Inspect the top-ranked result only.
pub fn passes(results: &[RankedResult]) -> bool {
    match results.first() {
        None => false,
        Some(top) => match top.rerank_score {
            Some(score) => score >= MIN_RERANK_SCORE,
            None => top.similarity_score() >= MIN_SIMILARITY,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchCandidate;
    use crate::test_support::chunk;

    fn result(similarity: f32, rerank: Option<u8>) -> RankedResult {
        RankedResult {
            candidate: SearchCandidate {
                chunk: chunk("A.cbl", 1, 2, "P"),
                similarity_score: similarity,
            },
            rerank_score: rerank,
        }
    }

    #[test]
    fn test_empty_results_fail() {
        assert!(!passes(&[]));
    }

    #[test]
    fn test_rerank_boundary() {
        assert!(passes(&[result(0.0, Some(3))]));
        assert!(!passes(&[result(0.99, Some(2))]));
    }

    #[test]
    fn test_similarity_boundary() {
        assert!(passes(&[result(0.30, None)]));
        assert!(!passes(&[result(0.29, None)]));
    }

    #[test]
    fn test_only_top_result_is_inspected() {
        assert!(!passes(&[result(0.9, Some(1)), result(0.9, Some(10))]));
    }
}
