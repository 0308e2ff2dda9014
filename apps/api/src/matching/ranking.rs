use std::cmp::Ordering;

use crate::models::MatchResult;

/// Score descending, ties broken by candidate id ascending.
pub fn ranking_order(a: &MatchResult, b: &MatchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.candidate_id.cmp(&b.candidate_id))
}

/// Sorts one job's results into ranking order and assigns 1-based ranks.
pub fn rank_matches(mut results: Vec<MatchResult>) -> Vec<MatchResult> {
    results.sort_by(ranking_order);
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i as u32 + 1;
    }
    results
}
