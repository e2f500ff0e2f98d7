//! Retrieval Evaluator (§2 L2)
//!
//! Hit-rate / MRR / NDCG@k over a ranked result list given the set of
//! ground-truth relevant ids.

use std::collections::HashSet;

pub fn hit_rate(results: &[String], relevant: &HashSet<String>) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let hits = results.iter().filter(|r| relevant.contains(*r)).count();
    hits as f64 / relevant.len() as f64
}

/// Mean reciprocal rank: `1 / rank` of the first relevant hit, 0 if none.
pub fn mrr(results: &[String], relevant: &HashSet<String>) -> f64 {
    for (i, r) in results.iter().enumerate() {
        if relevant.contains(r) {
            return 1.0 / (i as f64 + 1.0);
        }
    }
    0.0
}

/// NDCG@k with binary relevance: `DCG = sum(1/log2(rank+1))` for relevant
/// hits in the top k, normalized by the ideal DCG for `|relevant|` hits.
pub fn ndcg_at_k(results: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let dcg: f64 = results
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, r)| relevant.contains(*r))
        .map(|(i, _)| 1.0 / ((i as f64 + 2.0).log2()))
        .sum();

    let ideal_hits = relevant.len().min(k);
    let idcg: f64 = (0..ideal_hits).map(|i| 1.0 / ((i as f64 + 2.0).log2())).sum();

    if idcg == 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn list(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hit_rate_counts_overlap() {
        let results = list(&["a", "b", "c"]);
        let relevant = set(&["b", "d"]);
        assert_eq!(hit_rate(&results, &relevant), 0.5);
    }

    #[test]
    fn mrr_uses_first_relevant_rank() {
        let results = list(&["a", "b", "c"]);
        let relevant = set(&["c"]);
        assert!((mrr(&results, &relevant) - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn mrr_is_zero_with_no_relevant_hits() {
        let results = list(&["a", "b"]);
        let relevant = set(&["z"]);
        assert_eq!(mrr(&results, &relevant), 0.0);
    }

    #[test]
    fn ndcg_rewards_earlier_relevant_hits() {
        let relevant = set(&["a", "b"]);
        let perfect = list(&["a", "b", "c"]);
        let worse = list(&["c", "a", "b"]);
        assert!(ndcg_at_k(&perfect, &relevant, 3) >= ndcg_at_k(&worse, &relevant, 3));
        assert!((ndcg_at_k(&perfect, &relevant, 3) - 1.0).abs() < 1e-9);
    }
}
