//! Context Ranker (§4.3)
//!
//! TF-IDF scoring over a query plus a greedy token-budget allocation
//! (knapsack). Stopwords and tokenization rules are fixed by spec so results
//! are reproducible across implementations.

use std::collections::{HashMap, HashSet};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "it", "in", "on", "at", "to", "of", "for", "and", "or", "but", "not",
    "with", "by", "from", "as", "be", "was", "were", "are", "been", "has", "had", "have", "do",
    "will", "would", "could", "should", "this", "that", "these", "those",
];

#[derive(Debug, Clone)]
pub struct RankableItem {
    pub id: String,
    pub text: String,
    pub tokens: usize,
}

#[derive(Debug, Clone)]
pub struct RankedItem {
    pub item: RankableItem,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AllocationResult {
    pub items: Vec<RankableItem>,
    pub dropped_items: Vec<RankableItem>,
    pub total_tokens: usize,
    pub guaranteed_tokens: usize,
    pub remaining_budget: i64,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| s.len() > 1)
        .filter(|s| !STOPWORDS.contains(s))
        .map(|s| s.to_string())
        .collect()
}

pub struct ContextRanker;

impl ContextRanker {
    /// TF-IDF with normalized term frequency and smoothed IDF
    /// (`log(N/df)+1`), scored against the query's token set.
    pub fn rank_items(items: &[RankableItem], query: &str) -> Vec<RankedItem> {
        if items.is_empty() {
            return Vec::new();
        }

        let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
        if query_tokens.is_empty() {
            return items
                .iter()
                .cloned()
                .map(|item| RankedItem { item, score: 0.0 })
                .collect();
        }

        let doc_tokens: Vec<Vec<String>> = items.iter().map(|i| tokenize(&i.text)).collect();
        let n = doc_tokens.len() as f64;

        let mut df: HashMap<&str, usize> = HashMap::new();
        for tokens in &doc_tokens {
            let unique: HashSet<&str> = tokens.iter().map(|s| s.as_str()).collect();
            for t in unique {
                *df.entry(t).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<RankedItem> = items
            .iter()
            .cloned()
            .zip(doc_tokens.iter())
            .map(|(item, tokens)| {
                let total = tokens.len().max(1) as f64;
                let mut term_counts: HashMap<&str, usize> = HashMap::new();
                for t in tokens {
                    *term_counts.entry(t.as_str()).or_insert(0) += 1;
                }

                let score: f64 = query_tokens
                    .iter()
                    .map(|qt| {
                        let tf = *term_counts.get(qt.as_str()).unwrap_or(&0) as f64 / total;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let doc_freq = *df.get(qt.as_str()).unwrap_or(&0) as f64;
                        let idf = (n / doc_freq.max(1.0)).ln() + 1.0;
                        tf * idf
                    })
                    .sum();

                RankedItem { item, score }
            })
            .collect();

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        ranked
    }

    /// Greedy knapsack: reserve `system+task` tokens, then admit items
    /// highest-score-first while they fit. Items too large for the
    /// remaining budget are dropped into `dropped_items`.
    pub fn allocate_budget(
        ranked: &[RankedItem],
        total_budget: usize,
        guaranteed: usize,
    ) -> AllocationResult {
        let remaining_after_guarantee = total_budget.saturating_sub(guaranteed);
        let mut remaining = remaining_after_guarantee;
        let mut items = Vec::new();
        let mut dropped = Vec::new();

        for ranked_item in ranked {
            if ranked_item.item.tokens <= remaining {
                remaining -= ranked_item.item.tokens;
                items.push(ranked_item.item.clone());
            } else {
                dropped.push(ranked_item.item.clone());
            }
        }

        let total_tokens: usize = items.iter().map(|i| i.tokens).sum::<usize>() + guaranteed;

        AllocationResult {
            items,
            dropped_items: dropped,
            total_tokens,
            guaranteed_tokens: guaranteed,
            remaining_budget: remaining as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, text: &str, tokens: usize) -> RankableItem {
        RankableItem {
            id: id.to_string(),
            text: text.to_string(),
            tokens,
        }
    }

    #[test]
    fn empty_items_rank_to_empty() {
        assert!(ContextRanker::rank_items(&[], "query").is_empty());
    }

    #[test]
    fn s3_ranker_allocation_scenario() {
        let ranked = vec![
            RankedItem { item: item("A", "relevant", 100), score: 0.9 },
            RankedItem { item: item("B", "somewhat relevant", 100), score: 0.5 },
            RankedItem { item: item("C", "irrelevant", 100), score: 0.2 },
        ];
        let result = ContextRanker::allocate_budget(&ranked, 250, 0);
        assert_eq!(result.items.iter().map(|i| i.id.clone()).collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(result.dropped_items.len(), 1);
        assert_eq!(result.dropped_items[0].id, "C");
        assert_eq!(result.total_tokens, 200);
        assert_eq!(result.remaining_budget, 50);
    }

    #[test]
    fn empty_allocation_respects_budget() {
        let result = ContextRanker::allocate_budget(&[], 250, 0);
        assert!(result.items.is_empty());
        assert_eq!(result.total_tokens, 0);
        assert_eq!(result.remaining_budget, 250);
    }

    #[test]
    fn tfidf_prefers_document_matching_more_query_terms() {
        let items = vec![
            item("doc1", "seller fraud risk assessment review", 10),
            item("doc2", "the weather is nice today", 10),
        ];
        let ranked = ContextRanker::rank_items(&items, "fraud risk assessment");
        assert_eq!(ranked[0].item.id, "doc1");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn stopwords_are_filtered_from_scoring() {
        let items = vec![item("doc1", "the fraud is in the system", 10)];
        let ranked = ContextRanker::rank_items(&items, "the and or but");
        assert_eq!(ranked[0].score, 0.0);
    }
}
