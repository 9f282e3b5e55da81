//! Hybrid result merging.
//!
//! Relational rows and concept hits are deduplicated by their stable merge
//! key (first occurrence wins) and interleaved by normalized score: SQL rows
//! score 1.0, concepts keep their similarity. The sort is stable, so the
//! relational engine's own ordering survives among equal scores.

use std::collections::HashSet;

use janus_core::{ResultItem, ScoredConcept, SqlRow};

/// Merge both hybrid branches into one ranked result set.
///
/// The output length is bounded by `sql_rows.len() + concepts.len()` and no
/// merge key appears twice.
pub fn merge_hybrid(sql_rows: Vec<SqlRow>, concepts: Vec<ScoredConcept>) -> Vec<ResultItem> {
    let mut items: Vec<ResultItem> = Vec::with_capacity(sql_rows.len() + concepts.len());
    items.extend(sql_rows.into_iter().map(ResultItem::Row));
    items.extend(concepts.into_iter().map(ResultItem::Concept));

    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    items.retain(|item| seen.insert(item.merge_key()));

    items.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    items
}
