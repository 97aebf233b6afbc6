//! Reciprocal Rank Fusion over ranked quote lists.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

/// One fused entry: the first occurrence of the item and its fused score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedItem {
    pub item: Value,
    pub score: f64,
    /// Best (lowest) 1-based rank across the input lists.
    pub best_rank: usize,
    first_seen: usize,
}

fn item_key(item: &Value) -> String {
    match item.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => item.to_string(),
    }
}

/// Fuse ranked lists: each item scores `sum(1 / (k + rank))` over the lists
/// containing it, ranks being 1-based. Sorted by score, then best single-list
/// rank, then first appearance.
pub fn reciprocal_rank_fusion(lists: &[Vec<Value>], k: f64) -> Vec<FusedItem> {
    let mut fused: Vec<FusedItem> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for list in lists {
        for (offset, item) in list.iter().enumerate() {
            let rank = offset + 1;
            let contribution = 1.0 / (k + rank as f64);
            let key = item_key(item);
            match positions.get(&key) {
                Some(position) => {
                    let entry = &mut fused[*position];
                    entry.score += contribution;
                    entry.best_rank = entry.best_rank.min(rank);
                }
                None => {
                    positions.insert(key, fused.len());
                    fused.push(FusedItem {
                        item: item.clone(),
                        score: contribution,
                        best_rank: rank,
                        first_seen: fused.len(),
                    });
                }
            }
        }
    }

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.best_rank.cmp(&b.best_rank))
            .then(a.first_seen.cmp(&b.first_seen))
    });
    fused
}

/// Rough token estimate: four ASCII characters per token, one token per
/// other character.
pub fn estimate_tokens(text: &str) -> usize {
    let (ascii, other) = text.chars().fold((0usize, 0usize), |(ascii, other), c| {
        if c.is_ascii() {
            (ascii + 1, other)
        } else {
            (ascii, other + 1)
        }
    });
    ascii.div_ceil(4) + other
}

fn quote_text(item: &Value) -> String {
    let field = |name: &str| item.get(name).and_then(Value::as_str).unwrap_or_default();
    match (field("content"), field("answer")) {
        ("", "") => item.to_string(),
        (content, "") => content.to_string(),
        (content, answer) => format!("{}\n{}", content, answer),
    }
}

/// Keep items in order while their running token estimate stays within
/// `limit`; stops at the first item that would overflow.
pub fn truncate_by_tokens(items: Vec<Value>, limit: usize) -> (Vec<Value>, usize) {
    let mut kept = Vec::new();
    let mut used = 0;
    for item in items {
        let cost = estimate_tokens(&quote_text(&item));
        if used + cost > limit {
            break;
        }
        used += cost;
        kept.push(item);
    }
    (kept, used)
}
