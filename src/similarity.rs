//! Trigram similarity over normalized text.
//!
//! Scores are the Jaccard overlap of the character-trigram sets of the two
//! inputs after normalization (lowercase, whitespace collapsed to single
//! spaces). Identical text scores 1.0; disjoint text scores 0.0. Purely
//! lexical — no semantic matching.

use std::collections::HashSet;

/// Lowercases and collapses all whitespace runs to single spaces.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn trigram_set(normalized: &str) -> HashSet<String> {
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() < 3 {
        // Too short for a trigram: the whole string is the only feature,
        // so equal short strings still score 1.0.
        let mut set = HashSet::new();
        if !normalized.is_empty() {
            set.insert(normalized.to_string());
        }
        return set;
    }
    chars
        .windows(3)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Jaccard similarity of the two texts' trigram sets, in [0.0, 1.0].
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let norm_a = normalize(a);
    let norm_b = normalize(b);

    if norm_a.is_empty() && norm_b.is_empty() {
        return 1.0;
    }
    if norm_a.is_empty() || norm_b.is_empty() {
        return 0.0;
    }

    let set_a = trigram_set(&norm_a);
    let set_b = trigram_set(&norm_b);

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}
