//! Round-robin merging of independently ranked result lists.
//!
//! Scores from different vector fields (e.g. a text embedding and an image
//! embedding) are not comparable, so combined search does not sort by score.
//! Instead [`interleave`] takes rank 0 from every list, then rank 1 from every
//! list, and so on, keeping only the first occurrence of each identifier.
//! The best candidate of every source therefore appears near the top even
//! when one source's scores are numerically larger.

use std::collections::HashSet;

use crate::document::SearchResult;

/// An item with a stable identifier used for de-duplication.
pub trait Identified {
    /// The identifier; two items with equal identifiers are duplicates.
    fn id(&self) -> &str;
}

impl Identified for SearchResult {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Merge rank-ordered lists by round-robin priority, dropping duplicates.
///
/// At each rank position the lists are visited in the order given; an item
/// is emitted unless its identifier was already emitted. Empty and
/// exhausted lists are skipped. The output is at most as long as the sum of
/// the inputs and never contains the same identifier twice.
///
/// # Example
///
/// ```rust
/// use kb_rag::document::SearchResult;
/// use kb_rag::interleave::interleave;
///
/// let a = vec![SearchResult::new("a1", 0.9), SearchResult::new("a2", 0.8)];
/// let b = vec![SearchResult::new("b1", 0.2)];
/// let merged: Vec<String> = interleave(vec![a, b]).into_iter().map(|r| r.id).collect();
/// assert_eq!(merged, ["a1", "b1", "a2"]);
/// ```
pub fn interleave<T: Identified>(lists: Vec<Vec<T>>) -> Vec<T> {
    let rounds = lists.iter().map(Vec::len).max().unwrap_or(0);
    let capacity = lists.iter().map(Vec::len).sum();

    let mut seen: HashSet<String> = HashSet::with_capacity(capacity);
    let mut merged = Vec::with_capacity(capacity);
    let mut cursors: Vec<_> = lists.into_iter().map(Vec::into_iter).collect();

    for _ in 0..rounds {
        for cursor in &mut cursors {
            let Some(item) = cursor.next() else {
                continue;
            };
            if !seen.contains(item.id()) {
                seen.insert(item.id().to_string());
                merged.push(item);
            }
        }
    }

    merged
}
