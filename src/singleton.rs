//! Singleton suppression.

use std::collections::HashMap;

/// Label for a span that is not part of a real cluster.
pub const SINGLETON_ID: i64 = -1;

/// Relabel every one-member cluster to [`SINGLETON_ID`].
///
/// Returns a new sequence; the input is left as is. Applying it twice gives
/// the same result as applying it once.
///
/// ```rust
/// use coreflink::singleton::remove_singletons;
///
/// assert_eq!(remove_singletons(&[1, 1, 2, 3, 3]), vec![1, 1, -1, 3, 3]);
/// ```
#[must_use]
pub fn remove_singletons(labels: &[i64]) -> Vec<i64> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for &label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    labels
        .iter()
        .map(|label| {
            if counts[label] == 1 {
                SINGLETON_ID
            } else {
                *label
            }
        })
        .collect()
}
