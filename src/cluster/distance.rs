//! Distance structure derived from pair scores.

use crate::aggregate::{round_score, PairScores};
use crate::types::Span;
use std::collections::HashMap;

/// Distance given to span pairs with no score (definitely not linked).
pub const MAX_DISTANCE: f64 = 1.0;

/// Map a link score to a distance: `1 - score`, with the score first rounded
/// to 0 or 1 when `binarize` is set.
///
/// The same transform must be used for predicted scores and ground-truth
/// labels so their trees are comparable.
#[must_use]
pub fn score_to_distance(score: f64, binarize: bool) -> f64 {
    let score = if binarize { round_score(score) } else { score };
    1.0 - score
}

/// Symmetric pairwise distances over `n` items, stored as the upper triangle.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    n: usize,
    condensed: Vec<f64>,
}

impl DistanceMatrix {
    /// All off-diagonal distances set to [`MAX_DISTANCE`].
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            n,
            condensed: vec![MAX_DISTANCE; n * n.saturating_sub(1) / 2],
        }
    }

    /// Build the matrix over every span referenced by `scores`.
    ///
    /// Returns the span order (ascending `(start, end)`) that rows and
    /// columns follow. When both `(a, b)` and `(b, a)` are scored, the cell
    /// holds the mean of the two distances. Pairs of a span with itself are
    /// ignored.
    #[must_use]
    pub fn from_scores(scores: &PairScores, binarize: bool) -> (Vec<Span>, Self) {
        let spans = scores.spans();
        let position: HashMap<Span, usize> =
            spans.iter().enumerate().map(|(i, s)| (*s, i)).collect();

        let mut cells: HashMap<(usize, usize), (f64, usize)> = HashMap::new();
        for (pair, score) in scores.iter() {
            let (i, j) = (position[&pair.first], position[&pair.second]);
            if i == j {
                log::debug!("ignoring self-pair {}", pair);
                continue;
            }
            let cell = cells.entry((i.min(j), i.max(j))).or_insert((0.0, 0));
            cell.0 += score_to_distance(score, binarize);
            cell.1 += 1;
        }

        let mut matrix = DistanceMatrix::new(spans.len());
        for ((i, j), (sum, count)) in cells {
            matrix.set(i, j, sum / count as f64);
        }
        (spans, matrix)
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.n
    }

    /// Whether the matrix is over zero items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Distance between items `i` and `j` (0 on the diagonal).
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return 0.0;
        }
        self.condensed[self.offset(i.min(j), i.max(j))]
    }

    /// Set the distance between two distinct items.
    pub fn set(&mut self, i: usize, j: usize, distance: f64) {
        debug_assert!(i != j, "diagonal is fixed at zero");
        let offset = self.offset(i.min(j), i.max(j));
        self.condensed[offset] = distance;
    }

    // Row-major upper triangle, i < j.
    fn offset(&self, i: usize, j: usize) -> usize {
        self.n * i - i * (i + 1) / 2 + (j - i - 1)
    }
}
