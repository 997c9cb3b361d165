//! Hierarchical clustering of spans from pair scores.
//!
//! # Pipeline
//!
//! ```text
//! PairScores ──► DistanceMatrix ──► LinkageTree ──► cut ──► ClusterAssignment
//!               (1 - score,         (average       (distance or
//!                missing = 1.0)      linkage)       inconsistency)
//! ```
//!
//! The tree is the expensive part and can be cached; cutting it again at a
//! different threshold only needs the tree and the span order.
//!
//! # Example
//!
//! ```rust
//! use coreflink::aggregate::PairScores;
//! use coreflink::cluster::{cluster, CutCriterion};
//! use coreflink::{PairKey, Span};
//!
//! let scores: PairScores = [(PairKey::new(Span::token(0), Span::token(3)), 0.95)]
//!     .into_iter()
//!     .collect();
//! let result = cluster(&scores, false, 0.5, CutCriterion::Distance).unwrap();
//! assert_eq!(result.assignment.labels(), &[1, 1]);
//! ```

pub mod cut;
pub mod distance;
pub mod linkage;

pub use cut::{cut, inconsistency, CutCriterion, Inconsistency, DEFAULT_INCONSISTENCY_DEPTH};
pub use distance::{score_to_distance, DistanceMatrix, MAX_DISTANCE};
pub use linkage::{LinkageTree, Merge};

use crate::aggregate::PairScores;
use crate::singleton::{remove_singletons, SINGLETON_ID};
use crate::types::Span;
use crate::{Error, Result};
use std::collections::HashSet;

/// Cluster label per span, aligned with a span order.
///
/// A label of [`SINGLETON_ID`] means "not part of a real cluster".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    spans: Vec<Span>,
    labels: Vec<i64>,
}

impl ClusterAssignment {
    /// Pair a span order with its labels.
    pub fn new(spans: Vec<Span>, labels: Vec<i64>) -> Result<Self> {
        if spans.len() != labels.len() {
            return Err(Error::invariant(format!(
                "{} spans but {} cluster labels",
                spans.len(),
                labels.len()
            )));
        }
        Ok(Self { spans, labels })
    }

    /// Span order.
    #[must_use]
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Labels, aligned with [`spans`](Self::spans).
    #[must_use]
    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    /// `(span, label)` pairs in span order.
    pub fn iter(&self) -> impl Iterator<Item = (Span, i64)> + '_ {
        self.spans.iter().copied().zip(self.labels.iter().copied())
    }

    /// Number of spans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Whether no spans are assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Number of distinct real clusters (the singleton sentinel excluded).
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.labels
            .iter()
            .filter(|&&l| l != SINGLETON_ID)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Copy with one-member clusters relabelled to [`SINGLETON_ID`].
    #[must_use]
    pub fn without_singletons(&self) -> Self {
        Self {
            spans: self.spans.clone(),
            labels: remove_singletons(&self.labels),
        }
    }
}

/// Output of [`cluster`]: the flat partition and the tree it was cut from.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// Flat clusters over the span order.
    pub assignment: ClusterAssignment,
    /// Full merge history, leaves in span order.
    pub linkage: LinkageTree,
}

/// Build a tree over every span in `scores` and cut it.
///
/// A document without scored pairs yields an empty assignment. Labels are not
/// filtered for singletons; see [`ClusterAssignment::without_singletons`].
pub fn cluster(
    scores: &PairScores,
    binarize: bool,
    threshold: f64,
    criterion: CutCriterion,
) -> Result<Clustering> {
    check_threshold(threshold)?;
    let (spans, matrix) = DistanceMatrix::from_scores(scores, binarize);
    let linkage = LinkageTree::average_linkage(&matrix);
    let assignment = recut(&linkage, spans, threshold, criterion)?;
    log::debug!(
        "clustered {} spans into {} clusters",
        assignment.len(),
        assignment.cluster_count()
    );
    Ok(Clustering {
        assignment,
        linkage,
    })
}

/// Cut a previously built tree whose leaves follow `spans`.
pub fn recut(
    linkage: &LinkageTree,
    spans: Vec<Span>,
    threshold: f64,
    criterion: CutCriterion,
) -> Result<ClusterAssignment> {
    check_threshold(threshold)?;
    if linkage.leaf_count() != spans.len() {
        return Err(Error::validation(format!(
            "linkage has {} leaves but span order has {} spans",
            linkage.leaf_count(),
            spans.len()
        )));
    }
    ClusterAssignment::new(spans, cut(linkage, threshold, criterion))
}

fn check_threshold(threshold: f64) -> Result<()> {
    if !threshold.is_finite() {
        return Err(Error::invalid_input(format!(
            "cut threshold must be finite, got {}",
            threshold
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PairKey;

    fn pair(a: usize, b: usize) -> PairKey {
        PairKey::new(Span::token(a), Span::token(b))
    }

    #[test]
    fn test_two_spans_high_score_share_cluster() {
        let scores: PairScores = [(pair(0, 1), 0.95)].into_iter().collect();
        let result = cluster(&scores, false, 2.5, CutCriterion::Distance).unwrap();
        let labels = result.assignment.labels();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0], labels[1]);
        assert!((result.linkage.merges()[0].distance - 0.05).abs() < 1e-12);
        assert_eq!(result.assignment.without_singletons().cluster_count(), 1);
    }

    #[test]
    fn test_empty_scores_empty_assignment() {
        let result = cluster(&PairScores::new(), false, 0.5, CutCriterion::Distance).unwrap();
        assert!(result.assignment.is_empty());
        assert_eq!(result.linkage.leaf_count(), 0);
    }

    #[test]
    fn test_single_span_becomes_singleton() {
        // a self-pair references one span and contributes no distance
        let scores: PairScores = [(pair(2, 2), 0.9)].into_iter().collect();
        let result = cluster(&scores, false, 0.5, CutCriterion::Distance).unwrap();
        assert_eq!(result.assignment.labels(), &[1]);
        assert_eq!(result.assignment.without_singletons().labels(), &[SINGLETON_ID]);
    }

    #[test]
    fn test_low_scores_stay_apart() {
        let scores: PairScores = [(pair(0, 1), 0.2), (pair(1, 2), 0.9)].into_iter().collect();
        let result = cluster(&scores, false, 0.5, CutCriterion::Distance).unwrap();
        let filtered = result.assignment.without_singletons();
        assert_eq!(filtered.labels()[0], SINGLETON_ID);
        assert_eq!(filtered.labels()[1], filtered.labels()[2]);
    }

    #[test]
    fn test_binarize_matches_gold_style_labels() {
        let predicted: PairScores = [(pair(0, 1), 0.7), (pair(1, 2), 0.3)].into_iter().collect();
        let gold: PairScores = [(pair(0, 1), 1.0), (pair(1, 2), 0.0)].into_iter().collect();
        let p = cluster(&predicted, true, 0.5, CutCriterion::Distance).unwrap();
        let g = cluster(&gold, true, 0.5, CutCriterion::Distance).unwrap();
        assert_eq!(p.linkage, g.linkage);
        assert_eq!(p.assignment, g.assignment);
    }

    #[test]
    fn test_recut_checks_alignment() {
        let scores: PairScores = [(pair(0, 1), 0.9)].into_iter().collect();
        let result = cluster(&scores, false, 0.5, CutCriterion::Distance).unwrap();
        assert!(recut(&result.linkage, vec![Span::token(0)], 0.5, CutCriterion::Distance).is_err());
        let again = recut(
            &result.linkage,
            result.assignment.spans().to_vec(),
            0.01,
            CutCriterion::Distance,
        )
        .unwrap();
        assert_eq!(again.labels(), &[1, 2]);
    }

    #[test]
    fn test_non_finite_threshold_rejected() {
        assert!(cluster(&PairScores::new(), false, f64::NAN, CutCriterion::Distance).is_err());
    }
}
