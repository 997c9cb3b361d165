//! Flat cluster extraction from a [`LinkageTree`].
//!
//! Both criteria reduce to the same walk: every merge gets a statistic, each
//! node takes the maximum statistic over its subtree, and a depth-first walk
//! from the root stops at the first node whose subtree maximum is at most
//! the threshold. All leaves below that node share one flat cluster. Taking
//! the subtree maximum keeps the partition valid when merge distances are
//! not monotonic.

use super::linkage::LinkageTree;
use serde::{Deserialize, Serialize};

/// Default neighbourhood depth for the inconsistency statistic.
pub const DEFAULT_INCONSISTENCY_DEPTH: usize = 6;

/// How to turn a tree into a flat partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CutCriterion {
    /// Leaves joined at linkage distance `<= t` share a cluster.
    Distance,
    /// Cut where the inconsistency coefficient over `depth` levels exceeds `t`.
    Inconsistent {
        /// Levels of non-singleton descendants (including the node) to include.
        depth: usize,
    },
}

impl Default for CutCriterion {
    fn default() -> Self {
        CutCriterion::Distance
    }
}

/// Inconsistency statistics for one merge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Inconsistency {
    /// Mean merge distance over the neighbourhood.
    pub mean: f64,
    /// Sample standard deviation of those distances.
    pub std: f64,
    /// Number of merges in the neighbourhood.
    pub count: usize,
    /// `(distance - mean) / std`, or 0 when `std` is 0.
    pub coefficient: f64,
}

/// Inconsistency statistics for every merge, in merge order.
#[must_use]
pub fn inconsistency(tree: &LinkageTree, depth: usize) -> Vec<Inconsistency> {
    let leaves = tree.leaf_count();
    let merges = tree.merges();
    let mut out = Vec::with_capacity(merges.len());

    for (i, merge) in merges.iter().enumerate() {
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut count = 0usize;
        let mut stack = vec![(leaves + i, 0usize)];
        while let Some((node, level)) = stack.pop() {
            let Some(m) = tree.merge_of(node) else { continue };
            sum += m.distance;
            sum_sq += m.distance * m.distance;
            count += 1;
            if level + 1 < depth {
                stack.push((m.left, level + 1));
                stack.push((m.right, level + 1));
            }
        }

        let mean = sum / count as f64;
        let std = if count < 2 {
            0.0
        } else {
            ((sum_sq - sum * sum / count as f64) / (count - 1) as f64)
                .max(0.0)
                .sqrt()
        };
        let coefficient = if std > 0.0 {
            (merge.distance - mean) / std
        } else {
            0.0
        };
        out.push(Inconsistency {
            mean,
            std,
            count,
            coefficient,
        });
    }
    out
}

/// Cut `tree` into flat cluster labels, one per leaf.
///
/// Labels start at 1 and are assigned in depth-first, left-first order
/// from the root.
#[must_use]
pub fn cut(tree: &LinkageTree, threshold: f64, criterion: CutCriterion) -> Vec<i64> {
    let statistic: Vec<f64> = match criterion {
        CutCriterion::Distance => tree.merges().iter().map(|m| m.distance).collect(),
        CutCriterion::Inconsistent { depth } => inconsistency(tree, depth)
            .iter()
            .map(|s| s.coefficient)
            .collect(),
    };
    cut_by_statistic(tree, &statistic, threshold)
}

fn cut_by_statistic(tree: &LinkageTree, statistic: &[f64], threshold: f64) -> Vec<i64> {
    let leaves = tree.leaf_count();
    let mut labels = vec![0i64; leaves];
    let Some(root) = tree.root() else {
        return labels;
    };

    // children precede parents, so one forward pass fills subtree maxima
    let mut subtree_max = Vec::with_capacity(statistic.len());
    for (merge, &value) in tree.merges().iter().zip(statistic) {
        let child_max = |node: usize| {
            node.checked_sub(leaves)
                .map_or(f64::NEG_INFINITY, |i| subtree_max[i])
        };
        let max = value.max(child_max(merge.left)).max(child_max(merge.right));
        subtree_max.push(max);
    }

    let mut next_label = 1i64;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match tree.merge_of(node) {
            Some(merge) if subtree_max[node - leaves] > threshold => {
                stack.push(merge.right);
                stack.push(merge.left);
            }
            _ => {
                for leaf in tree.leaves_under(node) {
                    labels[leaf] = next_label;
                }
                next_label += 1;
            }
        }
    }
    labels
}
