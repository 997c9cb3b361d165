//! Average-linkage agglomerative clustering.
//!
//! Leaves are numbered `0..n`; the cluster created by merge `i` gets id
//! `n + i`. Each merge record is `(left, right, distance, size)` with
//! `left < right`, the same layout hierarchical-clustering tools exchange.
//!
//! ```text
//!         5 (d=0.6)
//!        / \
//!       4   \   (d=0.1)
//!      / \   \
//!     0   1   2 ... leaves
//! ```

use super::distance::DistanceMatrix;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One merge of two clusters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(usize, usize, f64, usize)", into = "(usize, usize, f64, usize)")]
pub struct Merge {
    /// Smaller of the two merged cluster ids.
    pub left: usize,
    /// Larger of the two merged cluster ids.
    pub right: usize,
    /// Linkage distance at which the clusters were joined.
    pub distance: f64,
    /// Number of leaves in the new cluster.
    pub size: usize,
}

impl From<(usize, usize, f64, usize)> for Merge {
    fn from((left, right, distance, size): (usize, usize, f64, usize)) -> Self {
        Self {
            left,
            right,
            distance,
            size,
        }
    }
}

impl From<Merge> for (usize, usize, f64, usize) {
    fn from(m: Merge) -> Self {
        (m.left, m.right, m.distance, m.size)
    }
}

#[derive(Serialize, Deserialize)]
struct RawLinkageTree {
    leaves: usize,
    merges: Vec<Merge>,
}

/// Complete merge history over `leaves` items.
///
/// # Invariants
///
/// - exactly `leaves - 1` merges (none for zero or one leaf)
/// - merge `i` only references leaves or clusters created before it
/// - every id is merged at most once; sizes add up
///
/// Distances need not be monotonic; cutting tolerates inversions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLinkageTree", into = "RawLinkageTree")]
pub struct LinkageTree {
    leaves: usize,
    merges: Vec<Merge>,
}

impl TryFrom<RawLinkageTree> for LinkageTree {
    type Error = Error;

    fn try_from(raw: RawLinkageTree) -> Result<Self> {
        LinkageTree::new(raw.leaves, raw.merges)
    }
}

impl From<LinkageTree> for RawLinkageTree {
    fn from(tree: LinkageTree) -> Self {
        RawLinkageTree {
            leaves: tree.leaves,
            merges: tree.merges,
        }
    }
}

impl LinkageTree {
    /// Build a tree from merge records, checking its structure.
    pub fn new(leaves: usize, merges: Vec<Merge>) -> Result<Self> {
        let expected = leaves.saturating_sub(1);
        if merges.len() != expected {
            return Err(Error::validation(format!(
                "linkage over {} leaves needs {} merges, got {}",
                leaves,
                expected,
                merges.len()
            )));
        }

        let mut sizes = vec![1usize; leaves];
        let mut used = vec![false; leaves + merges.len()];
        for (i, m) in merges.iter().enumerate() {
            let available = leaves + i;
            if m.left >= m.right || m.right >= available {
                return Err(Error::validation(format!(
                    "merge {} joins ({}, {}) but only ids below {} exist",
                    i, m.left, m.right, available
                )));
            }
            if used[m.left] || used[m.right] {
                return Err(Error::validation(format!(
                    "merge {} reuses an already merged cluster",
                    i
                )));
            }
            if !m.distance.is_finite() {
                return Err(Error::validation(format!(
                    "merge {} has non-finite distance",
                    i
                )));
            }
            let size = sizes[m.left] + sizes[m.right];
            if size != m.size {
                return Err(Error::validation(format!(
                    "merge {} records size {} but joins {} leaves",
                    i, m.size, size
                )));
            }
            used[m.left] = true;
            used[m.right] = true;
            sizes.push(size);
        }

        Ok(Self { leaves, merges })
    }

    /// Run average-linkage (UPGMA) clustering over `matrix`.
    ///
    /// Repeatedly joins the two closest active clusters; the distance from
    /// the joined cluster to any other is the size-weighted mean of its
    /// parts' distances. Ties go to the first pair in scan order.
    #[must_use]
    pub fn average_linkage(matrix: &DistanceMatrix) -> Self {
        let n = matrix.len();
        let mut dist: Vec<f64> = (0..n * n).map(|k| matrix.get(k / n, k % n)).collect();
        let mut size = vec![1usize; n];
        let mut id: Vec<usize> = (0..n).collect();
        let mut active = vec![true; n];
        let mut merges = Vec::with_capacity(n.saturating_sub(1));

        for step in 0..n.saturating_sub(1) {
            let mut best: Option<(usize, usize, f64)> = None;
            for i in (0..n).filter(|&i| active[i]) {
                for j in (i + 1..n).filter(|&j| active[j]) {
                    let d = dist[i * n + j];
                    if best.map_or(true, |(_, _, bd)| d < bd) {
                        best = Some((i, j, d));
                    }
                }
            }
            // n - step >= 2 active slots remain, so a pair always exists
            let Some((i, j, d)) = best else { break };

            let merged = size[i] + size[j];
            merges.push(Merge {
                left: id[i].min(id[j]),
                right: id[i].max(id[j]),
                distance: d,
                size: merged,
            });

            for k in (0..n).filter(|&k| active[k] && k != i && k != j) {
                let updated = (size[i] as f64 * dist[i * n + k] + size[j] as f64 * dist[j * n + k])
                    / merged as f64;
                dist[i * n + k] = updated;
                dist[k * n + i] = updated;
            }
            size[i] = merged;
            active[j] = false;
            id[i] = n + step;
        }

        Self { leaves: n, merges }
    }

    /// Number of leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves
    }

    /// Merge records in creation order.
    #[must_use]
    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Id of the root cluster, `None` for an empty tree.
    #[must_use]
    pub fn root(&self) -> Option<usize> {
        match self.leaves {
            0 => None,
            n => Some(n - 1 + self.merges.len()),
        }
    }

    /// Merge record that created cluster `node`, `None` for leaves.
    #[must_use]
    pub fn merge_of(&self, node: usize) -> Option<&Merge> {
        node.checked_sub(self.leaves)
            .and_then(|i| self.merges.get(i))
    }

    /// Whether merge distances never decrease from child to parent.
    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        self.merges.iter().all(|m| {
            [m.left, m.right].iter().all(|&child| {
                self.merge_of(child)
                    .map_or(true, |c| c.distance <= m.distance)
            })
        })
    }

    /// Leaves under `node`, left subtree first.
    #[must_use]
    pub fn leaves_under(&self, node: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            match self.merge_of(current) {
                Some(m) => {
                    stack.push(m.right);
                    stack.push(m.left);
                }
                None => out.push(current),
            }
        }
        out
    }
}
