//! Score aggregation across repeated pairwise observations.
//!
//! A pair of spans can appear in several triads, so the scorer may emit
//! more than one observation for the same [`PairKey`]. The observations are
//! kept in arrival order in an [`ObservationLog`] and reduced to one score
//! per pair with an [`AggregationPolicy`].
//!
//! # Example
//!
//! ```rust
//! use coreflink::aggregate::{aggregate, AggregationPolicy, ObservationLog};
//! use coreflink::{PairKey, Span};
//!
//! let pair = PairKey::new(Span::token(0), Span::token(4));
//! let mut log = ObservationLog::new();
//! for score in [0.1, 0.9, 0.4] {
//!     log.push(pair, score);
//! }
//!
//! let scores = aggregate(&log, AggregationPolicy::LastN(2)).unwrap();
//! assert!((scores.get(&pair).unwrap() - 0.65).abs() < 1e-12);
//! ```

use crate::types::{PairKey, ScoreMatrix, Span, Triad};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// =============================================================================
// Observation log
// =============================================================================

/// All observations for one pair, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairObservations {
    /// The scored pair.
    pub pair: PairKey,
    /// Raw scores in the order the scorer produced them.
    pub scores: Vec<f64>,
}

/// Raw per-pair observations for one document.
///
/// Pairs are kept in first-arrival order and each pair's scores in arrival
/// order; nothing here ever sorts or reorders them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<PairObservations>", into = "Vec<PairObservations>")]
pub struct ObservationLog {
    entries: Vec<PairObservations>,
    index: HashMap<PairKey, usize>,
}

impl ObservationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one observation for `pair`.
    pub fn push(&mut self, pair: PairKey, score: f64) {
        match self.index.get(&pair) {
            Some(&i) => self.entries[i].scores.push(score),
            None => {
                self.index.insert(pair, self.entries.len());
                self.entries.push(PairObservations {
                    pair,
                    scores: vec![score],
                });
            }
        }
    }

    /// Append the two pair observations carried by each triad's score row.
    ///
    /// Row `i` of `scores` belongs to `triads[i]`.
    pub fn record_triads(&mut self, triads: &[Triad], scores: &ScoreMatrix) -> Result<()> {
        if triads.len() != scores.len() {
            return Err(Error::validation(format!(
                "{} triads but {} score rows",
                triads.len(),
                scores.len()
            )));
        }
        for (triad, row) in triads.iter().zip(scores.rows()) {
            for (pair, &score) in triad.scored_pairs().iter().zip(row.iter()) {
                self.push(*pair, score);
            }
        }
        Ok(())
    }

    /// Observations for `pair`, if any were recorded.
    #[must_use]
    pub fn get(&self, pair: &PairKey) -> Option<&[f64]> {
        self.index
            .get(pair)
            .map(|&i| self.entries[i].scores.as_slice())
    }

    /// Pairs and their observations in first-arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &PairObservations> {
        self.entries.iter()
    }

    /// Number of distinct pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no pair was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of observations across all pairs.
    #[must_use]
    pub fn observation_count(&self) -> usize {
        self.entries.iter().map(|e| e.scores.len()).sum()
    }
}

impl From<Vec<PairObservations>> for ObservationLog {
    fn from(entries: Vec<PairObservations>) -> Self {
        let mut log = ObservationLog::new();
        for entry in entries {
            for score in entry.scores {
                log.push(entry.pair, score);
            }
        }
        log
    }
}

impl From<ObservationLog> for Vec<PairObservations> {
    fn from(log: ObservationLog) -> Self {
        log.entries
    }
}

// =============================================================================
// Pair scores
// =============================================================================

/// One score per pair, in first-arrival order.
///
/// Holds aggregated predictions as well as ground-truth labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairScores {
    entries: Vec<(PairKey, f64)>,
    index: HashMap<PairKey, usize>,
}

impl PairScores {
    /// Create an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the score for `pair`, replacing any previous value in place.
    pub fn insert(&mut self, pair: PairKey, score: f64) {
        match self.index.get(&pair) {
            Some(&i) => self.entries[i].1 = score,
            None => {
                self.index.insert(pair, self.entries.len());
                self.entries.push((pair, score));
            }
        }
    }

    /// Record the ground-truth label of each triad's two pairs.
    ///
    /// Labels are deterministic per pair, so the last one seen wins.
    pub fn record_triad_labels(&mut self, triads: &[Triad], labels: &ScoreMatrix) -> Result<()> {
        if triads.len() != labels.len() {
            return Err(Error::validation(format!(
                "{} triads but {} label rows",
                triads.len(),
                labels.len()
            )));
        }
        for (triad, row) in triads.iter().zip(labels.rows()) {
            for (pair, &label) in triad.scored_pairs().iter().zip(row.iter()) {
                self.insert(*pair, label);
            }
        }
        Ok(())
    }

    /// Score for `pair`.
    #[must_use]
    pub fn get(&self, pair: &PairKey) -> Option<f64> {
        self.index.get(pair).map(|&i| self.entries[i].1)
    }

    /// Pairs and scores in first-arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (PairKey, f64)> + '_ {
        self.entries.iter().copied()
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every span referenced by a pair, ascending by `(start, end)`.
    #[must_use]
    pub fn spans(&self) -> Vec<Span> {
        let set: BTreeSet<Span> = self
            .entries
            .iter()
            .flat_map(|(pair, _)| pair.spans())
            .collect();
        set.into_iter().collect()
    }
}

impl FromIterator<(PairKey, f64)> for PairScores {
    fn from_iter<I: IntoIterator<Item = (PairKey, f64)>>(iter: I) -> Self {
        let mut scores = PairScores::new();
        for (pair, score) in iter {
            scores.insert(pair, score);
        }
        scores
    }
}

// =============================================================================
// Policies
// =============================================================================

/// How to reduce a pair's observations to one score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Mean of the last `n` observations (all of them if fewer than `n`).
    LastN(usize),
    /// Mean of the `n` largest observations.
    TopN(usize),
    /// Mean of the `n` smallest observations.
    BottomN(usize),
    /// Upper median: element `len / 2` of the descending sort.
    Median,
    /// Mean of the observations rounded to 0 or 1.
    RoundedMean,
    /// Mean of every observation.
    All,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        AggregationPolicy::LastN(2)
    }
}

impl AggregationPolicy {
    /// Reject windows of zero observations.
    pub fn validate(&self) -> Result<()> {
        match self {
            AggregationPolicy::LastN(0)
            | AggregationPolicy::TopN(0)
            | AggregationPolicy::BottomN(0) => Err(Error::invalid_input(format!(
                "aggregation window must be positive: {:?}",
                self
            ))),
            _ => Ok(()),
        }
    }

    /// Reduce one pair's observations.
    ///
    /// An empty slice cannot come out of an [`ObservationLog`]; it is
    /// reported as an invariant violation rather than a zero score.
    pub fn reduce(&self, values: &[f64]) -> Result<f64> {
        if values.is_empty() {
            return Err(Error::invariant("aggregation over zero observations"));
        }
        let value = match *self {
            AggregationPolicy::LastN(n) => last_n_mean(values, n),
            AggregationPolicy::TopN(n) => {
                let sorted = sorted_copy(values, true);
                mean(&sorted[..n.min(sorted.len())])
            }
            AggregationPolicy::BottomN(n) => {
                let sorted = sorted_copy(values, false);
                mean(&sorted[..n.min(sorted.len())])
            }
            AggregationPolicy::Median => sorted_copy(values, true)[values.len() / 2],
            AggregationPolicy::RoundedMean => {
                values.iter().map(|v| round_score(*v)).sum::<f64>() / values.len() as f64
            }
            AggregationPolicy::All => mean(values),
        };
        Ok(value)
    }
}

/// Reduce every pair in `log` to one score.
pub fn aggregate(log: &ObservationLog, policy: AggregationPolicy) -> Result<PairScores> {
    let mut scores = PairScores::new();
    for entry in log.iter() {
        let value = policy.reduce(&entry.scores).map_err(|e| match e {
            Error::Invariant(msg) => Error::invariant(format!("{} for pair {}", msg, entry.pair)),
            other => other,
        })?;
        scores.insert(entry.pair, value);
    }
    Ok(scores)
}

/// Mean of the last `n` values, or of all values when fewer than `n` exist.
///
/// Returns `NaN` for an empty slice; callers go through
/// [`AggregationPolicy::reduce`], which rejects that case.
#[must_use]
pub fn last_n_mean(values: &[f64], n: usize) -> f64 {
    let tail = if values.len() >= n {
        &values[values.len() - n..]
    } else {
        values
    };
    mean(tail)
}

/// Round a score to 0 or 1, ties to even (0.5 rounds to 0).
#[must_use]
pub fn round_score(score: f64) -> f64 {
    score.round_ties_even()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sorted_copy(values: &[f64], descending: bool) -> Vec<f64> {
    let mut sorted = values.to_vec();
    if descending {
        sorted.sort_by(|a, b| b.total_cmp(a));
    } else {
        sorted.sort_by(|a, b| a.total_cmp(b));
    }
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: usize, b: usize) -> PairKey {
        PairKey::new(Span::token(a), Span::token(b))
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_last_n_mean_uses_tail() {
        assert!(close(last_n_mean(&[0.1, 0.9, 0.4], 2), 0.65));
    }

    #[test]
    fn test_last_n_mean_short_sequence_uses_all() {
        assert!(close(last_n_mean(&[0.7], 2), 0.7));
        assert!(close(last_n_mean(&[0.2, 0.4], 3), 0.3));
    }

    #[test]
    fn test_aggregate_is_order_sensitive() {
        let p = pair(0, 1);
        let mut forward = ObservationLog::new();
        let mut backward = ObservationLog::new();
        for s in [0.1, 0.9, 0.4] {
            forward.push(p, s);
        }
        for s in [0.4, 0.9, 0.1] {
            backward.push(p, s);
        }
        let f = aggregate(&forward, AggregationPolicy::LastN(2)).unwrap();
        let b = aggregate(&backward, AggregationPolicy::LastN(2)).unwrap();
        assert!(close(f.get(&p).unwrap(), 0.65));
        assert!(close(b.get(&p).unwrap(), 0.5));
    }

    #[test]
    fn test_unobserved_pair_is_absent() {
        let mut log = ObservationLog::new();
        log.push(pair(0, 1), 0.3);
        let scores = aggregate(&log, AggregationPolicy::default()).unwrap();
        assert_eq!(scores.len(), 1);
        assert!(scores.get(&pair(1, 2)).is_none());
    }

    #[test]
    fn test_reduce_empty_is_invariant_violation() {
        let err = AggregationPolicy::LastN(2).reduce(&[]).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[test]
    fn test_alternative_policies() {
        let values = [0.2, 0.8, 0.6, 0.4];
        assert!(close(AggregationPolicy::TopN(2).reduce(&values).unwrap(), 0.7));
        assert!(close(AggregationPolicy::BottomN(3).reduce(&values).unwrap(), 0.4));
        // descending: 0.8 0.6 0.4 0.2 -> index 2
        assert!(close(AggregationPolicy::Median.reduce(&values).unwrap(), 0.4));
        assert!(close(AggregationPolicy::RoundedMean.reduce(&values).unwrap(), 0.5));
        assert!(close(AggregationPolicy::All.reduce(&values).unwrap(), 0.5));
    }

    #[test]
    fn test_sorting_policies_leave_log_untouched() {
        let p = pair(2, 3);
        let mut log = ObservationLog::new();
        for s in [0.9, 0.1, 0.5] {
            log.push(p, s);
        }
        aggregate(&log, AggregationPolicy::TopN(1)).unwrap();
        assert_eq!(log.get(&p).unwrap(), &[0.9, 0.1, 0.5]);
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(AggregationPolicy::LastN(0).validate().is_err());
        assert!(AggregationPolicy::Median.validate().is_ok());
    }

    #[test]
    fn test_record_triads_routes_columns() {
        let (a, b, c) = (Span::token(0), Span::token(3), Span::token(7));
        let triads = [Triad::new(a, b, c)];
        let scores = ScoreMatrix::from_rows(&[vec![0.25, 0.75]]).unwrap();
        let mut log = ObservationLog::new();
        log.record_triads(&triads, &scores).unwrap();
        assert_eq!(log.get(&PairKey::new(b, c)).unwrap(), &[0.25]);
        assert_eq!(log.get(&PairKey::new(a, c)).unwrap(), &[0.75]);

        let short = ScoreMatrix::from_rows(&[]).unwrap();
        assert!(log.record_triads(&triads, &short).is_err());
    }

    #[test]
    fn test_log_json_preserves_arrival_order() {
        let mut log = ObservationLog::new();
        log.push(pair(5, 6), 0.3);
        log.push(pair(0, 1), 0.9);
        log.push(pair(5, 6), 0.1);
        let json = serde_json::to_string(&log).unwrap();
        let back: ObservationLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log);
        let pairs: Vec<PairKey> = back.iter().map(|e| e.pair).collect();
        assert_eq!(pairs, vec![pair(5, 6), pair(0, 1)]);
    }

    #[test]
    fn test_round_score_ties_to_even() {
        assert_eq!(round_score(0.5), 0.0);
        assert_eq!(round_score(0.51), 1.0);
        assert_eq!(round_score(0.49), 0.0);
    }

    #[test]
    fn test_pair_scores_spans_sorted_unique() {
        let scores: PairScores = [(pair(4, 1), 0.5), (pair(1, 2), 0.5)].into_iter().collect();
        let spans = scores.spans();
        assert_eq!(spans, vec![Span::token(1), Span::token(2), Span::token(4)]);
    }
}
