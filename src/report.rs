//! Pairwise link-classification diagnostics.
//!
//! Scores the raw link decisions (before clustering) against ground-truth
//! labels. Nothing here feeds back into clustering or serialization.
//!
//! # Example
//!
//! ```rust
//! use coreflink::report::EvaluationReporter;
//!
//! let mut reporter = EvaluationReporter::new();
//! for (truth, predicted) in [(0.0, 0.1), (1.0, 0.9), (1.0, 0.2), (0.0, 0.3)] {
//!     reporter.record(truth, predicted);
//! }
//! let report = reporter.finish();
//! assert_eq!(report.classification.accuracy, 0.75);
//! println!("{}", report);
//! ```

use crate::types::ScoreMatrix;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Number of equal-width histogram bins over `[0, 1]`.
pub const HISTOGRAM_BINS: usize = 4;

// =============================================================================
// Accumulation
// =============================================================================

/// Accumulates `(truth, predicted)` score pairs across a pass.
#[derive(Debug, Clone, Default)]
pub struct EvaluationReporter {
    truth: Vec<f64>,
    predicted: Vec<f64>,
}

impl EvaluationReporter {
    /// Empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one link decision.
    pub fn record(&mut self, truth: f64, predicted: f64) {
        self.truth.push(truth);
        self.predicted.push(predicted);
    }

    /// Absorb another reporter's observations, e.g. from a parallel worker.
    pub fn merge(&mut self, other: EvaluationReporter) {
        self.truth.extend(other.truth);
        self.predicted.extend(other.predicted);
    }

    /// Number of recorded pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.truth.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.truth.is_empty()
    }

    /// Compute the report.
    #[must_use]
    pub fn finish(&self) -> PairwiseReport {
        PairwiseReport {
            classification: ClassificationReport::compute(&self.truth, &self.predicted),
            truth_histogram: Histogram::of(&self.truth),
            predicted_histogram: Histogram::of(&self.predicted),
        }
    }
}

// =============================================================================
// Report types
// =============================================================================

/// Precision, recall, F1 and support for one class or one average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// tp / (tp + fp), 0 when nothing was predicted.
    pub precision: f64,
    /// tp / (tp + fn), 0 when the class never occurs.
    pub recall: f64,
    /// Harmonic mean of precision and recall, 0 when both are 0.
    pub f1: f64,
    /// Number of true occurrences.
    pub support: usize,
}

/// Metrics for one label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassRow {
    /// Class label (rounded score).
    pub label: i64,
    /// Metrics for the label.
    pub metrics: ClassMetrics,
}

/// Per-class metrics plus accuracy and macro/weighted averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// One row per label in the union of true and predicted labels, ascending.
    pub classes: Vec<ClassRow>,
    /// Fraction of exact matches.
    pub accuracy: f64,
    /// Unweighted mean over classes.
    pub macro_avg: ClassMetrics,
    /// Support-weighted mean over classes.
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    /// Compare `truth` against `predicted`; both are rounded to the nearest
    /// integer label first.
    #[must_use]
    pub fn compute(truth: &[f64], predicted: &[f64]) -> Self {
        let truth: Vec<i64> = truth.iter().map(|&v| to_label(v)).collect();
        let predicted: Vec<i64> = predicted.iter().map(|&v| to_label(v)).collect();
        let total = truth.len().min(predicted.len());

        let labels: BTreeSet<i64> = truth.iter().chain(predicted.iter()).copied().collect();
        let classes: Vec<ClassRow> = labels
            .into_iter()
            .map(|label| {
                let mut tp = 0usize;
                let mut fp = 0usize;
                let mut fn_ = 0usize;
                for (&t, &p) in truth.iter().zip(predicted.iter()) {
                    match (t == label, p == label) {
                        (true, true) => tp += 1,
                        (false, true) => fp += 1,
                        (true, false) => fn_ += 1,
                        (false, false) => {}
                    }
                }
                let precision = ratio(tp, tp + fp);
                let recall = ratio(tp, tp + fn_);
                ClassRow {
                    label,
                    metrics: ClassMetrics {
                        precision,
                        recall,
                        f1: f1(precision, recall),
                        support: tp + fn_,
                    },
                }
            })
            .collect();

        let correct = truth
            .iter()
            .zip(predicted.iter())
            .filter(|(t, p)| t == p)
            .count();

        let n_classes = classes.len() as f64;
        let mean = |get: fn(&ClassMetrics) -> f64| {
            if classes.is_empty() {
                0.0
            } else {
                classes.iter().map(|c| get(&c.metrics)).sum::<f64>() / n_classes
            }
        };
        let weighted = |get: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                0.0
            } else {
                classes
                    .iter()
                    .map(|c| get(&c.metrics) * c.metrics.support as f64)
                    .sum::<f64>()
                    / total as f64
            }
        };

        let macro_avg = ClassMetrics {
            precision: mean(|m| m.precision),
            recall: mean(|m| m.recall),
            f1: mean(|m| m.f1),
            support: total,
        };
        let weighted_avg = ClassMetrics {
            precision: weighted(|m| m.precision),
            recall: weighted(|m| m.recall),
            f1: weighted(|m| m.f1),
            support: total,
        };

        Self {
            classes,
            accuracy: ratio(correct, total),
            macro_avg,
            weighted_avg,
        }
    }

    /// Metrics for one label, if it occurred.
    #[must_use]
    pub fn class(&self, label: i64) -> Option<&ClassMetrics> {
        self.classes
            .iter()
            .find(|row| row.label == label)
            .map(|row| &row.metrics)
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for row in &self.classes {
            write_row(f, &row.label.to_string(), &row.metrics)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9.3} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        write_row(f, "macro avg", &self.macro_avg)?;
        write_row(f, "weighted avg", &self.weighted_avg)
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, name: &str, m: &ClassMetrics) -> fmt::Result {
    writeln!(
        f,
        "{:>12} {:>9.3} {:>9.3} {:>9.3} {:>9}",
        name, m.precision, m.recall, m.f1, m.support
    )
}

/// Equal-width histogram over `[0, 1]`; the last bin includes 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Bin edges, `HISTOGRAM_BINS + 1` values from 0 to 1.
    pub edges: Vec<f64>,
    /// Count per bin.
    pub counts: Vec<usize>,
    /// Values outside `[0, 1]` (or NaN), not counted in any bin.
    pub outside: usize,
}

impl Histogram {
    /// Bin `values`.
    #[must_use]
    pub fn of(values: &[f64]) -> Self {
        let width = 1.0 / HISTOGRAM_BINS as f64;
        let mut counts = vec![0; HISTOGRAM_BINS];
        let mut outside = 0;
        for &v in values {
            if !(0.0..=1.0).contains(&v) {
                outside += 1;
                continue;
            }
            let bin = ((v / width) as usize).min(HISTOGRAM_BINS - 1);
            counts[bin] += 1;
        }
        Self {
            edges: (0..=HISTOGRAM_BINS).map(|i| i as f64 * width).collect(),
            counts,
            outside,
        }
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<String> = self
            .counts
            .iter()
            .zip(self.edges.windows(2))
            .map(|(count, edge)| format!("[{:.2}, {:.2}]: {}", edge[0], edge[1], count))
            .collect();
        write!(f, "{}", cells.join("  "))
    }
}

/// Classification metrics plus score histograms for one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseReport {
    /// Per-class metrics over rounded scores.
    pub classification: ClassificationReport,
    /// Distribution of ground-truth scores.
    pub truth_histogram: Histogram,
    /// Distribution of predicted scores.
    pub predicted_histogram: Histogram,
}

impl PairwiseReport {
    /// Report over raw score rows, without aggregation or clustering.
    ///
    /// Both matrices are flattened column by column within each row, so a
    /// triad contributes one decision per scored pair.
    pub fn from_rows(truth: &ScoreMatrix, predicted: &ScoreMatrix) -> Result<Self> {
        if truth.len() != predicted.len() {
            return Err(Error::validation(format!(
                "{} label rows but {} score rows",
                truth.len(),
                predicted.len()
            )));
        }
        let mut reporter = EvaluationReporter::new();
        for (t, p) in truth.rows().iter().zip(predicted.rows()) {
            for k in 0..2 {
                reporter.record(t[k], p[k]);
            }
        }
        Ok(reporter.finish())
    }
}

impl fmt::Display for PairwiseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.classification)?;
        writeln!(f)?;
        writeln!(f, "true:      {}", self.truth_histogram)?;
        write!(f, "predicted: {}", self.predicted_histogram)
    }
}

fn to_label(score: f64) -> i64 {
    score.round_ties_even() as i64
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}
