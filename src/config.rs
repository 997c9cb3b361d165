//! Pass configuration.
//!
//! ```rust
//! use coreflink::aggregate::AggregationPolicy;
//! use coreflink::cache::CacheMode;
//! use coreflink::config::PipelineConfig;
//!
//! let config = PipelineConfig::default()
//!     .with_iterations(40)
//!     .with_threshold(0.3)
//!     .with_aggregation(AggregationPolicy::LastN(3))
//!     .with_mode(CacheMode::CutOnly);
//! assert!(config.validate().is_ok());
//! ```

use crate::aggregate::AggregationPolicy;
use crate::cache::CacheMode;
use crate::cluster::CutCriterion;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What to do with a document whose processing fails on its own account
/// (missing cache artifact, span out of range, malformed record).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Log, record the failure in the pass summary, carry on.
    #[default]
    Skip,
    /// Stop the pass with the document's error.
    Abort,
}

/// Parameters of one pass over a document source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Documents to produce before stopping.
    pub iterations: usize,
    /// Cut threshold `t`.
    pub threshold: f64,
    /// Reduction of repeated observations of a pair.
    pub aggregation: AggregationPolicy,
    /// Statistic compared against `threshold`.
    pub criterion: CutCriterion,
    /// Round scores to 0/1 before the distance transform.
    pub binarize: bool,
    /// Which stages run and which artifacts are read.
    pub mode: CacheMode,
    /// Write linkage trees and span orders.
    pub persist_linkage: bool,
    /// Also cluster the ground-truth labels.
    pub cluster_gold: bool,
    /// Handling of per-document failures.
    pub on_missing: MissingPolicy,
    /// Documents processed concurrently per wave.
    pub workers: usize,
    /// Consecutive empty fetches tolerated before giving up.
    pub max_idle_fetches: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            threshold: 0.5,
            aggregation: AggregationPolicy::default(),
            criterion: CutCriterion::default(),
            binarize: false,
            mode: CacheMode::default(),
            persist_linkage: true,
            cluster_gold: false,
            on_missing: MissingPolicy::default(),
            workers: 1,
            max_idle_fetches: 1000,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; absent fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_file_over(path, &Self::default())
    }

    /// Load from a JSON file; absent fields keep their value in `base`.
    ///
    /// ```rust
    /// use coreflink::config::PipelineConfig;
    /// use std::io::Write;
    ///
    /// let mut file = tempfile::NamedTempFile::new().unwrap();
    /// write!(file, r#"{{"threshold": 0.3}}"#).unwrap();
    ///
    /// let base = PipelineConfig::default().with_iterations(250);
    /// let config = PipelineConfig::from_json_file_over(file.path(), &base).unwrap();
    /// assert_eq!(config.iterations, 250);
    /// assert_eq!(config.threshold, 0.3);
    /// ```
    pub fn from_json_file_over(path: impl AsRef<Path>, base: &Self) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let overrides: serde_json::Value = serde_json::from_str(&content)?;
        let serde_json::Value::Object(fields) = overrides else {
            return Err(Error::invalid_input(format!(
                "{} must hold a JSON object",
                path.as_ref().display()
            )));
        };
        let mut merged = serde_json::to_value(base)?;
        if let serde_json::Value::Object(target) = &mut merged {
            target.extend(fields);
        }
        let config: Self = serde_json::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field for a usable value.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::invalid_input("iterations must be at least 1"));
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(Error::invalid_input(format!(
                "threshold must be a finite non-negative number, got {}",
                self.threshold
            )));
        }
        if self.workers == 0 {
            return Err(Error::invalid_input("workers must be at least 1"));
        }
        if let CutCriterion::Inconsistent { depth: 0 } = self.criterion {
            return Err(Error::invalid_input("inconsistency depth must be at least 1"));
        }
        self.aggregation.validate()
    }

    /// Set the iteration budget.
    #[must_use]
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the cut threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the aggregation policy.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: AggregationPolicy) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Set the cut criterion.
    #[must_use]
    pub fn with_criterion(mut self, criterion: CutCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Round scores before the distance transform.
    #[must_use]
    pub fn with_binarize(mut self, binarize: bool) -> Self {
        self.binarize = binarize;
        self
    }

    /// Set the cache mode.
    #[must_use]
    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable or disable writing linkage trees.
    #[must_use]
    pub fn with_persist_linkage(mut self, persist: bool) -> Self {
        self.persist_linkage = persist;
        self
    }

    /// Enable or disable clustering the ground-truth labels.
    #[must_use]
    pub fn with_cluster_gold(mut self, cluster_gold: bool) -> Self {
        self.cluster_gold = cluster_gold;
        self
    }

    /// Set the per-document failure policy.
    #[must_use]
    pub fn with_on_missing(mut self, policy: MissingPolicy) -> Self {
        self.on_missing = policy;
        self
    }

    /// Set the number of concurrent documents per wave.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the consecutive-empty-fetch limit.
    #[must_use]
    pub fn with_max_idle_fetches(mut self, limit: usize) -> Self {
        self.max_idle_fetches = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.aggregation, AggregationPolicy::LastN(2));
        assert_eq!(config.criterion, CutCriterion::Distance);
        assert_eq!(config.mode, CacheMode::ComputeAndCache);
        assert!(config.persist_linkage);
        assert_eq!(config.on_missing, MissingPolicy::Skip);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = PipelineConfig::default();
        assert!(base.clone().with_iterations(0).validate().is_err());
        assert!(base.clone().with_threshold(f64::INFINITY).validate().is_err());
        assert!(base.clone().with_threshold(-0.1).validate().is_err());
        assert!(base.clone().with_workers(0).validate().is_err());
        assert!(base
            .clone()
            .with_aggregation(AggregationPolicy::TopN(0))
            .validate()
            .is_err());
        assert!(base
            .with_criterion(CutCriterion::Inconsistent { depth: 0 })
            .validate()
            .is_err());
    }

    #[test]
    fn test_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"threshold": 0.3, "mode": "cut_only", "criterion": {{"kind": "inconsistent", "depth": 3}}}}"#
        )
        .unwrap();
        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.threshold, 0.3);
        assert_eq!(config.mode, CacheMode::CutOnly);
        assert_eq!(config.criterion, CutCriterion::Inconsistent { depth: 3 });
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_json_file_over_base_keeps_unset_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"workers": 4}}"#).unwrap();
        let base = PipelineConfig::default()
            .with_iterations(250)
            .with_threshold(0.2);
        let config = PipelineConfig::from_json_file_over(file.path(), &base).unwrap();
        assert_eq!(config.iterations, 250);
        assert_eq!(config.threshold, 0.2);
        assert_eq!(config.workers, 4);

        let mut list = tempfile::NamedTempFile::new().unwrap();
        write!(list, "[1, 2]").unwrap();
        assert!(matches!(
            PipelineConfig::from_json_file_over(list.path(), &base),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_invalid_json_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"iterations": 0}}"#).unwrap();
        assert!(matches!(
            PipelineConfig::from_json_file(file.path()),
            Err(Error::InvalidInput(_))
        ));
    }
}
