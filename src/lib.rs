//! # coreflink
//!
//! Coreference clusters from pairwise link scores.
//!
//! - **Aggregation**: repeated scores of a span pair reduce to one score
//! - **Clustering**: average-linkage tree over `1 - score`, cut by distance
//!   or inconsistency
//! - **Output**: CoNLL-style bracket documents, singletons suppressed
//! - **Cache**: raw scores and trees on disk, so a threshold sweep only
//!   re-cuts
//!
//! ## Quick Start
//!
//! ```rust
//! use coreflink::aggregate::{aggregate, ObservationLog};
//! use coreflink::bracket;
//! use coreflink::cluster::{cluster, CutCriterion};
//! use coreflink::{AggregationPolicy, Document, PairKey, Span};
//!
//! let he = Span::token(3);
//! let john = Span::new(0, 1).unwrap();
//!
//! let mut log = ObservationLog::new();
//! log.push(PairKey::new(john, he), 0.2);
//! log.push(PairKey::new(john, he), 0.9);
//! log.push(PairKey::new(john, he), 0.8);
//!
//! let scores = aggregate(&log, AggregationPolicy::LastN(2)).unwrap();
//! let clustering = cluster(&scores, false, 0.5, CutCriterion::Distance).unwrap();
//! let clusters: Vec<_> = clustering.assignment.without_singletons().iter().collect();
//!
//! let doc = Document::new("nw/wsj_0001", 4);
//! let text = bracket::render(&doc, &clusters).unwrap();
//! assert!(text.contains("nw/wsj_0001\t(1\n"));
//! assert!(text.contains("nw/wsj_0001\t(1)\n"));
//! ```
//!
//! ## Passes
//!
//! [`Pipeline`] drives whole passes over a [`source::DocumentSource`] in one
//! of three [`CacheMode`]s; see [`pipeline`] for the data flow.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Effect |
//! |---------|---------|--------|
//! | `parallel` | yes | documents in a wave run on the rayon pool |
//! | `fast-lock` | no | `parking_lot` mutex for the processed-document set |

#![warn(missing_docs)]

pub mod aggregate;
pub mod bracket;
pub mod cache;
pub mod cluster;
pub mod config;
mod error;
pub mod pipeline;
pub mod report;
pub mod singleton;
pub mod source;
pub mod sync;
pub mod types;

pub mod prelude {
    //! Commonly used items, re-exported for convenience.
    //!
    //! ```rust
    //! use coreflink::prelude::*;
    //!
    //! let config = PipelineConfig::default().with_threshold(0.4);
    //! assert_eq!(config.criterion, CutCriterion::Distance);
    //! ```
    pub use crate::aggregate::{aggregate, AggregationPolicy, ObservationLog, PairScores};
    pub use crate::cache::{CacheMode, ResultCache};
    pub use crate::cluster::{cluster, recut, ClusterAssignment, CutCriterion, LinkageTree};
    pub use crate::config::{MissingPolicy, PipelineConfig};
    pub use crate::error::{Error, Result};
    pub use crate::pipeline::{PassSummary, Pipeline};
    pub use crate::source::{DocumentBatch, DocumentIndex, DocumentSource, Fetch, Scorer};
    pub use crate::types::{Document, PairKey, ScoreMatrix, ScoreShape, Span, Triad};
}

// Re-exports
pub use aggregate::AggregationPolicy;
pub use cache::CacheMode;
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use types::{Document, PairKey, ScoreMatrix, ScoreShape, Span, Triad};
