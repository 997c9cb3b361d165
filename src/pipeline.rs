//! Pass driver: fetch, score, aggregate, cluster, serialize, cache.
//!
//! # Modes
//!
//! ```text
//! ComputeAndCache   source ─► scorer ─► ObservationLog ─┬─► raw_scores/
//!                                                       ▼
//!                                     aggregate ─► cluster ─┬─► linkages/
//!                                                           ▼
//!                                            remove singletons ─► responses/
//!
//! ReclusterFromRaw  raw_scores/ ─► aggregate ─► cluster ─► ... ─► responses/
//!
//! CutOnly           linkages/ ─► cut ─► remove singletons ─► responses/
//! ```
//!
//! Documents are processed in waves of `workers`; within a wave each
//! document is independent. The only state shared across documents is the
//! [`ProcessedSet`], which makes a repeated `doc_id` a no-op.
//!
//! A compute pass never rewrites a response already on disk. The offline
//! modes replace it, since they are run to re-derive it.
//!
//! # Budget
//!
//! A pass stops after `iterations` documents have been accepted or the
//! source is exhausted. Empty fetches and duplicate documents retry without
//! spending the budget; more than `max_idle_fetches` of them in a row ends
//! the pass with [`Error::SourceStalled`].

use crate::aggregate::{aggregate, ObservationLog, PairScores};
use crate::bracket;
use crate::cache::{CacheMode, ResultCache, WriteOutcome, WritePolicy};
use crate::cluster::{cluster, recut, ClusterAssignment};
use crate::config::{MissingPolicy, PipelineConfig};
use crate::report::{EvaluationReporter, PairwiseReport};
use crate::source::{DocumentBatch, DocumentIndex, DocumentSource, Fetch, Scorer};
use crate::sync::{lock, Mutex};
use crate::types::{Document, ScoreMatrix};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

// =============================================================================
// Dedupe tracking
// =============================================================================

/// Document ids already taken on in the current pass.
#[derive(Debug, Default)]
pub struct ProcessedSet {
    ids: Mutex<HashSet<String>>,
}

impl ProcessedSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `doc_id` unless present; returns whether it was inserted.
    ///
    /// Check and insert happen under one lock.
    pub fn insert_if_absent(&self, doc_id: &str) -> bool {
        let mut ids = lock(&self.ids);
        if ids.contains(doc_id) {
            false
        } else {
            ids.insert(doc_id.to_string())
        }
    }

    /// Whether `doc_id` was already taken on.
    #[must_use]
    pub fn contains(&self, doc_id: &str) -> bool {
        lock(&self.ids).contains(doc_id)
    }

    /// Number of documents taken on.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.ids).len()
    }

    /// Whether nothing was taken on yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Pass summary
// =============================================================================

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRecord {
    /// Document identifier.
    pub doc_id: String,
    /// Whether the response was written or already on disk.
    pub outcome: WriteOutcome,
    /// Spans in the document's span order.
    pub spans: usize,
    /// Non-singleton clusters written.
    pub clusters: usize,
    /// Non-singleton clusters in the ground-truth clustering, when computed.
    pub gold_clusters: Option<usize>,
}

/// A document dropped under [`MissingPolicy::Skip`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFailure {
    /// Document identifier.
    pub doc_id: String,
    /// Error message.
    pub error: String,
}

/// Outcome of one pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    /// Mode the pass ran in.
    pub mode: CacheMode,
    /// Cut threshold used.
    pub threshold: f64,
    /// Pass start.
    pub started_at: DateTime<Utc>,
    /// Pass end.
    pub finished_at: DateTime<Utc>,
    /// Processed documents, in acceptance order.
    pub documents: Vec<DocumentRecord>,
    /// Repeated document ids that were skipped.
    pub duplicates: Vec<String>,
    /// Documents that failed on their own account.
    pub failed: Vec<DocumentFailure>,
    /// Fetches that returned the empty sentinel.
    pub empty_fetches: usize,
    /// Pairwise diagnostics, when ground-truth labels were seen.
    pub report: Option<PairwiseReport>,
}

impl PassSummary {
    fn start(config: &PipelineConfig) -> Self {
        let now = Utc::now();
        Self {
            mode: config.mode,
            threshold: config.threshold,
            started_at: now,
            finished_at: now,
            documents: Vec::new(),
            duplicates: Vec::new(),
            failed: Vec::new(),
            empty_fetches: 0,
            report: None,
        }
    }

    /// Responses written in this pass.
    #[must_use]
    pub fn written(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| d.outcome == WriteOutcome::Written)
            .count()
    }

    /// Responses left untouched because they already existed.
    #[must_use]
    pub fn already_present(&self) -> usize {
        self.documents.len() - self.written()
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

struct DocumentResult {
    record: DocumentRecord,
    reporter: EvaluationReporter,
}

/// Runs passes over documents with one configuration, cache, and key.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    cache: ResultCache,
    index: DocumentIndex,
}

impl Pipeline {
    /// Create a pipeline; the configuration is validated here.
    ///
    /// `index` supplies token layouts for rendering and, in the offline
    /// modes, the list of documents to process.
    pub fn new(config: PipelineConfig, cache: ResultCache, index: DocumentIndex) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache,
            index,
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Artifact cache.
    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Compute-and-cache pass over a live source.
    pub fn run<S, M>(&self, source: &mut S, scorer: &M) -> Result<PassSummary>
    where
        S: DocumentSource,
        M: Scorer<S::Features>,
    {
        if self.config.mode != CacheMode::ComputeAndCache {
            return Err(Error::invalid_input(format!(
                "mode {:?} reads from the cache; use run_offline",
                self.config.mode
            )));
        }

        let processed = ProcessedSet::new();
        let mut summary = PassSummary::start(&self.config);
        let mut reporter = EvaluationReporter::new();
        let mut remaining = self.config.iterations;
        let mut idle = 0usize;
        let mut exhausted = false;

        while remaining > 0 && !exhausted {
            let mut wave = Vec::new();
            while wave.len() < self.config.workers.min(remaining) {
                match source.next_batch()? {
                    Fetch::Batch(batch) => {
                        if processed.insert_if_absent(&batch.doc_id) {
                            idle = 0;
                            wave.push(batch);
                        } else {
                            log::warn!("'{}' already processed in this pass, skipping", batch.doc_id);
                            summary.duplicates.push(batch.doc_id);
                            idle += 1;
                        }
                    }
                    Fetch::Empty => {
                        summary.empty_fetches += 1;
                        idle += 1;
                    }
                    Fetch::Exhausted => {
                        exhausted = true;
                        break;
                    }
                }
                if idle > self.config.max_idle_fetches {
                    return Err(Error::SourceStalled(idle));
                }
            }
            remaining -= wave.len();

            let results = process_wave(wave, |batch: DocumentBatch<S::Features>| {
                let doc_id = batch.doc_id.clone();
                (doc_id, self.compute_document(batch, scorer))
            });
            self.collect(results, &mut summary, &mut reporter)?;
        }

        Ok(self.finish(summary, reporter))
    }

    /// Cut-only or recluster-from-raw pass over the documents in the key.
    pub fn run_offline(&self) -> Result<PassSummary> {
        if self.config.mode == CacheMode::ComputeAndCache {
            return Err(Error::invalid_input(
                "compute-and-cache needs a document source; use run",
            ));
        }

        let processed = ProcessedSet::new();
        let mut summary = PassSummary::start(&self.config);
        let mut reporter = EvaluationReporter::new();
        let docs: Vec<&Document> = self
            .index
            .iter()
            .filter(|doc| processed.insert_if_absent(&doc.id))
            .take(self.config.iterations)
            .collect();

        for wave in docs.chunks(self.config.workers) {
            let results = process_wave(wave.to_vec(), |doc: &Document| {
                let result = match self.config.mode {
                    CacheMode::CutOnly => self.cut_document(doc),
                    _ => self.recluster_document(doc),
                };
                (doc.id.clone(), result)
            });
            self.collect(results, &mut summary, &mut reporter)?;
        }

        Ok(self.finish(summary, reporter))
    }

    fn collect(
        &self,
        results: Vec<(String, Result<DocumentResult>)>,
        summary: &mut PassSummary,
        reporter: &mut EvaluationReporter,
    ) -> Result<()> {
        for (doc_id, result) in results {
            match result {
                Ok(done) => {
                    reporter.merge(done.reporter);
                    summary.documents.push(done.record);
                }
                Err(e) if e.is_document_fatal() && self.config.on_missing == MissingPolicy::Skip => {
                    log::warn!("skipping '{}': {}", doc_id, e);
                    summary.failed.push(DocumentFailure {
                        doc_id,
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn finish(&self, mut summary: PassSummary, reporter: EvaluationReporter) -> PassSummary {
        summary.finished_at = Utc::now();
        if !reporter.is_empty() {
            summary.report = Some(reporter.finish());
        }
        log::info!(
            "{:?} pass done: {} written, {} already present, {} duplicates, {} failed",
            summary.mode,
            summary.written(),
            summary.already_present(),
            summary.duplicates.len(),
            summary.failed.len()
        );
        summary
    }

    // -------------------------------------------------------------------------
    // Per-document steps
    // -------------------------------------------------------------------------

    fn compute_document<F, M: Scorer<F>>(
        &self,
        batch: DocumentBatch<F>,
        scorer: &M,
    ) -> Result<DocumentResult> {
        let doc = self.index.require(&batch.doc_id)?;
        let scores = ScoreMatrix::from_rows(&scorer.predict(&batch.features)?)?;

        let mut log = ObservationLog::new();
        log.record_triads(&batch.triads, &scores)?;
        for entry in log.iter() {
            for span in entry.pair.spans() {
                doc.check_span(span)?;
            }
        }
        self.cache.store_raw(&doc.id, &log)?;
        log::debug!(
            "'{}': {} pairs from {} observations",
            doc.id,
            log.len(),
            log.observation_count()
        );

        let predicted = aggregate(&log, self.config.aggregation)?;
        let assignment = self.cluster_and_store(doc, &predicted, WritePolicy::Once)?;

        let mut reporter = EvaluationReporter::new();
        let mut gold_clusters = None;
        if let Some(labels) = &batch.labels {
            let mut truth = PairScores::new();
            truth.record_triad_labels(&batch.triads, labels)?;
            for (pair, score) in predicted.iter() {
                if let Some(label) = truth.get(&pair) {
                    reporter.record(label, score);
                }
            }
            if self.config.cluster_gold {
                let gold = cluster(
                    &truth,
                    self.config.binarize,
                    self.config.threshold,
                    self.config.criterion,
                )?;
                gold_clusters = Some(gold.assignment.without_singletons().cluster_count());
            }
        }

        let mut done = self.write_response(doc, &assignment, WritePolicy::Once)?;
        done.record.gold_clusters = gold_clusters;
        done.reporter = reporter;
        Ok(done)
    }

    fn recluster_document(&self, doc: &Document) -> Result<DocumentResult> {
        let log = self.cache.load_raw(&doc.id)?;
        let predicted = aggregate(&log, self.config.aggregation)?;
        let assignment = self.cluster_and_store(doc, &predicted, WritePolicy::Replace)?;
        self.write_response(doc, &assignment, WritePolicy::Replace)
    }

    fn cut_document(&self, doc: &Document) -> Result<DocumentResult> {
        let (linkage, spans) = self.cache.load_linkage(&doc.id)?;
        let assignment = recut(
            &linkage,
            spans,
            self.config.threshold,
            self.config.criterion,
        )?;
        self.write_response(doc, &assignment, WritePolicy::Replace)
    }

    fn cluster_and_store(
        &self,
        doc: &Document,
        scores: &PairScores,
        policy: WritePolicy,
    ) -> Result<ClusterAssignment> {
        let clustering = cluster(
            scores,
            self.config.binarize,
            self.config.threshold,
            self.config.criterion,
        )?;
        if self.config.persist_linkage {
            self.cache.store_linkage(
                &doc.id,
                &clustering.linkage,
                clustering.assignment.spans(),
                policy,
            )?;
        }
        Ok(clustering.assignment)
    }

    fn write_response(
        &self,
        doc: &Document,
        assignment: &ClusterAssignment,
        policy: WritePolicy,
    ) -> Result<DocumentResult> {
        let filtered = assignment.without_singletons();
        let pairs: Vec<_> = filtered.iter().collect();
        let text = bracket::render(doc, &pairs)?;
        let outcome = self.cache.write_response(&doc.id, &text, policy)?;
        if outcome == WriteOutcome::AlreadyPresent {
            log::warn!("response for '{}' already on disk, left as is", doc.id);
        }
        log::debug!(
            "'{}': {} spans, {} clusters",
            doc.id,
            filtered.len(),
            filtered.cluster_count()
        );
        Ok(DocumentResult {
            record: DocumentRecord {
                doc_id: doc.id.clone(),
                outcome,
                spans: filtered.len(),
                clusters: filtered.cluster_count(),
                gold_clusters: None,
            },
            reporter: EvaluationReporter::new(),
        })
    }
}

fn process_wave<T, G>(items: Vec<T>, f: G) -> Vec<(String, Result<DocumentResult>)>
where
    T: Send,
    G: Fn(T) -> (String, Result<DocumentResult>) + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        items.into_par_iter().map(f).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        items.into_iter().map(f).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::document_channel;
    use crate::types::{Span, Triad};

    fn s(i: usize) -> Span {
        Span::token(i)
    }

    fn fixture(dir: &std::path::Path, mode: CacheMode) -> Pipeline {
        let cache = ResultCache::open(dir).unwrap();
        let index: DocumentIndex = [
            Document::new("nw/d1", 4),
            Document::new("nw/d2", 4),
            Document::new("nw/short", 3),
        ]
        .into_iter()
        .collect();
        let config = PipelineConfig::default().with_iterations(2).with_mode(mode);
        Pipeline::new(config, cache, index).unwrap()
    }

    fn batch(doc_id: &str, scores: Vec<Vec<f64>>) -> DocumentBatch<Vec<Vec<f64>>> {
        DocumentBatch::new(doc_id, vec![Triad::new(s(0), s(1), s(3))], scores)
    }

    #[test]
    fn test_processed_set() {
        let set = ProcessedSet::new();
        assert!(set.insert_if_absent("a"));
        assert!(!set.insert_if_absent("a"));
        assert!(set.contains("a"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_empty_and_duplicate_fetches_do_not_spend_budget() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = fixture(dir.path(), CacheMode::ComputeAndCache);
        let (tx, mut source) = document_channel(8);
        tx.send_empty().unwrap();
        tx.send(batch("nw/d1", vec![vec![0.9, 0.1]])).unwrap();
        tx.send(batch("nw/d1", vec![vec![0.9, 0.1]])).unwrap();
        tx.send_empty().unwrap();
        tx.send(batch("nw/d2", vec![vec![0.2, 0.2]])).unwrap();
        drop(tx);

        let summary = pipeline
            .run(&mut source, &crate::source::PrecomputedScorer)
            .unwrap();
        let ids: Vec<&str> = summary.documents.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["nw/d1", "nw/d2"]);
        assert_eq!(summary.duplicates, vec!["nw/d1".to_string()]);
        assert_eq!(summary.empty_fetches, 2);
        assert_eq!(summary.written(), 2);
    }

    #[test]
    fn test_stalled_source() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let config = PipelineConfig::default().with_max_idle_fetches(2);
        let pipeline = Pipeline::new(config, cache, DocumentIndex::new()).unwrap();
        let (tx, mut source) = document_channel::<Vec<Vec<f64>>>(8);
        for _ in 0..3 {
            tx.send_empty().unwrap();
        }
        let err = pipeline
            .run(&mut source, &crate::source::PrecomputedScorer)
            .unwrap_err();
        assert!(matches!(err, Error::SourceStalled(3)));
    }

    #[test]
    fn test_out_of_range_span_skipped_or_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = fixture(dir.path(), CacheMode::ComputeAndCache);
        let (tx, mut source) = document_channel(4);
        // span 3 is outside a 3-token document
        tx.send(batch("nw/short", vec![vec![0.9, 0.9]])).unwrap();
        drop(tx);
        let summary = pipeline
            .run(&mut source, &crate::source::PrecomputedScorer)
            .unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert!(!dir.path().join("responses/short").exists());
        assert!(!dir.path().join("raw_scores/short.json").exists());

        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let index: DocumentIndex = [Document::new("nw/d2", 3)].into_iter().collect();
        let config = PipelineConfig::default().with_on_missing(MissingPolicy::Abort);
        let pipeline = Pipeline::new(config, cache, index).unwrap();
        let (tx, mut source) = document_channel(4);
        tx.send(batch("nw/d2", vec![vec![0.9, 0.9]])).unwrap();
        drop(tx);
        assert!(matches!(
            pipeline.run(&mut source, &crate::source::PrecomputedScorer),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_offline_cache_miss_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = fixture(dir.path(), CacheMode::CutOnly);
        let summary = pipeline.run_offline().unwrap();
        assert!(summary.documents.is_empty());
        assert_eq!(summary.failed.len(), 2);
        assert!(summary.failed[0].error.contains("linkage"));
    }

    #[test]
    fn test_mode_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = fixture(dir.path(), CacheMode::ComputeAndCache);
        assert!(matches!(pipeline.run_offline(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_labels_feed_report_and_gold_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let index: DocumentIndex = [Document::new("d", 4)].into_iter().collect();
        let config = PipelineConfig::default().with_cluster_gold(true);
        let pipeline = Pipeline::new(config, cache, index).unwrap();

        let labels = ScoreMatrix::from_rows(&[vec![1.0, 0.0]]).unwrap();
        let (tx, mut source) = document_channel(2);
        tx.send(batch("d", vec![vec![0.8, 0.3]]).with_labels(labels))
            .unwrap();
        drop(tx);

        let summary = pipeline
            .run(&mut source, &crate::source::PrecomputedScorer)
            .unwrap();
        let report = summary.report.as_ref().unwrap();
        assert_eq!(report.classification.accuracy, 1.0);
        assert_eq!(summary.documents[0].gold_clusters, Some(1));
        assert_eq!(summary.documents[0].clusters, 1);
        assert!(summary.to_json().unwrap().contains("\"gold_clusters\": 1"));
    }
}
