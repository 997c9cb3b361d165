//! Document sources, scorers, and the key-document index.
//!
//! # Architecture
//!
//! ```text
//! producer thread ──► DocumentSender ══bounded══► ChannelSource ──► Pipeline
//!                        (send / send_empty)        (next_batch blocks)
//!
//! JSONL file ─────────────────────────────────► JsonlSource ─────► Pipeline
//!                                                  (one record per line)
//! ```
//!
//! A fetch yields one of three things: a document batch, the empty
//! sentinel ("nothing this call, try again"), or exhaustion. The empty
//! sentinel never counts against the iteration budget.
//!
//! # Example
//!
//! ```rust
//! use coreflink::source::{document_channel, DocumentBatch, DocumentSource, Fetch};
//!
//! let (tx, mut source) = document_channel::<()>(4);
//! tx.send_empty().unwrap();
//! tx.send(DocumentBatch::new("wsj_0001", Vec::new(), ())).unwrap();
//! drop(tx);
//!
//! assert!(matches!(source.next_batch().unwrap(), Fetch::Empty));
//! assert!(matches!(source.next_batch().unwrap(), Fetch::Batch(_)));
//! assert!(matches!(source.next_batch().unwrap(), Fetch::Exhausted));
//! ```

use crate::bracket::parse_documents;
use crate::types::{Document, ScoreMatrix, Span, Triad};
use crate::{Error, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::BufRead;

// =============================================================================
// Batches and fetch results
// =============================================================================

/// Everything the pipeline needs about one document from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentBatch<F> {
    /// Document identifier.
    pub doc_id: String,
    /// Span triads, one per score row.
    pub triads: Vec<Triad>,
    /// Opaque scorer input.
    pub features: F,
    /// Ground-truth score rows, when available.
    pub labels: Option<ScoreMatrix>,
}

impl<F> DocumentBatch<F> {
    /// Batch without ground-truth labels.
    #[must_use]
    pub fn new(doc_id: impl Into<String>, triads: Vec<Triad>, features: F) -> Self {
        Self {
            doc_id: doc_id.into(),
            triads,
            features,
            labels: None,
        }
    }

    /// Attach ground-truth labels.
    #[must_use]
    pub fn with_labels(mut self, labels: ScoreMatrix) -> Self {
        self.labels = Some(labels);
        self
    }
}

/// Result of one fetch.
#[derive(Debug)]
pub enum Fetch<F> {
    /// A document to process.
    Batch(DocumentBatch<F>),
    /// No data this call; fetch again.
    Empty,
    /// The source has nothing more to give.
    Exhausted,
}

/// Producer of per-document batches.
pub trait DocumentSource {
    /// Scorer input carried by each batch.
    type Features: Send;

    /// Fetch the next batch. May block.
    fn next_batch(&mut self) -> Result<Fetch<Self::Features>>;
}

/// External model producing one score row per triad.
///
/// Rows are 2 or 3 wide; the pipeline fixes the shape when it ingests them.
pub trait Scorer<F>: Sync {
    /// Score a document's features.
    fn predict(&self, features: &F) -> Result<Vec<Vec<f64>>>;
}

impl<F, S: Fn(&F) -> Result<Vec<Vec<f64>>> + Sync> Scorer<F> for S {
    fn predict(&self, features: &F) -> Result<Vec<Vec<f64>>> {
        self(features)
    }
}

// =============================================================================
// Channel source
// =============================================================================

/// Sending half of a [`document_channel`].
#[derive(Debug)]
pub struct DocumentSender<F> {
    tx: Sender<Option<DocumentBatch<F>>>,
}

impl<F> Clone for DocumentSender<F> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<F> DocumentSender<F> {
    /// Queue a batch, blocking while the channel is full.
    pub fn send(&self, batch: DocumentBatch<F>) -> Result<()> {
        self.tx
            .send(Some(batch))
            .map_err(|_| Error::invariant("document channel receiver dropped"))
    }

    /// Queue the empty sentinel.
    pub fn send_empty(&self) -> Result<()> {
        self.tx
            .send(None)
            .map_err(|_| Error::invariant("document channel receiver dropped"))
    }
}

/// Receiving half of a [`document_channel`]. Exhausted once every sender
/// is dropped and the buffer is drained.
#[derive(Debug)]
pub struct ChannelSource<F> {
    rx: Receiver<Option<DocumentBatch<F>>>,
}

impl<F: Send> DocumentSource for ChannelSource<F> {
    type Features = F;

    fn next_batch(&mut self) -> Result<Fetch<F>> {
        Ok(match self.rx.recv() {
            Ok(Some(batch)) => Fetch::Batch(batch),
            Ok(None) => Fetch::Empty,
            Err(_) => Fetch::Exhausted,
        })
    }
}

/// Bounded producer/consumer buffer between a document producer and the
/// pipeline.
#[must_use]
pub fn document_channel<F>(capacity: usize) -> (DocumentSender<F>, ChannelSource<F>) {
    let (tx, rx) = bounded(capacity);
    (DocumentSender { tx }, ChannelSource { rx })
}

// =============================================================================
// JSONL source
// =============================================================================

#[derive(Debug, Deserialize)]
struct ScoredRecord {
    doc_id: String,
    triads: Vec<[Span; 3]>,
    scores: Vec<Vec<f64>>,
    #[serde(default)]
    labels: Option<Vec<Vec<f64>>>,
}

/// Reads one scored-triad record per line:
///
/// ```text
/// {"doc_id": "nw/wsj_0001", "triads": [[[0,1],[3,3],[5,6]]], "scores": [[0.8, 0.1]], "labels": [[1, 0]]}
/// ```
///
/// A blank line is the empty sentinel. The embedded scores become the batch
/// features; pair them with [`PrecomputedScorer`].
#[derive(Debug)]
pub struct JsonlSource<R> {
    reader: R,
    line_no: usize,
}

impl<R: BufRead> JsonlSource<R> {
    /// Wrap a buffered reader.
    pub fn new(reader: R) -> Self {
        Self { reader, line_no: 0 }
    }
}

impl<R: BufRead> DocumentSource for JsonlSource<R> {
    type Features = Vec<Vec<f64>>;

    fn next_batch(&mut self) -> Result<Fetch<Self::Features>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(Fetch::Exhausted);
        }
        self.line_no += 1;
        if line.trim().is_empty() {
            return Ok(Fetch::Empty);
        }

        let record: ScoredRecord = serde_json::from_str(&line)
            .map_err(|e| Error::parse(format!("line {}: {}", self.line_no, e)))?;
        if record.scores.len() != record.triads.len() {
            return Err(Error::validation(format!(
                "line {}: {} triads but {} score rows for '{}'",
                self.line_no,
                record.triads.len(),
                record.scores.len(),
                record.doc_id
            )));
        }
        let triads = record
            .triads
            .into_iter()
            .map(|[a, b, c]| Triad::new(a, b, c))
            .collect();
        let mut batch = DocumentBatch::new(record.doc_id, triads, record.scores);
        if let Some(labels) = record.labels {
            batch = batch.with_labels(ScoreMatrix::from_rows(&labels)?);
        }
        Ok(Fetch::Batch(batch))
    }
}

/// Scorer that hands back scores already carried in the batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrecomputedScorer;

impl Scorer<Vec<Vec<f64>>> for PrecomputedScorer {
    fn predict(&self, features: &Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>> {
        Ok(features.clone())
    }
}

// =============================================================================
// Document index
// =============================================================================

/// Token layouts keyed by document id, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct DocumentIndex {
    docs: Vec<Document>,
    by_id: HashMap<String, usize>,
}

impl DocumentIndex {
    /// Empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from bracket key text (the gold `#begin document` file).
    pub fn from_bracket_text(text: &str) -> Result<Self> {
        let mut index = Self::new();
        for doc in parse_documents(text)? {
            index.insert(doc.to_document());
        }
        Ok(index)
    }

    /// Add a document; a repeated id keeps the first layout.
    ///
    /// Returns whether the document was added.
    pub fn insert(&mut self, doc: Document) -> bool {
        if self.by_id.contains_key(&doc.id) {
            log::warn!("document '{}' appears twice in the key, keeping the first", doc.id);
            return false;
        }
        self.by_id.insert(doc.id.clone(), self.docs.len());
        self.docs.push(doc);
        true
    }

    /// Look up a document.
    #[must_use]
    pub fn get(&self, doc_id: &str) -> Option<&Document> {
        self.by_id.get(doc_id).map(|&i| &self.docs[i])
    }

    /// Look up a document, failing with a validation error when absent.
    pub fn require(&self, doc_id: &str) -> Result<&Document> {
        self.get(doc_id)
            .ok_or_else(|| Error::validation(format!("document '{}' is not in the key", doc_id)))
    }

    /// Documents in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.docs.iter()
    }

    /// Number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl FromIterator<Document> for DocumentIndex {
    fn from_iter<I: IntoIterator<Item = Document>>(iter: I) -> Self {
        let mut index = Self::new();
        for doc in iter {
            index.insert(doc);
        }
        index
    }
}
