//! Core data model: spans, pair keys, triads, score matrices, documents.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Span
// =============================================================================

/// Inclusive token interval `[start, end]` identifying a mention.
///
/// # Invariants
///
/// - `start <= end`, enforced by every constructor (including deserialization)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "(usize, usize)", into = "(usize, usize)")]
pub struct Span {
    start: usize,
    end: usize,
}

impl Span {
    /// Create a span, rejecting `start > end`.
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start > end {
            return Err(Error::validation(format!(
                "span start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Single-token span.
    #[must_use]
    pub fn token(index: usize) -> Self {
        Self {
            start: index,
            end: index,
        }
    }

    /// First token (inclusive).
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Last token (inclusive).
    #[must_use]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Whether the span covers exactly one token.
    #[must_use]
    pub fn is_single_token(&self) -> bool {
        self.start == self.end
    }
}

impl TryFrom<(usize, usize)> for Span {
    type Error = Error;

    fn try_from((start, end): (usize, usize)) -> Result<Self> {
        Span::new(start, end)
    }
}

impl From<Span> for (usize, usize) {
    fn from(span: Span) -> Self {
        (span.start, span.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// =============================================================================
// PairKey / Triad
// =============================================================================

/// A candidate coreference link between two spans.
///
/// Keys are directed: `(a, b)` and `(b, a)` are aggregated separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    /// First span of the link.
    pub first: Span,
    /// Second span of the link.
    pub second: Span,
}

impl PairKey {
    /// Create a pair key.
    #[must_use]
    pub fn new(first: Span, second: Span) -> Self {
        Self { first, second }
    }

    /// Both spans, first then second.
    #[must_use]
    pub fn spans(&self) -> [Span; 2] {
        [self.first, self.second]
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ {}", self.first, self.second)
    }
}

/// Three spans scored jointly by the external model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triad {
    /// First span.
    pub a: Span,
    /// Second span.
    pub b: Span,
    /// Third span, shared by both scored pairs.
    pub c: Span,
}

impl Triad {
    /// Create a triad.
    #[must_use]
    pub fn new(a: Span, b: Span, c: Span) -> Self {
        Self { a, b, c }
    }

    /// Pairs scored by one row, in column order: `(b, c)` then `(a, c)`.
    #[must_use]
    pub fn scored_pairs(&self) -> [PairKey; 2] {
        [PairKey::new(self.b, self.c), PairKey::new(self.a, self.c)]
    }

    /// All three spans.
    #[must_use]
    pub fn spans(&self) -> [Span; 3] {
        [self.a, self.b, self.c]
    }
}

// =============================================================================
// Score matrices
// =============================================================================

/// Column layout of a score (or label) matrix, decided once at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreShape {
    /// Two columns, one per scored pair.
    Pairwise,
    /// Three columns; the leading column is not a pair score and is dropped.
    Triadic,
}

impl ScoreShape {
    /// Decide the shape from a row width.
    pub fn from_width(width: usize) -> Result<Self> {
        match width {
            2 => Ok(ScoreShape::Pairwise),
            3 => Ok(ScoreShape::Triadic),
            other => Err(Error::validation(format!(
                "score rows must have 2 or 3 columns, got {}",
                other
            ))),
        }
    }

    /// Row width this shape was ingested from.
    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            ScoreShape::Pairwise => 2,
            ScoreShape::Triadic => 3,
        }
    }
}

/// Per-triad pair scores, normalized to two columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreMatrix {
    shape: ScoreShape,
    rows: Vec<[f64; 2]>,
}

impl ScoreMatrix {
    /// Build from raw rows of width 2 or 3.
    ///
    /// The shape is taken from the first row and every row must match it.
    /// Triadic rows drop their leading column. Values must lie in `[0, 1]`.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let shape = match rows.first() {
            Some(row) => ScoreShape::from_width(row.len())?,
            None => ScoreShape::Pairwise,
        };
        let skip = shape.width() - 2;

        let mut normalized = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if row.len() != shape.width() {
                return Err(Error::validation(format!(
                    "row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    shape.width()
                )));
            }
            let pair = [row[skip], row[skip + 1]];
            for value in pair {
                if !(0.0..=1.0).contains(&value) {
                    return Err(Error::validation(format!(
                        "row {} holds score {} outside [0, 1]",
                        i, value
                    )));
                }
            }
            normalized.push(pair);
        }

        Ok(Self {
            shape,
            rows: normalized,
        })
    }

    /// Shape the matrix was ingested with.
    #[must_use]
    pub fn shape(&self) -> ScoreShape {
        self.shape
    }

    /// Row `i` as `(score for (b, c), score for (a, c))`.
    #[must_use]
    pub fn row(&self, i: usize) -> Option<[f64; 2]> {
        self.rows.get(i).copied()
    }

    /// All normalized rows.
    #[must_use]
    pub fn rows(&self) -> &[[f64; 2]] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the matrix has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// =============================================================================
// Document
// =============================================================================

/// A document's token layout, as needed by the bracket serializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier (may contain path separators).
    pub id: String,
    /// Number of tokens `L`.
    pub token_count: usize,
    /// Optional word text, one per token.
    pub words: Option<Vec<String>>,
}

impl Document {
    /// Document without word text.
    #[must_use]
    pub fn new(id: impl Into<String>, token_count: usize) -> Self {
        Self {
            id: id.into(),
            token_count,
            words: None,
        }
    }

    /// Document with word text; `token_count` is the number of words.
    #[must_use]
    pub fn with_words(id: impl Into<String>, words: Vec<String>) -> Self {
        Self {
            id: id.into(),
            token_count: words.len(),
            words: Some(words),
        }
    }

    /// Check that a span lies inside `[0, L)`.
    pub fn check_span(&self, span: Span) -> Result<()> {
        if span.end() >= self.token_count {
            return Err(Error::validation(format!(
                "span {} outside [0, {}) in document '{}'",
                span, self.token_count, self.id
            )));
        }
        Ok(())
    }
}
