//! CoNLL-style bracket serialization of coreference clusters.
//!
//! One line per token; the last column holds the cluster markers that
//! open, close, or open-and-close at that token:
//!
//! ```text
//! #begin document (nw/wsj/00/wsj_0001);
//! nw/wsj/00/wsj_0001	Pierre	(3
//! nw/wsj/00/wsj_0001	Vinken	3)
//! nw/wsj/00/wsj_0001	,	-
//! nw/wsj/00/wsj_0001	he	(3)
//!
//! #end document
//! ```
//!
//! Multiple markers in one cell are joined with `|`. The word column is
//! present only when the document carries word text. The layout has to
//! match byte for byte; downstream scorers parse it positionally.

use crate::singleton::SINGLETON_ID;
use crate::types::{Document, Span};
use crate::{Error, Result};
use std::collections::HashMap;

const EMPTY_CELL: &str = "-";
const BEGIN_PREFIX: &str = "#begin document (";
const END_MARKER: &str = "#end document";

/// Render a document's clusters as bracket text.
///
/// Spans labelled [`SINGLETON_ID`] are skipped. Every span, including
/// skipped ones, must lie inside `[0, L)`; out-of-range spans are a
/// validation error rather than being clipped.
pub fn render(doc: &Document, clusters: &[(Span, i64)]) -> Result<String> {
    for (span, _) in clusters {
        doc.check_span(*span)?;
    }

    let mut ordered: Vec<(Span, i64)> = clusters
        .iter()
        .copied()
        .filter(|(_, id)| *id != SINGLETON_ID)
        .collect();
    ordered.sort_by_key(|(span, _)| *span);

    let mut cells = vec![String::new(); doc.token_count];
    for (span, id) in ordered {
        if span.is_single_token() {
            push_marker(&mut cells[span.start()], &format!("({})", id));
        } else {
            push_marker(&mut cells[span.start()], &format!("({}", id));
            push_marker(&mut cells[span.end()], &format!("{})", id));
        }
    }

    let mut out = format!("{}{});\n", BEGIN_PREFIX, doc.id);
    for (i, cell) in cells.iter().enumerate() {
        let cell = if cell.is_empty() { EMPTY_CELL } else { cell };
        out.push_str(&doc.id);
        out.push('\t');
        if let Some(word) = doc.words.as_ref().and_then(|w| w.get(i)) {
            out.push_str(word);
            out.push('\t');
        }
        out.push_str(cell);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(END_MARKER);
    out.push('\n');
    Ok(out)
}

fn push_marker(cell: &mut String, marker: &str) {
    if !cell.is_empty() {
        cell.push('|');
    }
    cell.push_str(marker);
}

// =============================================================================
// Parsing
// =============================================================================

/// One parsed bracket document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketDocument {
    /// Identifier from the `#begin document` header.
    pub doc_id: String,
    /// Word column, when the document has one.
    pub words: Option<Vec<String>>,
    /// Marker cell per token (`-` for none).
    pub cells: Vec<String>,
}

impl BracketDocument {
    /// Token layout of this document.
    #[must_use]
    pub fn to_document(&self) -> Document {
        match &self.words {
            Some(words) => Document::with_words(self.doc_id.clone(), words.clone()),
            None => Document::new(self.doc_id.clone(), self.cells.len()),
        }
    }

    /// Recover `(span, cluster id)` pairs, sorted by span.
    pub fn mentions(&self) -> Result<Vec<(Span, i64)>> {
        let mut open: HashMap<i64, Vec<usize>> = HashMap::new();
        let mut mentions = Vec::new();

        for (i, cell) in self.cells.iter().enumerate() {
            if cell == EMPTY_CELL {
                continue;
            }
            for marker in cell.split('|') {
                let opens = marker.starts_with('(');
                let closes = marker.ends_with(')');
                let inner = marker.strip_prefix('(').unwrap_or(marker);
                let inner = inner.strip_suffix(')').unwrap_or(inner);
                let id: i64 = inner.parse().map_err(|_| {
                    Error::parse(format!(
                        "bad marker '{}' at token {} of '{}'",
                        marker, i, self.doc_id
                    ))
                })?;
                match (opens, closes) {
                    (true, true) => mentions.push((Span::token(i), id)),
                    (true, false) => open.entry(id).or_default().push(i),
                    (false, true) => {
                        let start = open.get_mut(&id).and_then(Vec::pop).ok_or_else(|| {
                            Error::parse(format!(
                                "cluster {} closes at token {} of '{}' without opening",
                                id, i, self.doc_id
                            ))
                        })?;
                        mentions.push((Span::new(start, i)?, id));
                    }
                    (false, false) => {
                        return Err(Error::parse(format!(
                            "marker '{}' at token {} of '{}' neither opens nor closes",
                            marker, i, self.doc_id
                        )))
                    }
                }
            }
        }

        if let Some((id, _)) = open.iter().find(|(_, starts)| !starts.is_empty()) {
            return Err(Error::parse(format!(
                "cluster {} left open in '{}'",
                id, self.doc_id
            )));
        }
        mentions.sort();
        Ok(mentions)
    }
}

/// Parse every document in bracket text.
///
/// Token lines have two columns (`doc_id`, cell) or three (`doc_id`, word,
/// cell); blank lines are ignored.
pub fn parse_documents(text: &str) -> Result<Vec<BracketDocument>> {
    let mut docs = Vec::new();
    let mut current: Option<BracketDocument> = None;

    for (line_no, line) in text.lines().enumerate() {
        let line_no = line_no + 1;
        if line.trim().is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix(BEGIN_PREFIX) {
            if current.is_some() {
                return Err(Error::parse(format!(
                    "line {}: document begins before previous one ended",
                    line_no
                )));
            }
            let close = rest.rfind(')').ok_or_else(|| {
                Error::parse(format!("line {}: malformed document header", line_no))
            })?;
            current = Some(BracketDocument {
                doc_id: rest[..close].to_string(),
                words: None,
                cells: Vec::new(),
            });
            continue;
        }
        if line.starts_with(END_MARKER) {
            let doc = current.take().ok_or_else(|| {
                Error::parse(format!("line {}: end without begin", line_no))
            })?;
            docs.push(doc);
            continue;
        }

        let doc = current.as_mut().ok_or_else(|| {
            Error::parse(format!("line {}: token outside a document", line_no))
        })?;
        let columns: Vec<&str> = line.split('\t').collect();
        let (word, cell) = match columns.as_slice() {
            [_, cell] => (None, *cell),
            [_, word, cell] => (Some(*word), *cell),
            _ => {
                return Err(Error::parse(format!(
                    "line {}: expected 2 or 3 tab-separated columns, got {}",
                    line_no,
                    columns.len()
                )))
            }
        };
        match (word, &mut doc.words) {
            (Some(w), Some(words)) => words.push(w.to_string()),
            (Some(w), None) if doc.cells.is_empty() => doc.words = Some(vec![w.to_string()]),
            (None, None) => {}
            _ => {
                return Err(Error::parse(format!(
                    "line {}: column count changes within '{}'",
                    line_no, doc.doc_id
                )))
            }
        }
        doc.cells.push(cell.to_string());
    }

    if let Some(doc) = current {
        return Err(Error::parse(format!(
            "document '{}' is missing its end marker",
            doc.doc_id
        )));
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(a: usize, b: usize) -> Span {
        Span::new(a, b).unwrap()
    }

    #[test]
    fn test_empty_document() {
        let doc = Document::new("d1", 3);
        let text = render(&doc, &[]).unwrap();
        assert_eq!(
            text,
            "#begin document (d1);\nd1\t-\nd1\t-\nd1\t-\n\n#end document\n"
        );
    }

    #[test]
    fn test_open_close_and_self_closing() {
        let doc = Document::new("d", 4);
        let clusters = [(span(0, 1), 2), (span(3, 3), 2), (span(1, 1), 5)];
        let text = render(&doc, &clusters).unwrap();
        let cells: Vec<&str> = text
            .lines()
            .skip(1)
            .take(4)
            .map(|l| l.split('\t').last().unwrap())
            .collect();
        assert_eq!(cells, vec!["(2", "2)|(5)", "-", "(2)"]);
    }

    #[test]
    fn test_nested_spans_join_with_pipe() {
        let doc = Document::new("d", 3);
        let clusters = [(span(0, 2), 1), (span(0, 0), 4), (span(2, 2), 4)];
        let text = render(&doc, &clusters).unwrap();
        let cells: Vec<&str> = text
            .lines()
            .skip(1)
            .take(3)
            .map(|l| l.split('\t').last().unwrap())
            .collect();
        // (0,0) sorts before (0,2)
        assert_eq!(cells, vec!["(4)|(1", "-", "1)|(4)"]);
    }

    #[test]
    fn test_singletons_skipped() {
        let doc = Document::new("d", 2);
        let text = render(&doc, &[(span(0, 1), SINGLETON_ID)]).unwrap();
        let cells: Vec<&str> = text.lines().filter(|l| l.starts_with("d\t")).collect();
        assert_eq!(cells, vec!["d\t-", "d\t-"]);
    }

    #[test]
    fn test_out_of_range_span_is_validation_error() {
        let doc = Document::new("d", 2);
        let err = render(&doc, &[(span(1, 2), 1)]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        // even when the span would be suppressed
        assert!(render(&doc, &[(span(5, 5), SINGLETON_ID)]).is_err());
    }

    #[test]
    fn test_word_column() {
        let doc = Document::with_words("a/b/c", vec!["John".into(), "left".into()]);
        let text = render(&doc, &[(span(0, 0), 1)]).unwrap();
        assert_eq!(
            text,
            "#begin document (a/b/c);\na/b/c\tJohn\t(1)\na/b/c\tleft\t-\n\n#end document\n"
        );
    }

    #[test]
    fn test_parse_recovers_mentions() {
        let doc = Document::with_words(
            "d",
            ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect(),
        );
        let clusters = vec![(span(0, 1), 2), (span(1, 1), 5), (span(1, 3), 5), (span(3, 3), 2)];
        let text = render(&doc, &clusters).unwrap();
        let parsed = parse_documents(&text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].to_document(), doc);
        assert_eq!(parsed[0].mentions().unwrap(), clusters);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_documents("d\t-\n").is_err());
        assert!(parse_documents("#begin document (d);\nd\t-\n").is_err());
        let unclosed = "#begin document (d);\nd\t(1\n\n#end document\n";
        assert!(parse_documents(unclosed).unwrap()[0].mentions().is_err());
        let stray = "#begin document (d);\nd\t1)\n\n#end document\n";
        assert!(parse_documents(stray).unwrap()[0].mentions().is_err());
    }
}
