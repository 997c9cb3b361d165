//! On-disk cache of raw scores, linkage trees, and rendered responses.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── raw_scores/<doc>.json      pair -> raw observations, arrival order
//! ├── linkages/<doc>.json        linkage tree, (left, right, distance, size)
//! ├── linkages/<doc>-locs.json   span order aligned with the tree's leaves
//! └── responses/<doc>            bracket document
//! ```
//!
//! `<doc>` is the basename of the document id. Every file is written to a
//! temporary file in the target directory and renamed into place, so a
//! reader never sees a partial artifact.
//!
//! # Modes
//!
//! | Mode | Reads | Recomputes |
//! |------|-------|------------|
//! | [`CacheMode::ComputeAndCache`] | nothing | scores, aggregation, tree, cut |
//! | [`CacheMode::CutOnly`] | tree + span order | cut |
//! | [`CacheMode::ReclusterFromRaw`] | raw scores | aggregation, tree, cut |
//!
//! Raw scores are written once. A compute pass also writes trees and
//! responses once; the offline modes replace the response (and recluster
//! the tree), so the two never describe different partitions.

use crate::aggregate::ObservationLog;
use crate::cluster::LinkageTree;
use crate::types::Span;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Directory holding raw per-pair observations.
pub const RAW_SCORES_DIR: &str = "raw_scores";
/// Directory holding linkage trees and span orders.
pub const LINKAGES_DIR: &str = "linkages";
/// Default directory for rendered bracket documents.
pub const RESPONSES_DIR: &str = "responses";

/// Which part of the pipeline a run recomputes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Score, aggregate, build the tree, persist raw scores and tree.
    #[default]
    ComputeAndCache,
    /// Load a cached tree and span order; only cut again.
    CutOnly,
    /// Load cached raw scores; aggregate and build the tree again.
    ReclusterFromRaw,
}

/// What a write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The artifact was written.
    Written,
    /// The artifact already existed and was left untouched.
    AlreadyPresent,
}

/// Whether an existing artifact may be replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Write once; skip if present.
    Once,
    /// Atomically replace any existing artifact.
    Replace,
}

/// Reduce a document id to a file name: its last path component.
///
/// ```rust
/// use coreflink::cache::sanitize_doc_id;
///
/// assert_eq!(sanitize_doc_id("nw/wsj/00/wsj_0001").unwrap(), "wsj_0001");
/// assert!(sanitize_doc_id("nw/wsj/").is_err());
/// ```
pub fn sanitize_doc_id(doc_id: &str) -> Result<String> {
    let base = doc_id.rsplit(['/', '\\']).next().unwrap_or(doc_id);
    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return Err(Error::validation(format!(
            "document id '{}' has no usable file name",
            doc_id
        )));
    }
    Ok(base.to_string())
}

/// Per-document artifact store rooted at one directory.
#[derive(Debug, Clone)]
pub struct ResultCache {
    root: PathBuf,
    responses: PathBuf,
}

impl ResultCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [RAW_SCORES_DIR, LINKAGES_DIR, RESPONSES_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }
        let responses = root.join(RESPONSES_DIR);
        Ok(Self { root, responses })
    }

    /// Write responses somewhere else, e.g. one directory per threshold in
    /// a sweep.
    pub fn with_response_dir(mut self, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        self.responses = dir;
        Ok(self)
    }

    /// Cache root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory receiving bracket documents.
    #[must_use]
    pub fn responses_dir(&self) -> &Path {
        &self.responses
    }

    /// Path of the raw-score artifact for `doc_id`.
    pub fn raw_scores_path(&self, doc_id: &str) -> Result<PathBuf> {
        let name = sanitize_doc_id(doc_id)?;
        Ok(self.root.join(RAW_SCORES_DIR).join(format!("{}.json", name)))
    }

    /// Path of the linkage artifact for `doc_id`.
    pub fn linkage_path(&self, doc_id: &str) -> Result<PathBuf> {
        let name = sanitize_doc_id(doc_id)?;
        Ok(self.root.join(LINKAGES_DIR).join(format!("{}.json", name)))
    }

    /// Path of the span-order artifact for `doc_id`.
    pub fn span_order_path(&self, doc_id: &str) -> Result<PathBuf> {
        let name = sanitize_doc_id(doc_id)?;
        Ok(self.root.join(LINKAGES_DIR).join(format!("{}-locs.json", name)))
    }

    /// Path of the rendered response for `doc_id`.
    pub fn response_path(&self, doc_id: &str) -> Result<PathBuf> {
        Ok(self.responses.join(sanitize_doc_id(doc_id)?))
    }

    /// Persist raw observations (write-once).
    pub fn store_raw(&self, doc_id: &str, log: &ObservationLog) -> Result<WriteOutcome> {
        let bytes = serde_json::to_vec(log)?;
        write_atomic(&self.raw_scores_path(doc_id)?, &bytes, WritePolicy::Once)
    }

    /// Load raw observations; a missing artifact is [`Error::NotFound`].
    pub fn load_raw(&self, doc_id: &str) -> Result<ObservationLog> {
        read_json(&self.raw_scores_path(doc_id)?, doc_id, "raw scores")
    }

    /// Persist a tree and the span order of its leaves.
    ///
    /// The span order is written first so a present tree always has one.
    pub fn store_linkage(
        &self,
        doc_id: &str,
        linkage: &LinkageTree,
        spans: &[Span],
        policy: WritePolicy,
    ) -> Result<WriteOutcome> {
        if linkage.leaf_count() != spans.len() {
            return Err(Error::invariant(format!(
                "linkage for '{}' has {} leaves but {} spans",
                doc_id,
                linkage.leaf_count(),
                spans.len()
            )));
        }
        let order = serde_json::to_vec(spans)?;
        write_atomic(&self.span_order_path(doc_id)?, &order, policy)?;
        let tree = serde_json::to_vec(linkage)?;
        write_atomic(&self.linkage_path(doc_id)?, &tree, policy)
    }

    /// Load a tree and its span order.
    pub fn load_linkage(&self, doc_id: &str) -> Result<(LinkageTree, Vec<Span>)> {
        let linkage: LinkageTree = read_json(&self.linkage_path(doc_id)?, doc_id, "linkage")?;
        let spans: Vec<Span> = read_json(&self.span_order_path(doc_id)?, doc_id, "span order")?;
        if linkage.leaf_count() != spans.len() {
            return Err(Error::validation(format!(
                "cached linkage for '{}' has {} leaves but {} spans",
                doc_id,
                linkage.leaf_count(),
                spans.len()
            )));
        }
        Ok((linkage, spans))
    }

    /// Whether a response for `doc_id` already exists.
    pub fn has_response(&self, doc_id: &str) -> Result<bool> {
        Ok(self.response_path(doc_id)?.exists())
    }

    /// Write a bracket document.
    ///
    /// Compute passes write once; offline passes replace, so the response
    /// always matches the tree they leave behind.
    pub fn write_response(
        &self,
        doc_id: &str,
        text: &str,
        policy: WritePolicy,
    ) -> Result<WriteOutcome> {
        write_atomic(&self.response_path(doc_id)?, text.as_bytes(), policy)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path, doc_id: &str, artifact: &'static str) -> Result<T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(Error::not_found(doc_id, artifact))
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&content)?)
}

fn write_atomic(path: &Path, bytes: &[u8], policy: WritePolicy) -> Result<WriteOutcome> {
    if policy == WritePolicy::Once && path.exists() {
        log::debug!("{} already present, not rewriting", path.display());
        return Ok(WriteOutcome::AlreadyPresent);
    }
    let dir = path
        .parent()
        .ok_or_else(|| Error::invariant(format!("{} has no parent", path.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    match policy {
        WritePolicy::Replace => {
            tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        }
        WritePolicy::Once => match tmp.persist_noclobber(path) {
            Ok(_) => {}
            // another writer got there between the check and the rename
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                return Ok(WriteOutcome::AlreadyPresent)
            }
            Err(e) => return Err(Error::Io(e.error)),
        },
    }
    Ok(WriteOutcome::Written)
}
