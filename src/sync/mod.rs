//! JSONL import/export for `beads`.
//!
//! - Export: database -> JSONL (the artifact under version control)
//! - Import: JSONL -> database, reconciled through collision detection
//! - Auto-import: staleness detection driving a reconciled re-import
//! - Dirty tracking for incremental exports

pub mod auto;
pub mod collision;
pub mod export;
pub mod import;
pub mod rewrite;

pub use auto::{AutoImportGuard, AutoImportOutcome, maybe_auto_import};
pub use collision::{ClassifiedBatch, ExistingIndex, RenamePair, classify};
pub use export::{ExportOptions, ExportOutcome, export_to_jsonl};
pub use import::{ImportOptions, ImportReport, import_from_jsonl, import_issues};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{BeadsError, Result};
use crate::model::Issue;

/// Metadata key for the JSONL content hash last seen by sync.
pub const METADATA_JSONL_CONTENT_HASH: &str = "jsonl_content_hash";
/// Metadata key for the last export time.
pub const METADATA_LAST_EXPORT_TIME: &str = "last_export_time";
/// Metadata key for the last import time.
pub const METADATA_LAST_IMPORT_TIME: &str = "last_import_time";

/// A merge conflict marker found in the log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictMarker {
    pub line: usize,
    pub marker: String,
}

/// Scan a file for git merge conflict markers.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn scan_conflict_markers(path: &Path) -> Result<Vec<ConflictMarker>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut markers = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        for prefix in ["<<<<<<<", "=======", ">>>>>>>"] {
            if line.starts_with(prefix) {
                markers.push(ConflictMarker {
                    line: idx + 1,
                    marker: prefix.to_string(),
                });
                break;
            }
        }
    }
    Ok(markers)
}

/// Fail when the log still contains unresolved merge conflicts.
///
/// # Errors
///
/// Returns a `Config` error listing the first markers found.
pub fn ensure_no_conflict_markers(path: &Path) -> Result<()> {
    let markers = scan_conflict_markers(path)?;
    if markers.is_empty() {
        return Ok(());
    }
    let preview: Vec<String> = markers
        .iter()
        .take(3)
        .map(|m| format!("line {}: {}", m.line, m.marker))
        .collect();
    Err(BeadsError::Config(format!(
        "Merge conflict markers in {}: {}{}",
        path.display(),
        preview.join("; "),
        if markers.len() > 3 { " ..." } else { "" }
    )))
}

/// Read all issues from a JSONL file. Blank lines are skipped.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line fails to parse.
pub fn read_issues_from_jsonl(path: &Path) -> Result<Vec<Issue>> {
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(2 * 1024 * 1024, file);
    let mut issues = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let issue: Issue = serde_json::from_str(&line).map_err(|e| BeadsError::JsonlParse {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        issues.push(issue);
    }
    Ok(issues)
}

/// SHA256 over the log file's lines; the staleness fingerprint.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn compute_jsonl_hash(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    for line in reader.lines() {
        let line = line?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Count prefix mismatches per offending prefix.
#[must_use]
pub fn prefix_mismatch_counts(issues: &[Issue], expected: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for issue in issues {
        let prefix = crate::util::extract_prefix(&issue.id).unwrap_or("");
        if prefix != expected {
            *counts.entry(prefix.to_string()).or_insert(0) += 1;
        }
    }
    counts
}
