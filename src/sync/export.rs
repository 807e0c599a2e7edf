//! JSONL export: database -> canonical log.
//!
//! The log is the authoritative artifact under version control. Records
//! are sorted by id ascending, one JSON object per line, written to a
//! sibling temp file and renamed atomically over the target.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{BeadsError, Result};
use crate::storage::Storage;
use crate::sync::{
    METADATA_JSONL_CONTENT_HASH, METADATA_LAST_EXPORT_TIME, read_issues_from_jsonl,
};

/// Configuration for a JSONL export.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Bypass the data-loss safety guards.
    pub force: bool,
}

/// Result of a JSONL export.
#[derive(Debug, Clone, Default)]
pub struct ExportOutcome {
    /// Number of issues written.
    pub exported_count: usize,
    /// Ids written, ascending.
    pub exported_ids: Vec<String>,
    /// SHA256 of the written log content.
    pub content_hash: String,
}

/// Export the database to the canonical JSONL log.
///
/// 1. Read all issues sorted by id; bulk-load relations (no N+1).
/// 2. Serialize each record as one line into a temp file in the target
///    directory; flush, fsync, rename atomically; chmod 0600 best-effort.
/// 3. Clear the dirty set for exactly the ids written and record export
///    fingerprints and metadata.
///
/// # Errors
///
/// Returns an error if a safety guard trips (without `force`), or any
/// storage or file operation fails.
pub fn export_to_jsonl(
    storage: &mut dyn Storage,
    output_path: &Path,
    options: &ExportOptions,
) -> Result<ExportOutcome> {
    let mut issues = storage.get_all_issues()?;

    // Guard: an empty database must not silently wipe a populated log.
    if issues.is_empty() && !options.force && output_path.exists() {
        let existing = read_issues_from_jsonl(output_path)?;
        if !existing.is_empty() {
            return Err(BeadsError::Config(format!(
                "Refusing to export empty database over {} issue(s) in {}. \
                 Import first, or pass force.",
                existing.len(),
                output_path.display()
            )));
        }
    }

    // Guard: a stale database must not drop ids that only exist in the log.
    if !issues.is_empty() && !options.force && output_path.exists() {
        let log_ids: HashSet<String> = read_issues_from_jsonl(output_path)?
            .into_iter()
            .map(|i| i.id)
            .collect();
        let db_ids: HashSet<&str> = issues.iter().map(|i| i.id.as_str()).collect();
        let mut missing: Vec<&String> =
            log_ids.iter().filter(|id| !db_ids.contains(id.as_str())).collect();
        if !missing.is_empty() {
            missing.sort();
            let preview: Vec<&str> = missing.iter().take(5).map(|s| s.as_str()).collect();
            return Err(BeadsError::Config(format!(
                "Refusing to export stale database: would lose {} issue(s) from the log ({}{}). \
                 Import first, or pass force.",
                missing.len(),
                preview.join(", "),
                if missing.len() > 5 { ", ..." } else { "" }
            )));
        }
    }

    let all_deps = storage.get_all_dependency_records()?;
    let all_labels = storage.get_all_labels()?;
    let all_comments = storage.get_all_comments()?;

    for issue in &mut issues {
        issue.dependencies = all_deps.get(&issue.id).cloned().unwrap_or_default();
        issue.labels = all_labels.get(&issue.id).cloned().unwrap_or_default();
        issue.comments = all_comments.get(&issue.id).cloned().unwrap_or_default();
    }

    let parent_dir = output_path.parent().ok_or_else(|| {
        BeadsError::Config(format!("Invalid output path: {}", output_path.display()))
    })?;
    fs::create_dir_all(parent_dir)?;

    let temp_path = output_path.with_extension("jsonl.tmp");
    let temp_file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(temp_file);

    let mut hasher = Sha256::new();
    let mut exported_ids = Vec::with_capacity(issues.len());
    let mut issue_hashes = Vec::with_capacity(issues.len());

    for issue in &issues {
        let json = serde_json::to_string(issue)?;
        writeln!(writer, "{json}")?;
        hasher.update(json.as_bytes());
        hasher.update(b"\n");
        exported_ids.push(issue.id.clone());
        issue_hashes.push((
            issue.id.clone(),
            issue
                .content_hash
                .clone()
                .unwrap_or_else(|| issue.compute_content_hash()),
        ));
    }

    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| BeadsError::Io(e.into_error()))?
        .sync_all()?;

    fs::rename(&temp_path, output_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(output_path, fs::Permissions::from_mode(0o600));
    }

    let content_hash = format!("{:x}", hasher.finalize());

    storage.clear_dirty_ids(&exported_ids)?;
    storage.set_export_hashes(&issue_hashes)?;
    storage.set_metadata(METADATA_JSONL_CONTENT_HASH, &content_hash)?;
    storage.set_metadata(METADATA_LAST_EXPORT_TIME, &Utc::now().to_rfc3339())?;

    tracing::debug!(
        exported = exported_ids.len(),
        path = %output_path.display(),
        hash = %content_hash,
        "export complete"
    );

    Ok(ExportOutcome {
        exported_count: exported_ids.len(),
        exported_ids,
        content_hash,
    })
}

/// Result of an auto-flush pass.
#[derive(Debug, Clone, Default)]
pub struct AutoFlushOutcome {
    /// False when there was nothing dirty to write.
    pub flushed: bool,
    pub exported_count: usize,
    pub content_hash: String,
}

/// Flush dirty issues to the log, if any.
///
/// Runs after mutations, which only execute behind the staleness hook, so
/// the database is always at least as new as the log here. The export
/// therefore forces past the data-loss guards: ids missing from the
/// database are deliberate deletions (or remaps) that the log must drop.
///
/// # Errors
///
/// Returns an error if the dirty read or the export fails.
pub fn auto_flush(storage: &mut dyn Storage, jsonl_path: &Path) -> Result<AutoFlushOutcome> {
    let dirty = storage.get_dirty_ids()?;
    if dirty.is_empty() {
        tracing::debug!("auto-flush: nothing dirty");
        return Ok(AutoFlushOutcome::default());
    }

    tracing::debug!(dirty = dirty.len(), "auto-flush: exporting");
    let outcome = export_to_jsonl(storage, jsonl_path, &ExportOptions { force: true })?;
    Ok(AutoFlushOutcome {
        flushed: true,
        exported_count: outcome.exported_count,
        content_hash: outcome.content_hash,
    })
}
