//! Auto-import: staleness detection plus a single-flight reconciled
//! re-import.
//!
//! After a VCS pull the log may be newer than the database. Before serving
//! a request the daemon runs this hook: a cheap staleness check, a
//! compare-and-swap guard so only one request drives the import, and a
//! reconciliation pass that never remaps collisions (same-id-different-
//! content must resolve as an update, or pulls would ping-pong duplicates
//! between peers forever).

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::storage::Storage;
use crate::sync::import::{ImportOptions, ImportReport, import_from_jsonl};
use crate::sync::{METADATA_JSONL_CONTENT_HASH, METADATA_LAST_IMPORT_TIME, compute_jsonl_hash};

/// Process-wide single-flight guard for auto-import.
#[derive(Debug, Default)]
pub struct AutoImportGuard {
    running: AtomicBool,
}

impl AutoImportGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a permit when no other auto-import is in flight.
    pub fn try_acquire(&self) -> Option<AutoImportPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| AutoImportPermit { guard: self })
    }
}

/// RAII permit; releases the guard on drop.
pub struct AutoImportPermit<'a> {
    guard: &'a AutoImportGuard,
}

impl Drop for AutoImportPermit<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

/// What the auto-import hook did for this request.
#[derive(Debug)]
pub enum AutoImportOutcome {
    /// The log matches the database; nothing to do.
    Fresh,
    /// Another request is already importing.
    Skipped,
    /// A reconciled import ran. `needs_export` is set when ids were
    /// remapped and the log should be rewritten.
    Imported {
        report: ImportReport,
        needs_export: bool,
    },
    /// The import failed; the triggering request proceeds regardless.
    Failed,
}

/// Cheap staleness check: mtime fast path, then content-hash comparison.
///
/// A missing fingerprint counts as stale so the first request after
/// workspace creation imports the log.
///
/// # Errors
///
/// Returns an error if metadata reads or file hashing fail.
pub fn check_stale(storage: &dyn Storage, jsonl_path: &Path) -> Result<bool> {
    if !jsonl_path.exists() {
        return Ok(false);
    }

    let last_hash = storage.get_metadata(METADATA_JSONL_CONTENT_HASH)?;
    let Some(last_hash) = last_hash else {
        return Ok(true);
    };

    // Fast path: a log untouched since the last import cannot have new
    // content (any writer updates mtime).
    if let (Ok(meta), Some(last_import)) = (
        std::fs::metadata(jsonl_path),
        storage.get_metadata(METADATA_LAST_IMPORT_TIME)?,
    ) {
        if let (Ok(mtime), Ok(imported_at)) = (
            meta.modified(),
            DateTime::parse_from_rfc3339(&last_import),
        ) {
            let mtime: DateTime<Utc> = mtime.into();
            if mtime <= imported_at.with_timezone(&Utc) {
                return Ok(false);
            }
        }
    }

    Ok(compute_jsonl_hash(jsonl_path)? != last_hash)
}

/// The options auto-import always runs with. Collision remapping stays
/// off; prefix mismatches are repaired by rewriting.
#[must_use]
pub fn auto_import_options() -> ImportOptions {
    ImportOptions {
        resolve_collisions: false,
        rename_on_import: true,
        skip_prefix_validation: false,
        ..Default::default()
    }
}

/// Run the staleness hook. Errors are absorbed: the triggering request
/// must not fail because reconciliation did.
pub fn maybe_auto_import(
    storage: &mut dyn Storage,
    jsonl_path: &Path,
    guard: &AutoImportGuard,
) -> AutoImportOutcome {
    match check_stale(storage, jsonl_path) {
        Ok(false) => return AutoImportOutcome::Fresh,
        Ok(true) => {}
        Err(e) => {
            tracing::warn!(error = %e, "auto-import staleness check failed");
            return AutoImportOutcome::Failed;
        }
    }

    let Some(_permit) = guard.try_acquire() else {
        return AutoImportOutcome::Skipped;
    };

    // Double-check under the guard; another request may have finished the
    // import while we raced for the permit.
    match check_stale(storage, jsonl_path) {
        Ok(true) => {}
        Ok(false) => return AutoImportOutcome::Fresh,
        Err(e) => {
            tracing::warn!(error = %e, "auto-import staleness re-check failed");
            return AutoImportOutcome::Failed;
        }
    }

    match import_from_jsonl(storage, jsonl_path, &auto_import_options()) {
        Ok(report) => {
            let needs_export = !report.id_mapping.is_empty();
            tracing::info!(
                created = report.created,
                updated = report.updated,
                unchanged = report.unchanged,
                renamed = report.renamed,
                needs_export,
                "auto-import complete"
            );
            AutoImportOutcome::Imported {
                report,
                needs_export,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "auto-import failed");
            AutoImportOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Issue;
    use crate::storage::MemoryStorage;
    use crate::sync::export::{ExportOptions, export_to_jsonl};
    use tempfile::TempDir;

    fn prepared() -> MemoryStorage {
        let mut storage = MemoryStorage::new();
        storage
            .set_config(crate::config::CONFIG_ISSUE_PREFIX, "bd")
            .unwrap();
        storage
    }

    #[test]
    fn missing_log_is_fresh() {
        let storage = prepared();
        let dir = TempDir::new().unwrap();
        assert!(!check_stale(&storage, &dir.path().join("issues.jsonl")).unwrap());
    }

    #[test]
    fn unseen_log_is_stale() {
        let storage = prepared();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("issues.jsonl");
        std::fs::write(&path, "").unwrap();
        assert!(check_stale(&storage, &path).unwrap());
    }

    #[test]
    fn export_marks_log_fresh() {
        let mut storage = prepared();
        storage
            .create_issue(&Issue::new("bd-1", "A"), "tester")
            .unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("issues.jsonl");
        export_to_jsonl(&mut storage, &path, &ExportOptions::default()).unwrap();
        assert!(!check_stale(&storage, &path).unwrap());
    }

    #[test]
    fn guard_is_single_flight() {
        let guard = AutoImportGuard::new();
        let permit = guard.try_acquire();
        assert!(permit.is_some());
        assert!(guard.try_acquire().is_none());
        drop(permit);
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn stale_log_triggers_import() {
        let mut source = prepared();
        source
            .create_issue(&Issue::new("bd-1", "From peer"), "tester")
            .unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("issues.jsonl");
        export_to_jsonl(&mut source, &path, &ExportOptions::default()).unwrap();

        let mut local = prepared();
        let guard = AutoImportGuard::new();
        let outcome = maybe_auto_import(&mut local, &path, &guard);
        match outcome {
            AutoImportOutcome::Imported {
                report,
                needs_export,
            } => {
                assert_eq!(report.created, 1);
                assert!(!needs_export);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(local.get_issue("bd-1").unwrap().is_some());

        // Second request sees a fresh log.
        let outcome = maybe_auto_import(&mut local, &path, &guard);
        assert!(matches!(outcome, AutoImportOutcome::Fresh));
    }

    #[test]
    fn import_failure_is_absorbed() {
        let mut local = prepared();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("issues.jsonl");
        std::fs::write(&path, "not json\n").unwrap();

        let guard = AutoImportGuard::new();
        let outcome = maybe_auto_import(&mut local, &path, &guard);
        assert!(matches!(outcome, AutoImportOutcome::Failed));
    }
}
