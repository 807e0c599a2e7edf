//! Import reconciliation: JSONL batch -> database.
//!
//! Drives a batch of incoming records through normalization, prefix
//! validation, external-ref deduplication, collision classification, and
//! mutation, under newer-timestamp-wins precedence. Equal timestamps mean
//! the local record wins; that rule is the convergence guarantee across
//! branches.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::issue_prefix;
use crate::error::{BeadsError, Result};
use crate::model::{Issue, Status};
use crate::storage::Storage;
use crate::sync::collision::{ClassifiedBatch, ExistingIndex, classify};
use crate::sync::rewrite::{rewrite_optional_field, rewrite_references};
use crate::sync::{
    METADATA_JSONL_CONTENT_HASH, METADATA_LAST_IMPORT_TIME, compute_jsonl_hash,
    ensure_no_conflict_markers, prefix_mismatch_counts, read_issues_from_jsonl,
};
use crate::util::id::IdGenerator;
use crate::validation::validate_issue;

/// Options controlling one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ImportOptions {
    /// Classify and report without mutating.
    #[serde(default)]
    pub dry_run: bool,
    /// Rewrite incoming ids (and text references) to the workspace prefix
    /// on mismatch instead of failing.
    #[serde(default)]
    pub rename_on_import: bool,
    /// Tolerate prefix mismatches without rewriting.
    #[serde(default)]
    pub skip_prefix_validation: bool,
    /// Remap same-id-different-content records to fresh ids instead of
    /// resolving them as updates.
    #[serde(default)]
    pub resolve_collisions: bool,
    /// Keep the first occurrence of a duplicated external_ref and clear
    /// the field on the rest instead of failing.
    #[serde(default)]
    pub clear_duplicate_external_refs: bool,
    /// Upgrade per-item label/dependency/comment failures to batch
    /// failures.
    #[serde(default)]
    pub strict: bool,
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub renamed: usize,
    /// Records classified as same-id-different-content.
    pub collisions: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collision_ids: Vec<String>,
    /// Incoming id -> id it ended up under, for every remap performed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub id_mapping: BTreeMap<String, String>,
    /// Offending prefix -> record count, when mismatches were tolerated.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prefix_mismatches: BTreeMap<String, usize>,
    pub expected_prefix: String,
    #[serde(default)]
    pub dry_run: bool,
}

/// Import a JSONL log file through the reconciler and record sync
/// metadata.
///
/// # Errors
///
/// Returns an error on conflict markers, parse failures, or any
/// reconciliation failure.
pub fn import_from_jsonl(
    storage: &mut dyn Storage,
    input_path: &Path,
    options: &ImportOptions,
) -> Result<ImportReport> {
    ensure_no_conflict_markers(input_path)?;
    let incoming = read_issues_from_jsonl(input_path)?;
    let report = import_issues(storage, incoming, options)?;

    if !options.dry_run {
        storage.set_metadata(METADATA_LAST_IMPORT_TIME, &Utc::now().to_rfc3339())?;
        let hash = compute_jsonl_hash(input_path)?;
        storage.set_metadata(METADATA_JSONL_CONTENT_HASH, &hash)?;
    }
    Ok(report)
}

/// Reconcile a batch of incoming records against the database.
///
/// # Errors
///
/// Returns an error when validation, prefix policy, external-ref policy,
/// or a storage operation fails. Issue upsert failures are fatal to the
/// batch; associated-data failures are skipped unless `strict`.
#[allow(clippy::too_many_lines)]
pub fn import_issues(
    storage: &mut dyn Storage,
    mut incoming: Vec<Issue>,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let expected_prefix = issue_prefix(storage)?;
    let mut report = ImportReport {
        expected_prefix: expected_prefix.clone(),
        dry_run: options.dry_run,
        ..Default::default()
    };

    // Stage 1: normalize. Incoming hashes are advisory; recompute from the
    // fields actually present, and repair the closed_at invariant.
    for issue in &mut incoming {
        normalize_issue(issue);
        validate_issue(issue)?;
    }

    // Stage 2: stale export fingerprints are meaningless after an import.
    if !options.dry_run {
        storage.clear_export_hashes()?;
    }

    // Stage 3: prefix validation.
    let mismatches = prefix_mismatch_counts(&incoming, &expected_prefix);
    if !mismatches.is_empty() {
        if options.rename_on_import {
            let renames = assign_prefixed_ids(storage, &incoming, &expected_prefix)?;
            apply_batch_renames(&mut incoming, &renames);
            for (old_id, new_id) in renames {
                report.id_mapping.insert(old_id, new_id);
            }
        } else if options.skip_prefix_validation || options.dry_run {
            report.prefix_mismatches = mismatches;
        } else {
            return Err(BeadsError::PrefixMismatch {
                expected: expected_prefix,
                counts: mismatches,
            });
        }
    }

    // Stage 4: duplicated external refs within the batch.
    let mut seen_refs: HashSet<String> = HashSet::new();
    for issue in &mut incoming {
        let Some(ext) = issue.external_ref.clone() else {
            continue;
        };
        if seen_refs.insert(ext.clone()) {
            continue;
        }
        if options.clear_duplicate_external_refs {
            issue.external_ref = None;
            issue.content_hash = Some(issue.compute_content_hash());
            report.skipped += 1;
        } else {
            return Err(BeadsError::DuplicateExternalRef { external_ref: ext });
        }
    }

    // Stage 5: classification.
    let index = ExistingIndex::build(storage)?;
    let classified = classify(&index, &incoming);
    report.collisions = classified.collisions.len();
    report.collision_ids.clone_from(&classified.collisions);

    // Stage 6: dry-run short circuit.
    if options.dry_run {
        report.created = classified.new_issues.len();
        report.unchanged = classified.exact_matches.len();
        report.renamed = classified.renames.len();
        return Ok(report);
    }

    let by_id: HashMap<String, Issue> =
        incoming.iter().map(|i| (i.id.clone(), i.clone())).collect();
    let ClassifiedBatch {
        exact_matches,
        collisions,
        renames,
        new_issues,
    } = classified;

    // incoming id -> id its data ended up under
    let mut resolved: HashMap<String, String> = HashMap::new();
    for id in &exact_matches {
        resolved.insert(id.clone(), id.clone());
        report.unchanged += 1;
    }

    // Stage 7: collision policy. With hash-derived ids the safe default is
    // to resolve same-id-different-content as an update below; remapping to
    // a fresh id only happens on explicit request.
    let mut pool: Vec<Issue> = Vec::new();
    let mut creations: Vec<Issue> = Vec::new();

    if options.resolve_collisions {
        let generator = IdGenerator::new(expected_prefix.clone());
        let mut taken: HashSet<String> = incoming.iter().map(|i| i.id.clone()).collect();
        for old_id in &collisions {
            let Some(mut issue) = by_id.get(old_id).cloned() else {
                continue;
            };
            let new_id = generator.generate(&issue.title, issue.created_at, taken.len(), |id| {
                taken.contains(id) || storage.id_exists(id).unwrap_or(true)
            });
            taken.insert(new_id.clone());
            report.id_mapping.insert(old_id.clone(), new_id.clone());
            resolved.insert(old_id.clone(), new_id.clone());
            issue.id = new_id;
            creations.push(issue);
        }
    } else {
        for id in &collisions {
            if let Some(issue) = by_id.get(id) {
                pool.push(issue.clone());
            }
        }
    }

    // Stage 8: rename application. Content-matched records replace their
    // old ids; stored text references are rewritten with the same boundary
    // rules used for incoming records.
    let mut db_renames: HashMap<String, String> = HashMap::new();
    for pair in &renames {
        let Some(record) = by_id.get(&pair.new_id) else {
            continue;
        };
        // Tolerate an already-applied rename.
        if !storage.id_exists(&pair.old_id)? {
            if storage.id_exists(&pair.new_id)? {
                report.unchanged += 1;
                resolved.insert(pair.new_id.clone(), pair.new_id.clone());
                continue;
            }
        } else {
            storage.delete_issue(&pair.old_id)?;
        }
        storage.upsert_issue_for_import(record)?;
        storage.rename_dependency_references(&pair.old_id, &pair.new_id)?;
        db_renames.insert(pair.old_id.clone(), pair.new_id.clone());
        resolved.insert(pair.new_id.clone(), pair.new_id.clone());
        report.id_mapping
            .insert(pair.old_id.clone(), pair.new_id.clone());
        report.renamed += 1;
    }
    if !db_renames.is_empty() {
        rewrite_stored_references(storage, &db_renames)?;
    }

    for id in &new_issues {
        if let Some(issue) = by_id.get(id) {
            pool.push(issue.clone());
        }
    }

    // Stage 9: external-ref matching first. A matching ref updates the
    // existing issue under its existing id, enabling re-sync from foreign
    // systems where local ids are assigned freely.
    let mut remaining: Vec<Issue> = Vec::new();
    for issue in pool {
        let matched = match issue.external_ref.as_deref() {
            Some(ext) => storage.get_issue_by_external_ref(ext)?,
            None => None,
        };
        let Some(existing) = matched else {
            remaining.push(issue);
            continue;
        };

        if issue.updated_at > existing.updated_at {
            let mut record = issue.clone();
            record.id.clone_from(&existing.id);
            record.content_hash = Some(record.compute_content_hash());
            storage.upsert_issue_for_import(&record)?;
            report.updated += 1;
        } else {
            report.unchanged += 1;
        }
        if issue.id != existing.id {
            report.id_mapping.insert(issue.id.clone(), existing.id.clone());
        }
        resolved.insert(issue.id.clone(), existing.id.clone());
    }

    // Stage 10: id matching with newer-timestamp-wins.
    let mut inserts: Vec<Issue> = Vec::new();
    for issue in remaining {
        let Some(existing) = storage.get_issue(&issue.id)? else {
            inserts.push(issue);
            continue;
        };
        if issue.updated_at > existing.updated_at {
            storage.upsert_issue_for_import(&issue)?;
            report.updated += 1;
        } else {
            report.unchanged += 1;
        }
        resolved.insert(issue.id.clone(), issue.id.clone());
    }

    // Stage 11: genuine creations, batched.
    inserts.extend(creations);
    if !inserts.is_empty() {
        for issue in &inserts {
            resolved.entry(issue.id.clone()).or_insert_with(|| issue.id.clone());
        }
        storage.create_issues_batch(&inserts, "import")?;
        report.created += inserts.len();
    }

    // Stage 12: associated data for every record that landed somewhere.
    for issue in &incoming {
        let Some(target_id) = resolved.get(&issue.id) else {
            continue;
        };
        if let Err(e) = merge_relations(storage, issue, target_id, &resolved) {
            if options.strict {
                return Err(e);
            }
            tracing::warn!(
                issue_id = %issue.id,
                target_id = %target_id,
                error = %e,
                "skipping associated data for imported issue"
            );
        }
    }

    // Stage 13 (sequence counter sync) does not apply: ids are
    // hash-derived, there is no counter to advance.

    // Stage 14: durability hint.
    storage.checkpoint()?;

    Ok(report)
}

/// Recompute the content hash and repair the closed_at invariant.
fn normalize_issue(issue: &mut Issue) {
    if issue.status == Status::Closed {
        if issue.closed_at.is_none() {
            issue.closed_at = Some(issue.updated_at);
        }
    } else {
        issue.closed_at = None;
    }
    if let Some(ref ext) = issue.external_ref {
        if ext.trim().is_empty() {
            issue.external_ref = None;
        }
    }
    issue.content_hash = Some(issue.compute_content_hash());
}

/// Generate workspace-prefixed replacement ids for mismatched records.
fn assign_prefixed_ids(
    storage: &dyn Storage,
    incoming: &[Issue],
    expected_prefix: &str,
) -> Result<HashMap<String, String>> {
    let generator = IdGenerator::new(expected_prefix);
    let batch_ids: HashSet<String> = incoming.iter().map(|i| i.id.clone()).collect();
    let mut renames: HashMap<String, String> = HashMap::new();

    for issue in incoming {
        let prefix = crate::util::extract_prefix(&issue.id).unwrap_or("");
        if prefix == expected_prefix {
            continue;
        }
        let new_id = generator.generate(&issue.title, issue.created_at, incoming.len(), |id| {
            batch_ids.contains(id)
                || renames.values().any(|v| v == id)
                || storage.id_exists(id).unwrap_or(true)
        });
        renames.insert(issue.id.clone(), new_id);
    }
    Ok(renames)
}

/// Rewrite ids, dependency endpoints, comment owners, and text references
/// across the whole incoming batch.
fn apply_batch_renames(incoming: &mut [Issue], renames: &HashMap<String, String>) {
    if renames.is_empty() {
        return;
    }
    for issue in incoming.iter_mut() {
        if let Some(new_id) = renames.get(&issue.id) {
            issue.id.clone_from(new_id);
        }
        if let Some(rewritten) = rewrite_references(&issue.title, renames) {
            issue.title = rewritten;
        }
        rewrite_optional_field(&mut issue.description, renames);
        rewrite_optional_field(&mut issue.design, renames);
        rewrite_optional_field(&mut issue.acceptance_criteria, renames);
        rewrite_optional_field(&mut issue.notes, renames);

        for dep in &mut issue.dependencies {
            if let Some(new_id) = renames.get(&dep.issue_id) {
                dep.issue_id.clone_from(new_id);
            }
            if let Some(new_id) = renames.get(&dep.depends_on_id) {
                dep.depends_on_id.clone_from(new_id);
            }
        }
        for comment in &mut issue.comments {
            if let Some(new_id) = renames.get(&comment.issue_id) {
                comment.issue_id.clone_from(new_id);
            }
            if let Some(rewritten) = rewrite_references(&comment.body, renames) {
                comment.body = rewritten;
            }
        }
        issue.content_hash = Some(issue.compute_content_hash());
    }
}

/// Apply rename rewrites to text fields and comment bodies already in the
/// database.
fn rewrite_stored_references(
    storage: &mut dyn Storage,
    renames: &HashMap<String, String>,
) -> Result<usize> {
    let mut rewritten = 0;

    for mut issue in storage.get_all_issues()? {
        let mut changed = rewrite_references(&issue.title, renames)
            .map(|t| issue.title = t)
            .is_some();
        changed |= rewrite_optional_field(&mut issue.description, renames);
        changed |= rewrite_optional_field(&mut issue.design, renames);
        changed |= rewrite_optional_field(&mut issue.acceptance_criteria, renames);
        changed |= rewrite_optional_field(&mut issue.notes, renames);

        if changed {
            issue.updated_at = Utc::now();
            issue.content_hash = Some(issue.compute_content_hash());
            storage.upsert_issue_for_import(&issue)?;
            rewritten += 1;
        }
    }

    for (_, comments) in storage.get_all_comments()? {
        for comment in comments {
            if let Some(body) = rewrite_references(&comment.body, renames) {
                storage.update_comment_body(comment.id, &body)?;
                rewritten += 1;
            }
        }
    }
    Ok(rewritten)
}

/// Merge labels, dependencies, and comments from an incoming record into
/// its target issue.
fn merge_relations(
    storage: &mut dyn Storage,
    incoming: &Issue,
    target_id: &str,
    resolved: &HashMap<String, String>,
) -> Result<()> {
    if !incoming.labels.is_empty() {
        storage.merge_labels_for_import(target_id, &incoming.labels)?;
    }

    if !incoming.dependencies.is_empty() {
        let deps: Vec<crate::model::Dependency> = incoming
            .dependencies
            .iter()
            .map(|dep| {
                let mut dep = dep.clone();
                dep.issue_id = target_id.to_string();
                if let Some(mapped) = resolved.get(&dep.depends_on_id) {
                    dep.depends_on_id.clone_from(mapped);
                }
                dep
            })
            .collect();
        storage.merge_dependencies_for_import(target_id, &deps)?;
    }

    if !incoming.comments.is_empty() {
        storage.merge_comments_for_import(target_id, &incoming.comments)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::Duration;

    fn prepared(prefix: &str) -> MemoryStorage {
        let mut storage = MemoryStorage::new();
        storage
            .set_config(crate::config::CONFIG_ISSUE_PREFIX, prefix)
            .unwrap();
        storage
    }

    fn normalized(id: &str, title: &str) -> Issue {
        let mut issue = Issue::new(id, title);
        issue.content_hash = Some(issue.compute_content_hash());
        issue
    }

    #[test]
    fn second_pass_is_all_unchanged() {
        let mut storage = prepared("bd");
        let batch = vec![normalized("bd-1", "A"), normalized("bd-2", "B")];

        let first = import_issues(&mut storage, batch.clone(), &ImportOptions::default()).unwrap();
        assert_eq!(first.created, 2);

        let second = import_issues(&mut storage, batch, &ImportOptions::default()).unwrap();
        assert_eq!(second.unchanged, 2);
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.renamed, 0);
        assert_eq!(second.collisions, 0);
    }

    #[test]
    fn older_remote_loses() {
        let mut storage = prepared("bd");
        let mut local = normalized("bd-test123", "Issue");
        local.status = Status::Closed;
        local.closed_at = Some(local.updated_at);
        storage.create_issue(&local, "tester").unwrap();

        let mut remote = local.clone();
        remote.status = Status::Open;
        remote.closed_at = None;
        remote.updated_at = local.updated_at - Duration::hours(1);

        let report =
            import_issues(&mut storage, vec![remote], &ImportOptions::default()).unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(report.unchanged, 1);
        let kept = storage.get_issue("bd-test123").unwrap().unwrap();
        assert_eq!(kept.status, Status::Closed);
    }

    #[test]
    fn newer_remote_wins() {
        let mut storage = prepared("bd");
        let local = normalized("bd-test123", "Issue");
        storage.create_issue(&local, "tester").unwrap();

        let mut remote = local.clone();
        remote.priority = crate::model::Priority(2);
        remote.updated_at = local.updated_at + Duration::hours(1);

        let report =
            import_issues(&mut storage, vec![remote], &ImportOptions::default()).unwrap();
        assert_eq!(report.updated, 1);
        let kept = storage.get_issue("bd-test123").unwrap().unwrap();
        assert_eq!(kept.priority.0, 2);
    }

    #[test]
    fn equal_timestamps_local_wins() {
        let mut storage = prepared("bd");
        let local = normalized("bd-1", "Local title");
        storage.create_issue(&local, "tester").unwrap();
        let stored = storage.get_issue("bd-1").unwrap().unwrap();

        let mut remote = stored.clone();
        remote.title = "Remote title".to_string();
        // identical updated_at

        let report =
            import_issues(&mut storage, vec![remote], &ImportOptions::default()).unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(
            storage.get_issue("bd-1").unwrap().unwrap().title,
            "Local title"
        );
    }

    #[test]
    fn external_ref_updates_existing_id() {
        let mut storage = prepared("bd");
        let mut local = normalized("bd-1", "A");
        local.external_ref = Some("JIRA-100".to_string());
        storage.create_issue(&local, "tester").unwrap();
        let stored = storage.get_issue("bd-1").unwrap().unwrap();

        let mut remote = normalized("bd-2", "B");
        remote.external_ref = Some("JIRA-100".to_string());
        remote.updated_at = stored.updated_at + Duration::hours(1);

        let report =
            import_issues(&mut storage, vec![remote], &ImportOptions::default()).unwrap();
        assert_eq!(report.updated, 1);
        assert!(storage.get_issue("bd-2").unwrap().is_none());
        let kept = storage.get_issue("bd-1").unwrap().unwrap();
        assert_eq!(kept.title, "B");
        assert_eq!(report.id_mapping.get("bd-2"), Some(&"bd-1".to_string()));
    }

    #[test]
    fn external_ref_older_is_unchanged() {
        let mut storage = prepared("bd");
        let mut local = normalized("bd-1", "A");
        local.external_ref = Some("JIRA-100".to_string());
        storage.create_issue(&local, "tester").unwrap();
        let stored = storage.get_issue("bd-1").unwrap().unwrap();

        let mut remote = normalized("bd-2", "B");
        remote.external_ref = Some("JIRA-100".to_string());
        remote.updated_at = stored.updated_at - Duration::hours(1);

        let report =
            import_issues(&mut storage, vec![remote], &ImportOptions::default()).unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(storage.get_issue("bd-1").unwrap().unwrap().title, "A");
    }

    #[test]
    fn rename_applies_and_rewrites_references() {
        let mut storage = prepared("new");
        let old = normalized("old-1", "Shared content");
        storage.create_issue(&old, "tester").unwrap();
        let mut other = normalized("old-2", "References old-1 here");
        other.description = Some("blocked by old-1, not old-10".to_string());
        storage.create_issue(&other, "tester").unwrap();

        let stored = storage.get_issue("old-1").unwrap().unwrap();
        let mut renamed = stored.clone();
        renamed.id = "new-1".to_string();

        let report = import_issues(
            &mut storage,
            vec![renamed],
            &ImportOptions {
                rename_on_import: true,
                skip_prefix_validation: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(report.renamed, 1);
        assert_eq!(report.created, 0);
        assert_eq!(report.updated, 0);
        assert_eq!(report.id_mapping.get("old-1"), Some(&"new-1".to_string()));
        assert!(storage.get_issue("old-1").unwrap().is_none());
        assert!(storage.get_issue("new-1").unwrap().is_some());

        let other = storage.get_issue("old-2").unwrap().unwrap();
        assert_eq!(other.title, "References new-1 here");
        assert_eq!(
            other.description.as_deref(),
            Some("blocked by new-1, not old-10")
        );
    }

    #[test]
    fn prefix_mismatch_fails_by_default() {
        let mut storage = prepared("bd");
        let report = import_issues(
            &mut storage,
            vec![normalized("other-5", "X")],
            &ImportOptions::default(),
        );
        let err = report.unwrap_err();
        match err {
            BeadsError::PrefixMismatch { expected, counts } => {
                assert_eq!(expected, "bd");
                assert_eq!(counts.get("other"), Some(&1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn prefix_mismatch_renames_on_request() {
        let mut storage = prepared("bd");
        let mut incoming = normalized("other-5", "X");
        incoming.notes = Some("see other-5".to_string());

        let report = import_issues(
            &mut storage,
            vec![incoming],
            &ImportOptions {
                rename_on_import: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(report.created, 1);
        let new_id = report.id_mapping.get("other-5").unwrap();
        assert!(new_id.starts_with("bd-"));
        let issue = storage.get_issue(new_id).unwrap().unwrap();
        assert_eq!(issue.notes.as_deref(), Some(format!("see {new_id}").as_str()));
    }

    #[test]
    fn collision_without_resolve_follows_timestamps() {
        let mut storage = prepared("bd");
        let local = normalized("bd-1", "Content X");
        storage.create_issue(&local, "tester").unwrap();
        let stored = storage.get_issue("bd-1").unwrap().unwrap();

        let mut older = normalized("bd-1", "Content Y");
        older.updated_at = stored.updated_at - Duration::hours(1);
        older.created_at = stored.created_at;

        let report =
            import_issues(&mut storage, vec![older], &ImportOptions::default()).unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.collisions, 1);
        assert_eq!(report.collision_ids, vec!["bd-1".to_string()]);
        assert_eq!(storage.get_issue("bd-1").unwrap().unwrap().title, "Content X");
    }

    #[test]
    fn collision_with_resolve_remaps_to_fresh_id() {
        let mut storage = prepared("bd");
        let local = normalized("bd-1", "Content X");
        storage.create_issue(&local, "tester").unwrap();

        let mut conflicting = normalized("bd-1", "Content Y");
        conflicting.updated_at = Utc::now() - Duration::hours(1);

        let report = import_issues(
            &mut storage,
            vec![conflicting],
            &ImportOptions {
                resolve_collisions: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(report.created, 1);
        let new_id = report.id_mapping.get("bd-1").unwrap();
        assert_ne!(new_id, "bd-1");
        assert_eq!(storage.get_issue("bd-1").unwrap().unwrap().title, "Content X");
        assert_eq!(storage.get_issue(new_id).unwrap().unwrap().title, "Content Y");
    }

    #[test]
    fn duplicate_external_refs_fail_or_clear() {
        let mut storage = prepared("bd");
        let mut a = normalized("bd-1", "A");
        a.external_ref = Some("JIRA-9".to_string());
        let mut b = normalized("bd-2", "B");
        b.external_ref = Some("JIRA-9".to_string());

        let err = import_issues(
            &mut storage,
            vec![a.clone(), b.clone()],
            &ImportOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BeadsError::DuplicateExternalRef { .. }));

        let report = import_issues(
            &mut storage,
            vec![a, b],
            &ImportOptions {
                clear_duplicate_external_refs: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            storage.get_issue("bd-1").unwrap().unwrap().external_ref,
            Some("JIRA-9".to_string())
        );
        assert_eq!(storage.get_issue("bd-2").unwrap().unwrap().external_ref, None);
    }

    #[test]
    fn dry_run_reports_without_mutation() {
        let mut storage = prepared("bd");
        storage
            .create_issue(&normalized("bd-1", "Existing"), "tester")
            .unwrap();

        let report = import_issues(
            &mut storage,
            vec![normalized("bd-2", "New")],
            &ImportOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.created, 1);
        assert!(storage.get_issue("bd-2").unwrap().is_none());
    }

    #[test]
    fn merges_labels_comments_dependencies() {
        let mut storage = prepared("bd");
        let mut incoming = normalized("bd-1", "A");
        let mut dep_target = normalized("bd-2", "B");
        dep_target.labels = vec!["infra".to_string()];
        incoming.labels = vec!["urgent".to_string()];
        incoming.comments = vec![crate::model::Comment {
            id: 7,
            issue_id: "bd-1".to_string(),
            author: "alice".to_string(),
            body: "ported".to_string(),
            created_at: Utc::now(),
        }];
        incoming.dependencies = vec![crate::model::Dependency {
            issue_id: "bd-1".to_string(),
            depends_on_id: "bd-2".to_string(),
            dep_type: crate::model::DependencyType::Blocks,
            created_at: Utc::now(),
            created_by: None,
        }];

        let report = import_issues(
            &mut storage,
            vec![incoming, dep_target],
            &ImportOptions::default(),
        )
        .unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(storage.get_labels("bd-1").unwrap(), vec!["urgent".to_string()]);
        assert_eq!(storage.get_comments("bd-1").unwrap().len(), 1);
        assert_eq!(storage.get_dependency_records("bd-1").unwrap().len(), 1);
    }

    #[test]
    fn normalize_repairs_closed_at() {
        let mut issue = Issue::new("bd-1", "A");
        issue.status = Status::Closed;
        normalize_issue(&mut issue);
        assert_eq!(issue.closed_at, Some(issue.updated_at));

        issue.status = Status::Open;
        normalize_issue(&mut issue);
        assert!(issue.closed_at.is_none());
    }
}
