//! Reconciliation scenarios: rename, timestamp precedence, external-ref
//! matching, collisions, and prefix policy, run against the SQLite
//! backing.

mod common;

use beads::config::CONFIG_ISSUE_PREFIX;
use beads::error::BeadsError;
use beads::model::{Priority, Status};
use beads::storage::{IssueUpdate, SqliteStorage, Storage};
use beads::sync::{ImportOptions, import_issues};
use chrono::Duration;
use common::fixtures;

fn storage(prefix: &str) -> SqliteStorage {
    let mut storage = SqliteStorage::open_memory().unwrap();
    storage.set_config(CONFIG_ISSUE_PREFIX, prefix).unwrap();
    storage
}

#[test]
fn rename_on_import_scenario() {
    // DB has old-1 with content hash H; the log carries new-1 with the
    // same content.
    let mut db = storage("new");
    let old = fixtures::issue_with_id("old-1", "Shared content");
    db.create_issue(&old, "tester").unwrap();
    let mut referencing = fixtures::issue_with_id("old-2", "Mentions old-1 and old-10");
    referencing.description = Some("(old-1) should flip".to_string());
    db.create_issue(&referencing, "tester").unwrap();

    let mut incoming = db.get_issue("old-1").unwrap().unwrap();
    incoming.id = "new-1".to_string();

    let report = import_issues(
        &mut db,
        vec![incoming],
        &ImportOptions {
            rename_on_import: true,
            skip_prefix_validation: true,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(report.unchanged, 0);
    assert_eq!(report.renamed, 1);
    assert_eq!(report.id_mapping.get("old-1"), Some(&"new-1".to_string()));

    assert!(db.get_issue("old-1").unwrap().is_none());
    assert!(db.get_issue("new-1").unwrap().is_some());

    // Bounded tokens rewritten; old-10 untouched.
    let other = db.get_issue("old-2").unwrap().unwrap();
    assert_eq!(other.title, "Mentions new-1 and old-10");
    assert_eq!(other.description.as_deref(), Some("(new-1) should flip"));
}

#[test]
fn older_remote_loses() {
    let mut db = storage("bd");
    let local = fixtures::closed(fixtures::issue_with_id("bd-test123", "Settled"));
    db.create_issue(&local, "tester").unwrap();
    let stored = db.get_issue("bd-test123").unwrap().unwrap();

    let mut remote = stored.clone();
    remote.status = Status::Open;
    remote.closed_at = None;
    remote.updated_at = stored.updated_at - Duration::hours(1);

    let report = import_issues(&mut db, vec![remote], &ImportOptions::default()).unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(report.unchanged, 1);
    assert_eq!(
        db.get_issue("bd-test123").unwrap().unwrap().status,
        Status::Closed
    );
}

#[test]
fn newer_remote_wins() {
    let mut db = storage("bd");
    let local = fixtures::closed(fixtures::issue_with_id("bd-test123", "Settled"));
    db.create_issue(&local, "tester").unwrap();
    let stored = db.get_issue("bd-test123").unwrap().unwrap();

    let mut remote = stored.clone();
    remote.priority = Priority(2);
    remote.updated_at = stored.updated_at + Duration::hours(1);

    let report = import_issues(&mut db, vec![remote], &ImportOptions::default()).unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(db.get_issue("bd-test123").unwrap().unwrap().priority, Priority(2));
}

#[test]
fn equal_timestamps_do_not_overwrite() {
    let mut db = storage("bd");
    let local = fixtures::issue_with_id("bd-1", "Local");
    db.create_issue(&local, "tester").unwrap();
    let stored = db.get_issue("bd-1").unwrap().unwrap();

    let mut remote = stored.clone();
    remote.title = "Remote".to_string();

    let report = import_issues(&mut db, vec![remote], &ImportOptions::default()).unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(db.get_issue("bd-1").unwrap().unwrap().title, "Local");
}

#[test]
fn external_ref_precedence_keeps_existing_id() {
    let mut db = storage("bd");
    let mut local = fixtures::issue_with_id("bd-1", "A");
    local.external_ref = Some("JIRA-100".to_string());
    db.create_issue(&local, "tester").unwrap();
    let stored = db.get_issue("bd-1").unwrap().unwrap();

    let mut remote = fixtures::issue_with_id("bd-import-2", "B");
    remote.external_ref = Some("JIRA-100".to_string());
    remote.updated_at = stored.updated_at + Duration::hours(1);

    let report = import_issues(
        &mut db,
        vec![remote],
        &ImportOptions {
            skip_prefix_validation: true,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(report.updated, 1);
    assert!(db.get_issue("bd-import-2").unwrap().is_none());
    let kept = db.get_issue("bd-1").unwrap().unwrap();
    assert_eq!(kept.title, "B");
}

#[test]
fn collision_without_resolve_is_timestamped_update() {
    let mut db = storage("bd");
    let local = fixtures::issue_with_id("bd-1", "Content X");
    db.create_issue(&local, "tester").unwrap();
    let stored = db.get_issue("bd-1").unwrap().unwrap();

    let mut remote = fixtures::issue_with_id("bd-1", "Content Y");
    remote.updated_at = stored.updated_at - Duration::hours(1);

    let report = import_issues(&mut db, vec![remote], &ImportOptions::default()).unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(report.unchanged, 1);
    assert_eq!(db.get_issue("bd-1").unwrap().unwrap().title, "Content X");
}

#[test]
fn collision_with_resolve_remaps() {
    let mut db = storage("bd");
    let local = fixtures::issue_with_id("bd-1", "Content X");
    db.create_issue(&local, "tester").unwrap();
    let stored = db.get_issue("bd-1").unwrap().unwrap();

    let mut remote = fixtures::issue_with_id("bd-1", "Content Y");
    remote.updated_at = stored.updated_at - Duration::hours(1);

    let report = import_issues(
        &mut db,
        vec![remote],
        &ImportOptions {
            resolve_collisions: true,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(report.created, 1);
    let new_id = report.id_mapping.get("bd-1").unwrap();
    assert!(new_id.starts_with("bd-"));
    assert_ne!(new_id, "bd-1");
    assert_eq!(db.get_issue("bd-1").unwrap().unwrap().title, "Content X");
    assert_eq!(db.get_issue(new_id).unwrap().unwrap().title, "Content Y");
}

#[test]
fn prefix_mismatch_rejected_with_counts() {
    let mut db = storage("bd");
    let incoming = fixtures::issue_with_id("other-5", "Foreign");

    let err = import_issues(&mut db, vec![incoming], &ImportOptions::default()).unwrap_err();
    match err {
        BeadsError::PrefixMismatch { expected, counts } => {
            assert_eq!(expected, "bd");
            assert_eq!(counts.get("other"), Some(&1));
        }
        other => panic!("expected PrefixMismatch, got {other}"),
    }
}

#[test]
fn prefix_mismatch_rewrites_with_rename_on_import() {
    let mut db = storage("bd");
    let mut incoming = fixtures::issue_with_id("other-5", "Foreign");
    incoming.description = Some("tracked as other-5".to_string());

    let report = import_issues(
        &mut db,
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
    let issue = db.get_issue(new_id).unwrap().unwrap();
    assert_eq!(
        issue.description.as_deref(),
        Some(format!("tracked as {new_id}").as_str())
    );
}

#[test]
fn reimport_is_idempotent() {
    let mut db = storage("bd");
    let batch = vec![
        fixtures::issue_with_id("bd-1", "A"),
        fixtures::issue_with_id("bd-2", "B"),
    ];

    let first = import_issues(&mut db, batch.clone(), &ImportOptions::default()).unwrap();
    assert_eq!(first.created, 2);

    let second = import_issues(&mut db, batch, &ImportOptions::default()).unwrap();
    assert_eq!(second.unchanged, 2);
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.renamed, 0);
    assert_eq!(second.collisions, 0);
}

#[test]
fn associated_data_merges_even_when_record_is_unchanged() {
    // Relations ride on the log record; an older (or identical) record
    // can still carry labels and comments a peer added.
    let mut db = storage("bd");
    db.create_issue(&fixtures::issue_with_id("bd-1", "Shared"), "tester")
        .unwrap();
    let stored = db.get_issue("bd-1").unwrap().unwrap();

    let mut remote = stored.clone();
    remote.labels = vec!["from-peer".to_string()];
    remote.comments = vec![beads::model::Comment {
        id: 1,
        issue_id: "bd-1".to_string(),
        author: "peer".to_string(),
        body: "seen elsewhere".to_string(),
        created_at: stored.updated_at,
    }];

    let report = import_issues(&mut db, vec![remote], &ImportOptions::default()).unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(db.get_labels("bd-1").unwrap(), vec!["from-peer".to_string()]);
    assert_eq!(db.get_comments("bd-1").unwrap().len(), 1);
}

#[test]
fn dependency_endpoints_follow_remapped_ids() {
    let mut db = storage("bd");
    let mut child = fixtures::issue_with_id("other-1", "Child");
    let parent = fixtures::issue_with_id("other-2", "Parent");
    child.dependencies = vec![beads::model::Dependency {
        issue_id: "other-1".to_string(),
        depends_on_id: "other-2".to_string(),
        dep_type: beads::model::DependencyType::Blocks,
        created_at: child.created_at,
        created_by: None,
    }];

    let report = import_issues(
        &mut db,
        vec![child, parent],
        &ImportOptions {
            rename_on_import: true,
            ..Default::default()
        },
    )
    .unwrap();

    let child_id = report.id_mapping.get("other-1").unwrap();
    let parent_id = report.id_mapping.get("other-2").unwrap();
    let deps = db.get_dependency_records(child_id).unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(&deps[0].depends_on_id, parent_id);
}

#[test]
fn empty_update_is_noop_law() {
    let mut db = storage("bd");
    db.create_issue(&fixtures::issue_with_id("bd-1", "A"), "tester")
        .unwrap();
    db.clear_dirty_ids(&["bd-1".to_string()]).unwrap();
    let before = db.get_issue("bd-1").unwrap().unwrap();
    let events_before = db.get_events("bd-1", 100).unwrap().len();

    db.update_issue("bd-1", &IssueUpdate::default(), "tester")
        .unwrap();

    assert_eq!(db.get_issue("bd-1").unwrap().unwrap(), before);
    assert_eq!(db.get_events("bd-1", 100).unwrap().len(), events_before);
    assert!(db.get_dirty_ids().unwrap().is_empty());
}
