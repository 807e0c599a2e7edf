//! Export/import round-trip laws.

mod common;

use beads::config::CONFIG_ISSUE_PREFIX;
use beads::model::{Dependency, DependencyType};
use beads::storage::{SqliteStorage, Storage};
use beads::sync::export::{ExportOptions, export_to_jsonl};
use beads::sync::import::{ImportOptions, import_from_jsonl};
use beads::sync::read_issues_from_jsonl;
use chrono::{TimeZone, Utc};
use common::fixtures;
use tempfile::TempDir;

fn storage(prefix: &str) -> SqliteStorage {
    let mut storage = SqliteStorage::open_memory().unwrap();
    storage.set_config(CONFIG_ISSUE_PREFIX, prefix).unwrap();
    storage
}

fn populated() -> SqliteStorage {
    let mut db = storage("bd");
    let mut alpha = fixtures::issue_with_id("bd-alpha", "Alpha");
    alpha.external_ref = Some("JIRA-1".to_string());
    alpha.description = Some("first".to_string());
    let beta = fixtures::issue_with_id("bd-beta", "Beta");

    db.create_issue(&alpha, "tester").unwrap();
    db.create_issue(&beta, "tester").unwrap();
    db.add_dependency(
        &Dependency {
            issue_id: "bd-beta".to_string(),
            depends_on_id: "bd-alpha".to_string(),
            dep_type: DependencyType::Blocks,
            created_at: Utc.timestamp_opt(1_750_000_100, 0).unwrap(),
            created_by: Some("tester".to_string()),
        },
        "tester",
    )
    .unwrap();
    db.add_label("bd-alpha", "core", "tester").unwrap();
    db.add_comment("bd-alpha", "alice", "looks good").unwrap();
    db
}

#[test]
fn roundtrip_reproduces_byte_identical_log() {
    let mut source = populated();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("issues.jsonl");
    export_to_jsonl(&mut source, &path, &ExportOptions::default()).unwrap();
    let original = std::fs::read_to_string(&path).unwrap();

    // Import into an empty database and export again.
    let mut replica = storage("bd");
    import_from_jsonl(&mut replica, &path, &ImportOptions::default()).unwrap();

    let replica_path = dir.path().join("replica.jsonl");
    export_to_jsonl(&mut replica, &replica_path, &ExportOptions::default()).unwrap();
    let reproduced = std::fs::read_to_string(&replica_path).unwrap();

    assert_eq!(original, reproduced);
}

#[test]
fn roundtrip_preserves_entities_and_hashes() {
    let mut source = populated();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("issues.jsonl");
    export_to_jsonl(&mut source, &path, &ExportOptions::default()).unwrap();

    let mut replica = storage("bd");
    import_from_jsonl(&mut replica, &path, &ImportOptions::default()).unwrap();

    for id in ["bd-alpha", "bd-beta"] {
        let a = source.get_issue(id).unwrap().unwrap();
        let b = replica.get_issue(id).unwrap().unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.title, b.title);
        assert_eq!(a.updated_at, b.updated_at);
    }
    assert_eq!(
        source.get_labels("bd-alpha").unwrap(),
        replica.get_labels("bd-alpha").unwrap()
    );
    assert_eq!(
        source.get_comments("bd-alpha").unwrap().len(),
        replica.get_comments("bd-alpha").unwrap().len()
    );
    assert_eq!(
        source.get_dependency_records("bd-beta").unwrap().len(),
        replica.get_dependency_records("bd-beta").unwrap().len()
    );
}

#[test]
fn export_clears_dirty_and_log_is_sorted() {
    let mut db = populated();
    assert!(!db.get_dirty_ids().unwrap().is_empty());

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("issues.jsonl");
    let outcome = export_to_jsonl(&mut db, &path, &ExportOptions::default()).unwrap();

    assert!(db.get_dirty_ids().unwrap().is_empty());
    assert_eq!(outcome.exported_ids, vec!["bd-alpha", "bd-beta"]);

    let ids: Vec<String> = read_issues_from_jsonl(&path)
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(ids, vec!["bd-alpha", "bd-beta"]);
}

#[test]
fn export_writes_mode_0600() {
    let mut db = populated();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("issues.jsonl");
    export_to_jsonl(&mut db, &path, &ExportOptions::default()).unwrap();

    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn export_leaves_no_temp_file() {
    let mut db = populated();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("issues.jsonl");
    export_to_jsonl(&mut db, &path, &ExportOptions::default()).unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn mutation_after_export_redirties_only_that_issue() {
    let mut db = populated();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("issues.jsonl");
    export_to_jsonl(&mut db, &path, &ExportOptions::default()).unwrap();

    db.add_label("bd-beta", "later", "tester").unwrap();
    assert_eq!(db.get_dirty_ids().unwrap(), vec!["bd-beta".to_string()]);
}
