//! Storage facade for `beads`.
//!
//! The [`Storage`] trait is the single polymorphic seam in the crate:
//! everything above it (sync engine, daemon handlers) talks to the trait,
//! and the default backing is an embedded `SQLite` store. An in-memory
//! implementation satisfies the same contracts for tests.

pub mod events;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    Comment, Dependency, EpicStatus, Event, Issue, IssueType, Priority, Status,
};

/// Typed partial update for an issue.
///
/// Only `Some` fields are applied. Fields that are themselves optional on
/// the issue use a nested option: `Some(None)` clears the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub design: Option<Option<String>>,
    pub acceptance_criteria: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<Option<String>>,
    pub external_ref: Option<Option<String>>,
    pub estimated_minutes: Option<Option<i32>>,
    pub closed_at: Option<Option<DateTime<Utc>>>,
}

impl IssueUpdate {
    /// True when no field is set; applying it is a no-op.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Filters for listing and searching issues.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<IssueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Label filter; all must match unless `labels_any` is set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub labels_any: bool,
    /// Restrict to these ids when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Ordering applied to ready-work results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortPolicy {
    /// Priority-first within the last 48 hours, oldest-first beyond.
    #[default]
    Hybrid,
    /// Strict priority, then `created_at`.
    Priority,
    /// `created_at` ascending.
    Oldest,
}

impl FromStr for SortPolicy {
    type Err = crate::error::BeadsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "priority" => Ok(Self::Priority),
            "oldest" => Ok(Self::Oldest),
            other => Err(crate::error::BeadsError::validation(
                "sort",
                format!("unknown sort policy: {other}"),
            )),
        }
    }
}

/// Filters for ready-work queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadyFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub sort: SortPolicy,
}

/// Aggregate statistics about the issue database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total: usize,
    pub open: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub closed: usize,
    /// Open issues with no open `blocks` predecessors.
    pub ready: usize,
    /// Epics whose children are all closed.
    pub epics_eligible_for_close: usize,
}

/// One node of a dependency tree traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub issue: Issue,
    pub depth: usize,
    pub dep_type: Option<crate::model::DependencyType>,
}

/// BFS dependency tree with a truncation flag at the depth limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyTree {
    pub nodes: Vec<TreeNode>,
    /// True when edges existed past `max_depth`.
    pub truncated: bool,
}

/// Primary storage interface for issue persistence.
///
/// Reads take `&self`, mutations take `&mut self`; every mutation runs
/// under the implementation's transaction discipline, writes its audit
/// events, and marks the affected ids dirty.
pub trait Storage: Send {
    // -- Issue CRUD ----------------------------------------------------------

    /// Create a new issue. Fails with `DuplicateId` when the id exists.
    fn create_issue(&mut self, issue: &Issue, actor: &str) -> Result<()>;

    /// Create multiple issues, all-or-nothing.
    fn create_issues_batch(&mut self, issues: &[Issue], actor: &str) -> Result<()>;

    /// Fetch an issue by id; no error on miss.
    fn get_issue(&self, id: &str) -> Result<Option<Issue>>;

    /// Apply a partial update. Recomputes the content hash when a canonical
    /// field changed, advances `updated_at`, and records per-change events.
    fn update_issue(&mut self, id: &str, updates: &IssueUpdate, actor: &str) -> Result<Issue>;

    /// Hard-delete an issue, cascading to dependencies (both sides),
    /// labels, comments, and events.
    fn delete_issue(&mut self, id: &str) -> Result<()>;

    /// List issues matching the filters, ordered by id.
    fn list_issues(&self, filters: &ListFilters) -> Result<Vec<Issue>>;

    /// Substring search over title + description, combined with filters.
    fn search_issues(&self, query: &str, filters: &ListFilters) -> Result<Vec<Issue>>;

    // -- Dependencies --------------------------------------------------------

    /// Add a dependency edge. Idempotent on (issue_id, depends_on_id, type);
    /// returns false when the edge already existed. Rejects self-edges and
    /// `blocks` cycles.
    fn add_dependency(&mut self, dep: &Dependency, actor: &str) -> Result<bool>;

    /// Remove a dependency edge; returns false when absent.
    fn remove_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<bool>;

    /// Issues this issue depends on.
    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Issues depending on this issue.
    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Raw dependency edges originating at `issue_id`.
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    /// BFS over outgoing edges with a truncation flag at `max_depth`.
    fn get_dependency_tree(&self, issue_id: &str, max_depth: usize) -> Result<DependencyTree>;

    /// Repoint dependency edges on both sides from `old_id` to `new_id`.
    fn rename_dependency_references(&mut self, old_id: &str, new_id: &str) -> Result<usize>;

    // -- Labels --------------------------------------------------------------

    /// Idempotent add of a normalized label; returns false when present.
    fn add_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool>;

    /// Remove a label; returns false when absent.
    fn remove_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool>;

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    // -- Comments and events -------------------------------------------------

    fn add_comment(&mut self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    /// Replace a comment's body in place (rename reference rewriting).
    fn update_comment_body(&mut self, comment_id: i64, body: &str) -> Result<()>;

    fn get_events(&self, issue_id: &str, limit: usize) -> Result<Vec<Event>>;

    // -- Work queries --------------------------------------------------------

    /// Open issues with no open `blocks`-type predecessors.
    fn get_ready_work(&self, filters: &ReadyFilters) -> Result<Vec<Issue>>;

    /// Per-epic child counts and closure eligibility.
    fn get_epic_closure_status(&self) -> Result<Vec<EpicStatus>>;

    fn get_statistics(&self) -> Result<Statistics>;

    // -- Dirty set (export contract) -----------------------------------------

    fn get_dirty_ids(&self) -> Result<Vec<String>>;

    fn clear_dirty_ids(&mut self, ids: &[String]) -> Result<usize>;

    /// Mark ids dirty outside of a regular mutation (import path).
    fn mark_dirty(&mut self, ids: &[String]) -> Result<()>;

    // -- Config / metadata ---------------------------------------------------

    fn get_config(&self, key: &str) -> Result<Option<String>>;
    fn set_config(&mut self, key: &str, value: &str) -> Result<()>;
    fn delete_config(&mut self, key: &str) -> Result<bool>;

    fn get_metadata(&self, key: &str) -> Result<Option<String>>;
    fn set_metadata(&mut self, key: &str, value: &str) -> Result<()>;

    // -- Bulk reads (export) -------------------------------------------------

    /// All issues sorted by id ascending.
    fn get_all_issues(&self) -> Result<Vec<Issue>>;

    /// All dependency edges grouped by source issue id.
    fn get_all_dependency_records(&self) -> Result<HashMap<String, Vec<Dependency>>>;

    /// All labels grouped by issue id.
    fn get_all_labels(&self) -> Result<HashMap<String, Vec<String>>>;

    /// All comments grouped by issue id.
    fn get_all_comments(&self) -> Result<HashMap<String, Vec<Comment>>>;

    // -- Secondary indexes ---------------------------------------------------

    fn get_issue_by_external_ref(&self, external_ref: &str) -> Result<Option<Issue>>;

    fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<Issue>>;

    fn id_exists(&self, id: &str) -> Result<bool>;

    fn count_issues(&self) -> Result<usize>;

    // -- Import support ------------------------------------------------------

    /// Write an issue exactly as given (timestamps and hash from the
    /// record), inserting or replacing, and mark it dirty.
    fn upsert_issue_for_import(&mut self, issue: &Issue) -> Result<()>;

    /// Add labels not already present; returns the number added.
    fn merge_labels_for_import(&mut self, issue_id: &str, labels: &[String]) -> Result<usize>;

    /// Add dependency edges not already present on (depends_on_id, type);
    /// returns the number added.
    fn merge_dependencies_for_import(
        &mut self,
        issue_id: &str,
        deps: &[Dependency],
    ) -> Result<usize>;

    /// Add comments not matching any existing one by (author, trimmed
    /// text); returns the number added.
    fn merge_comments_for_import(&mut self, issue_id: &str, comments: &[Comment]) -> Result<usize>;

    /// Record per-issue export fingerprints.
    fn set_export_hashes(&mut self, hashes: &[(String, String)]) -> Result<usize>;

    /// Drop all export fingerprints (import invalidates them).
    fn clear_export_hashes(&mut self) -> Result<usize>;

    // -- Lifecycle -----------------------------------------------------------

    /// Durability hint after bulk operations.
    fn checkpoint(&mut self) -> Result<()>;
}

/// Normalize a label for storage: trimmed, never empty.
#[must_use]
pub fn normalize_label(label: &str) -> Option<String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_update_is_empty() {
        assert!(IssueUpdate::default().is_empty());
        let update = IssueUpdate {
            title: Some("x".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn sort_policy_parses() {
        assert_eq!("hybrid".parse::<SortPolicy>().unwrap(), SortPolicy::Hybrid);
        assert_eq!(
            "priority".parse::<SortPolicy>().unwrap(),
            SortPolicy::Priority
        );
        assert_eq!("oldest".parse::<SortPolicy>().unwrap(), SortPolicy::Oldest);
        assert!("newest".parse::<SortPolicy>().is_err());
    }

    #[test]
    fn label_normalization() {
        assert_eq!(normalize_label("  x  "), Some("x".to_string()));
        assert_eq!(normalize_label("   "), None);
    }
}
