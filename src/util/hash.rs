//! Content hashing for issue deduplication and sync.
//!
//! Uses SHA256 over stable ordered fields with null separators. The digest
//! is the primary convergence key: two issues with the same canonical
//! content hash identically on every host.

use sha2::{Digest, Sha256};

use crate::model::{Issue, IssueType, Priority, Status};

/// Compute the SHA256 content hash for an issue.
///
/// Fields included (stable order, each terminated by a null separator):
/// - title, description, design, `acceptance_criteria`, notes
/// - status, decimal priority, `issue_type`
/// - assignee, `external_ref`
///
/// Fields excluded:
/// - id, `content_hash` (circular)
/// - labels, dependencies, comments, events (separate entities)
/// - timestamps (`created_at`, `updated_at`, `closed_at`)
/// - compaction metadata
#[must_use]
pub fn content_hash(issue: &Issue) -> String {
    content_hash_from_parts(
        &issue.title,
        issue.description.as_deref(),
        issue.design.as_deref(),
        issue.acceptance_criteria.as_deref(),
        issue.notes.as_deref(),
        issue.status,
        issue.priority,
        issue.issue_type,
        issue.assignee.as_deref(),
        issue.external_ref.as_deref(),
    )
}

/// Create a content hash from raw components (for import/validation).
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn content_hash_from_parts(
    title: &str,
    description: Option<&str>,
    design: Option<&str>,
    acceptance_criteria: Option<&str>,
    notes: Option<&str>,
    status: Status,
    priority: Priority,
    issue_type: IssueType,
    assignee: Option<&str>,
    external_ref: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();

    let mut add_field = |value: &str| {
        // Embedded NULs would collide with the separator.
        if value.contains('\0') {
            hasher.update(value.replace('\0', " ").as_bytes());
        } else {
            hasher.update(value.as_bytes());
        }
        hasher.update(b"\x00");
    };

    add_field(title);
    add_field(description.unwrap_or(""));
    add_field(design.unwrap_or(""));
    add_field(acceptance_criteria.unwrap_or(""));
    add_field(notes.unwrap_or(""));
    add_field(status.as_str());
    add_field(&priority.0.to_string());
    add_field(issue_type.as_str());
    add_field(assignee.unwrap_or(""));
    add_field(external_ref.unwrap_or(""));

    format!("{:x}", hasher.finalize())
}
