//! Model validation rules.
//!
//! Enforced before any issue reaches storage or the JSONL log.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BeadsError, Result};
use crate::model::{Issue, Status};

/// Maximum title length in bytes.
pub const MAX_TITLE_BYTES: usize = 500;

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    let pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*-[a-z0-9]+$").unwrap();
    pattern
});

/// A single field validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate an issue against the model constraints.
///
/// # Errors
///
/// Returns a `Validation` error naming the first offending field.
pub fn validate_issue(issue: &Issue) -> Result<()> {
    let problems = check_issue(issue);
    match problems.first() {
        None => Ok(()),
        Some(first) => Err(BeadsError::validation(
            first.field.clone(),
            first.message.clone(),
        )),
    }
}

/// Collect every validation problem for an issue.
#[must_use]
pub fn check_issue(issue: &Issue) -> Vec<ValidationIssue> {
    let mut problems = Vec::new();

    if issue.title.trim().is_empty() {
        problems.push(ValidationIssue {
            field: "title".to_string(),
            message: "cannot be empty".to_string(),
        });
    }
    if issue.title.len() > MAX_TITLE_BYTES {
        problems.push(ValidationIssue {
            field: "title".to_string(),
            message: format!(
                "exceeds {MAX_TITLE_BYTES} bytes (got {})",
                issue.title.len()
            ),
        });
    }

    if !(0..=4).contains(&issue.priority.0) {
        problems.push(ValidationIssue {
            field: "priority".to_string(),
            message: format!("must be 0-4, got {}", issue.priority.0),
        });
    }

    if let Some(minutes) = issue.estimated_minutes {
        if minutes < 0 {
            problems.push(ValidationIssue {
                field: "estimated_minutes".to_string(),
                message: format!("must be non-negative, got {minutes}"),
            });
        }
    }

    if issue.id.is_empty() {
        problems.push(ValidationIssue {
            field: "id".to_string(),
            message: "cannot be empty".to_string(),
        });
    } else if !ID_PATTERN.is_match(&issue.id) {
        problems.push(ValidationIssue {
            field: "id".to_string(),
            message: format!("'{}' is not a valid issue id", issue.id),
        });
    }

    match (issue.status, issue.closed_at) {
        (Status::Closed, None) => problems.push(ValidationIssue {
            field: "closed_at".to_string(),
            message: "closed issue must have closed_at".to_string(),
        }),
        (Status::Closed, Some(_)) => {}
        (_, Some(_)) => problems.push(ValidationIssue {
            field: "closed_at".to_string(),
            message: "non-closed issue must not have closed_at".to_string(),
        }),
        (_, None) => {}
    }

    if let Some(ref external_ref) = issue.external_ref {
        if external_ref.trim().is_empty() {
            problems.push(ValidationIssue {
                field: "external_ref".to_string(),
                message: "must be absent rather than empty".to_string(),
            });
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Issue, Priority};
    use chrono::Utc;

    #[test]
    fn accepts_valid_issue() {
        let issue = Issue::new("bd-abc123", "A valid title");
        assert!(validate_issue(&issue).is_ok());
    }

    #[test]
    fn rejects_empty_title() {
        let issue = Issue::new("bd-abc123", "   ");
        let err = validate_issue(&issue).unwrap_err();
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn rejects_oversized_title() {
        let issue = Issue::new("bd-abc123", "x".repeat(501));
        assert!(validate_issue(&issue).is_err());
    }

    #[test]
    fn rejects_priority_out_of_range() {
        let mut issue = Issue::new("bd-abc123", "Title");
        issue.priority = Priority(7);
        assert!(validate_issue(&issue).is_err());
    }

    #[test]
    fn rejects_negative_estimate() {
        let mut issue = Issue::new("bd-abc123", "Title");
        issue.estimated_minutes = Some(-5);
        assert!(validate_issue(&issue).is_err());
    }

    #[test]
    fn rejects_closed_without_timestamp() {
        let mut issue = Issue::new("bd-abc123", "Title");
        issue.status = Status::Closed;
        assert!(validate_issue(&issue).is_err());

        issue.closed_at = Some(Utc::now());
        assert!(validate_issue(&issue).is_ok());
    }

    #[test]
    fn rejects_open_with_closed_at() {
        let mut issue = Issue::new("bd-abc123", "Title");
        issue.closed_at = Some(Utc::now());
        assert!(validate_issue(&issue).is_err());
    }

    #[test]
    fn rejects_bad_ids() {
        let mut issue = Issue::new("no_hyphen", "Title");
        assert!(validate_issue(&issue).is_err());
        issue.id = "bd-UPPER".to_string();
        assert!(validate_issue(&issue).is_err());
        issue.id = "bd-import-2".to_string();
        assert!(validate_issue(&issue).is_ok());
    }
}
