//! Error types for `beads`.
//!
//! Structured variants for every failure the sync engine and daemon can
//! surface, with `thiserror` derive and `anyhow` interop at the binary
//! boundary.

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `beads` operations.
#[derive(Error, Debug)]
pub enum BeadsError {
    // === Storage Errors ===
    /// Database file not found at the specified path.
    #[error("Database not found at '{path}'")]
    DatabaseNotFound { path: PathBuf },

    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // === Issue Errors ===
    /// Issue with the specified ID was not found.
    #[error("Issue not found: {id}")]
    NotFound { id: String },

    /// Attempted to create an issue with an ID that already exists.
    #[error("Duplicate issue ID: {id}")]
    DuplicateId { id: String },

    // === Validation Errors ===
    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Invalid status value.
    #[error("Invalid status: {status}")]
    InvalidStatus { status: String },

    /// Invalid issue type value.
    #[error("Invalid issue type: {issue_type}")]
    InvalidType { issue_type: String },

    /// Priority out of valid range (0-4).
    #[error("Priority must be 0-4, got: {priority}")]
    InvalidPriority { priority: i32 },

    // === Import/Export Errors ===
    /// Failed to parse a line in the JSONL file.
    #[error("JSONL parse error at line {line}: {reason}")]
    JsonlParse { line: usize, reason: String },

    /// Issue prefixes don't match the workspace prefix.
    #[error("Prefix mismatch: expected '{expected}', found {counts:?}")]
    PrefixMismatch {
        expected: String,
        /// Offending prefix -> number of records carrying it.
        counts: BTreeMap<String, usize>,
    },

    /// Import found same-id-different-content records that could not be
    /// remapped.
    #[error("Unresolved ID collisions: {ids:?}")]
    CollisionUnresolved { ids: Vec<String> },

    /// Two incoming records share a non-empty external reference.
    #[error("Duplicate external_ref: {external_ref}")]
    DuplicateExternalRef { external_ref: String },

    // === Dependency Errors ===
    /// Adding the dependency would create a blocks-cycle.
    #[error("Cycle detected in dependencies: {path}")]
    CycleDetected { path: String },

    /// Self-referential dependency.
    #[error("Issue cannot depend on itself: {id}")]
    SelfDependency { id: String },

    // === Daemon Errors ===
    /// RPC transport failure or timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The daemon serves a different database than the client expected.
    #[error("Database mismatch: daemon serves '{actual}', client expected '{expected}'")]
    DatabaseMismatch { expected: String, actual: String },

    /// Client and daemon versions are incompatible.
    #[error("Version incompatible: daemon {daemon}, client {client}")]
    VersionIncompatible { daemon: String, client: String },

    /// The workspace is claimed by an external exclusive lock.
    #[error("Workspace exclusively locked by {holder}")]
    ExclusiveLockHeld { holder: String },

    /// Another daemon already owns the workspace.
    #[error("Daemon already running for workspace '{workspace}'")]
    DaemonRunning { workspace: PathBuf },

    // === Configuration Errors ===
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Beads workspace not initialized.
    #[error("Beads not initialized: run 'bd init' first")]
    NotInitialized,

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BeadsError {
    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseNotFound { .. }
                | Self::NotInitialized
                | Self::NotFound { .. }
                | Self::Validation { .. }
                | Self::InvalidStatus { .. }
                | Self::InvalidType { .. }
                | Self::InvalidPriority { .. }
                | Self::PrefixMismatch { .. }
                | Self::CollisionUnresolved { .. }
                | Self::DuplicateExternalRef { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run: bd init"),
            Self::DatabaseNotFound { .. } => Some("Check path or run: bd init"),
            Self::PrefixMismatch { .. } => {
                Some("Re-run with --rename-on-import to rewrite ids, or --skip-prefix-validation")
            }
            Self::CollisionUnresolved { .. } => {
                Some("Re-run with --resolve-collisions to remap colliding ids")
            }
            Self::DuplicateExternalRef { .. } => {
                Some("Re-run with --clear-duplicate-external-refs")
            }
            Self::CycleDetected { .. } => Some("Remove one dependency to break the cycle"),
            Self::SelfDependency { .. } => Some("An issue cannot depend on itself"),
            Self::InvalidPriority { .. } => {
                Some("Use a priority between 0 (critical) and 4 (backlog)")
            }
            Self::InvalidStatus { .. } => {
                Some("Valid statuses: open, in_progress, blocked, closed")
            }
            Self::InvalidType { .. } => Some("Valid types: task, bug, feature, epic, chore"),
            Self::VersionIncompatible { .. } => Some("Upgrade the bd client"),
            _ => None,
        }
    }
}

/// Result type using `BeadsError`.
pub type Result<T> = std::result::Result<T, BeadsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BeadsError::NotFound {
            id: "bd-abc123".to_string(),
        };
        assert_eq!(err.to_string(), "Issue not found: bd-abc123");
    }

    #[test]
    fn validation_error() {
        let err = BeadsError::validation("title", "cannot be empty");
        assert_eq!(err.to_string(), "Validation failed: title: cannot be empty");
    }

    #[test]
    fn prefix_mismatch_carries_counts() {
        let mut counts = BTreeMap::new();
        counts.insert("other".to_string(), 3);
        let err = BeadsError::PrefixMismatch {
            expected: "bd".to_string(),
            counts,
        };
        assert!(err.to_string().contains("other"));
        assert!(err.is_user_recoverable());
    }

    #[test]
    fn suggestions() {
        assert_eq!(
            BeadsError::NotInitialized.suggestion(),
            Some("Run: bd init")
        );
        assert!(
            BeadsError::CollisionUnresolved { ids: vec![] }
                .suggestion()
                .is_some()
        );
    }
}
