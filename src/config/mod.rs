//! Workspace discovery and configuration.
//!
//! A workspace is a directory whose `.beads/` subdirectory holds the
//! database, the canonical JSONL log, and the daemon endpoint for that
//! repository.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BeadsError, Result};
use crate::storage::{SqliteStorage, Storage};

/// Name of the workspace marker directory.
pub const BEADS_DIR: &str = ".beads";
/// Database file name inside `.beads/`.
pub const DB_FILE: &str = "beads.db";
/// Canonical JSONL log file name inside `.beads/`.
pub const JSONL_FILE: &str = "issues.jsonl";
/// Daemon endpoint file name inside `.beads/`.
pub const SOCKET_FILE: &str = "bd.sock";
/// Daemon singleton lock file name inside `.beads/`.
pub const LOCK_FILE: &str = "daemon.lock";
/// External exclusive-lock claim file name inside `.beads/`.
pub const EXCLUSIVE_LOCK_FILE: &str = ".exclusive-lock";

/// Config key holding the workspace issue prefix.
pub const CONFIG_ISSUE_PREFIX: &str = "issue_prefix";
/// Config key holding the VCS branch the log syncs through, when set.
pub const CONFIG_SYNC_BRANCH: &str = "sync.branch";
/// Environment variable seeding [`CONFIG_SYNC_BRANCH`].
pub const ENV_SYNC_BRANCH: &str = "BEADS_SYNC_BRANCH";

/// Resolved filesystem layout for one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    /// Directory containing `.beads/`.
    pub root: PathBuf,
    /// The `.beads/` directory itself.
    pub beads_dir: PathBuf,
}

impl WorkspacePaths {
    /// Build the layout for a workspace root.
    #[must_use]
    pub fn for_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            beads_dir: root.join(BEADS_DIR),
        }
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.beads_dir.join(DB_FILE)
    }

    #[must_use]
    pub fn jsonl_path(&self) -> PathBuf {
        self.beads_dir.join(JSONL_FILE)
    }

    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.beads_dir.join(SOCKET_FILE)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.beads_dir.join(LOCK_FILE)
    }

    #[must_use]
    pub fn exclusive_lock_path(&self) -> PathBuf {
        self.beads_dir.join(EXCLUSIVE_LOCK_FILE)
    }
}

/// Discover the workspace by walking up from `start` looking for `.beads/`.
///
/// # Errors
///
/// Returns `NotInitialized` if no `.beads` directory is found.
pub fn discover_workspace(start: Option<&Path>) -> Result<WorkspacePaths> {
    let start = match start {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let mut current = if start.is_absolute() {
        start
    } else {
        std::env::current_dir()?.join(start)
    };

    loop {
        let candidate = current.join(BEADS_DIR);
        if candidate.is_dir() {
            return Ok(WorkspacePaths::for_root(&current));
        }
        if !current.pop() {
            return Err(BeadsError::NotInitialized);
        }
    }
}

/// Canonicalize a workspace root for use as a cache key.
///
/// Falls back to the raw path when canonicalization fails (e.g. the
/// directory vanished mid-request).
#[must_use]
pub fn canonical_root(root: &Path) -> PathBuf {
    root.canonicalize().unwrap_or_else(|_| root.to_path_buf())
}

/// Initialize a new workspace at `root` with the given issue prefix and
/// optional sync branch (the CLI seeds the branch from
/// `BEADS_SYNC_BRANCH`).
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the database
/// cannot be opened.
pub fn init_workspace(
    root: &Path,
    prefix: &str,
    sync_branch: Option<&str>,
    force: bool,
) -> Result<WorkspacePaths> {
    let paths = WorkspacePaths::for_root(root);

    if paths.beads_dir.is_dir() && !force {
        let db = paths.db_path();
        if db.exists() {
            return Err(BeadsError::Config(format!(
                "Already initialized at '{}'",
                paths.beads_dir.display()
            )));
        }
    }

    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err(BeadsError::validation(
            "prefix",
            format!("'{prefix}' must be non-empty alphanumeric"),
        ));
    }

    fs::create_dir_all(&paths.beads_dir)?;

    let mut storage = SqliteStorage::open(&paths.db_path())?;
    storage.set_config(CONFIG_ISSUE_PREFIX, prefix)?;
    if let Some(branch) = sync_branch.map(str::trim).filter(|b| !b.is_empty()) {
        storage.set_config(CONFIG_SYNC_BRANCH, branch)?;
    }

    tracing::info!(
        root = %paths.root.display(),
        prefix,
        sync_branch = ?sync_branch,
        "initialized beads workspace"
    );

    Ok(paths)
}

/// Open the workspace storage, creating the schema if needed.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub fn open_storage(paths: &WorkspacePaths) -> Result<SqliteStorage> {
    if !paths.beads_dir.is_dir() {
        return Err(BeadsError::NotInitialized);
    }
    SqliteStorage::open(&paths.db_path())
}

/// Read the configured issue prefix, defaulting to `bd`.
///
/// # Errors
///
/// Returns an error if the config read fails.
pub fn issue_prefix(storage: &dyn Storage) -> Result<String> {
    Ok(storage
        .get_config(CONFIG_ISSUE_PREFIX)?
        .unwrap_or_else(|| "bd".to_string()))
}

/// Read the configured sync branch, when one was set.
///
/// # Errors
///
/// Returns an error if the config read fails.
pub fn sync_branch(storage: &dyn Storage) -> Result<Option<String>> {
    storage.get_config(CONFIG_SYNC_BRANCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn discover_walks_up() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("project");
        let nested = root.join("src/deep");
        fs::create_dir_all(root.join(BEADS_DIR)).unwrap();
        fs::create_dir_all(&nested).unwrap();

        let paths = discover_workspace(Some(&nested)).unwrap();
        assert_eq!(paths.root, root);
        assert_eq!(paths.beads_dir, root.join(BEADS_DIR));
    }

    #[test]
    fn discover_fails_outside_workspace() {
        let dir = TempDir::new().unwrap();
        let err = discover_workspace(Some(dir.path())).unwrap_err();
        assert!(matches!(err, BeadsError::NotInitialized));
    }

    #[test]
    fn init_creates_layout_and_prefix() {
        let dir = TempDir::new().unwrap();
        let paths = init_workspace(dir.path(), "proj", None, false).unwrap();
        assert!(paths.db_path().exists());

        let storage = open_storage(&paths).unwrap();
        assert_eq!(issue_prefix(&storage).unwrap(), "proj");
        assert_eq!(sync_branch(&storage).unwrap(), None);
    }

    #[test]
    fn init_persists_sync_branch() {
        let dir = TempDir::new().unwrap();
        let paths = init_workspace(dir.path(), "proj", Some("beads-sync"), false).unwrap();
        let storage = open_storage(&paths).unwrap();
        assert_eq!(
            sync_branch(&storage).unwrap().as_deref(),
            Some("beads-sync")
        );

        // Blank values are treated as unset.
        let dir = TempDir::new().unwrap();
        let paths = init_workspace(dir.path(), "proj", Some("   "), false).unwrap();
        let storage = open_storage(&paths).unwrap();
        assert_eq!(sync_branch(&storage).unwrap(), None);
    }

    #[test]
    fn init_rejects_double_init() {
        let dir = TempDir::new().unwrap();
        init_workspace(dir.path(), "proj", None, false).unwrap();
        assert!(init_workspace(dir.path(), "proj", None, false).is_err());
        assert!(init_workspace(dir.path(), "proj", None, true).is_ok());
    }

    #[test]
    fn init_rejects_bad_prefix() {
        let dir = TempDir::new().unwrap();
        assert!(init_workspace(dir.path(), "", None, false).is_err());
        assert!(init_workspace(dir.path(), "has space", None, false).is_err());
    }
}
