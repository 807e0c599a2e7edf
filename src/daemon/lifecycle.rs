//! Daemon lifecycle: singleton lock, external exclusive-lock file, and
//! shutdown cleanup.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::config::WorkspacePaths;
use crate::error::{BeadsError, Result};

/// Advisory singleton lock on `<workspace>/.beads/daemon.lock`.
///
/// Held for the daemon's lifetime; the OS releases the flock if the
/// process dies, so a crashed daemon never wedges the workspace.
#[derive(Debug)]
pub struct DaemonLock {
    // Held to keep the exclusive flock; released on drop.
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl DaemonLock {
    /// Acquire the lock, writing this process's pid into the file.
    ///
    /// # Errors
    ///
    /// Returns `DaemonRunning` when another daemon holds the lock.
    pub fn acquire(paths: &WorkspacePaths) -> Result<Self> {
        fs::create_dir_all(&paths.beads_dir)?;

        // Avoid truncating before the lock is held: that would wipe the
        // running daemon's pid.
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(paths.lock_path())?;

        file.try_lock_exclusive()
            .map_err(|_| BeadsError::DaemonRunning {
                workspace: paths.root.clone(),
            })?;

        let mut file = file;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        Ok(Self {
            file,
            path: paths.lock_path(),
        })
    }

    /// Remove the lock file. The flock itself releases on drop.
    pub fn release(self) {
        let path = self.path.clone();
        drop(self);
        let _ = fs::remove_file(path);
    }
}

/// Contents of `<workspace>/.beads/.exclusive-lock`, written by an
/// external tool to claim sole ownership of the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusiveLock {
    pub holder: String,
    pub pid: u32,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Why the daemon is honoring (or cleared) an exclusive-lock file.
#[derive(Debug, PartialEq, Eq)]
pub enum ExclusiveLockState {
    /// No claim present.
    Absent,
    /// A live claim; requests must be skipped with an advisory error.
    Held { holder: String },
    /// A dead local holder's file was removed; service resumes.
    Cleared,
}

/// Inspect the exclusive-lock file per request.
///
/// A valid claim by a live process on this host is honored. A claim by a
/// dead local process is removed. Malformed files fail safe: the claim is
/// honored as unknown.
#[must_use]
pub fn check_exclusive_lock(paths: &WorkspacePaths) -> ExclusiveLockState {
    let lock_path = paths.exclusive_lock_path();
    let contents = match fs::read_to_string(&lock_path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return ExclusiveLockState::Absent;
        }
        Err(e) => {
            tracing::warn!(error = %e, "exclusive lock unreadable; failing safe");
            return ExclusiveLockState::Held {
                holder: "unknown".to_string(),
            };
        }
    };

    let lock: ExclusiveLock = match serde_json::from_str(&contents) {
        Ok(lock) => lock,
        Err(e) => {
            tracing::warn!(error = %e, "malformed exclusive lock; failing safe");
            return ExclusiveLockState::Held {
                holder: "unknown".to_string(),
            };
        }
    };

    let local = lock.hostname.is_empty()
        || lock.hostname.eq_ignore_ascii_case(&local_hostname());

    if !local {
        // Cross-host claims cannot be liveness-checked; honor them.
        return ExclusiveLockState::Held {
            holder: lock.holder,
        };
    }

    if process_alive(lock.pid) {
        ExclusiveLockState::Held {
            holder: lock.holder,
        }
    } else {
        tracing::info!(
            holder = %lock.holder,
            pid = lock.pid,
            "removing exclusive lock held by dead process"
        );
        let _ = fs::remove_file(&lock_path);
        ExclusiveLockState::Cleared
    }
}

/// Liveness probe without signaling: the proc filesystem entry exists
/// exactly while the process does.
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// This host's name, for exclusive-lock matching.
#[must_use]
pub fn local_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Remove daemon-owned runtime files. The exclusive-lock file is never
/// touched: it belongs to the external tool that wrote it.
pub fn cleanup_runtime_files(paths: &WorkspacePaths) {
    for path in [paths.socket_path(), paths.lock_path()] {
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "cleanup failed");
            }
        }
    }
}
