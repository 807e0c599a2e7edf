//! The per-workspace daemon: RPC server, storage cache, telemetry, and
//! lifecycle management.

pub mod cache;
pub mod client;
pub mod handlers;
pub mod lifecycle;
pub mod metrics;
pub mod mutations;
pub mod protocol;
pub mod server;

pub use cache::{CacheOptions, StorageCache, StorageHandle};
pub use client::DaemonClient;
pub use lifecycle::{DaemonLock, ExclusiveLockState, check_exclusive_lock};
pub use metrics::{Metrics, MetricsSnapshot};
pub use mutations::MutationBus;
pub use protocol::{Operation, PROTOCOL_VERSION, RpcRequest, RpcResponse};
pub use server::run_daemon;

use std::time::Duration;

use crate::util::parse_duration;

/// Server tunables, read from the environment.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// `BEADS_DAEMON_MAX_CACHE_SIZE`
    pub max_cache_size: usize,
    /// `BEADS_DAEMON_CACHE_TTL`
    pub cache_ttl: Duration,
    /// `BEADS_DAEMON_MAX_CONNS`
    pub max_conns: usize,
    /// `BEADS_DAEMON_REQUEST_TIMEOUT`
    pub request_timeout: Duration,
    /// `BEADS_DAEMON_MEMORY_THRESHOLD_MB`
    pub memory_threshold_mb: u64,
    /// `BEADS_MUTATION_BUFFER`
    pub mutation_buffer: usize,
    /// Ring-buffer size for `get_mutations` polling.
    pub mutation_ring: usize,
    /// `BEADS_SYNC_BRANCH`; fallback when the workspace config has no
    /// `sync.branch` entry.
    pub sync_branch: Option<String>,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            max_cache_size: 50,
            cache_ttl: Duration::from_secs(30 * 60),
            max_conns: 100,
            request_timeout: Duration::from_secs(30),
            memory_threshold_mb: 500,
            mutation_buffer: mutations::DEFAULT_BUFFER,
            mutation_ring: mutations::DEFAULT_RING,
            sync_branch: None,
        }
    }
}

impl DaemonOptions {
    /// Load options from the environment, keeping defaults for unset or
    /// unparseable values.
    #[must_use]
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Some(v) = env_usize("BEADS_DAEMON_MAX_CACHE_SIZE") {
            options.max_cache_size = v;
        }
        if let Some(v) = env_duration("BEADS_DAEMON_CACHE_TTL") {
            options.cache_ttl = v;
        }
        if let Some(v) = env_usize("BEADS_DAEMON_MAX_CONNS") {
            options.max_conns = v;
        }
        if let Some(v) = env_duration("BEADS_DAEMON_REQUEST_TIMEOUT") {
            options.request_timeout = v;
        }
        if let Some(v) = env_usize("BEADS_DAEMON_MEMORY_THRESHOLD_MB") {
            options.memory_threshold_mb = v as u64;
        }
        if let Some(v) = env_usize("BEADS_MUTATION_BUFFER") {
            options.mutation_buffer = v;
        }
        options.sync_branch = std::env::var(crate::config::ENV_SYNC_BRANCH)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        options
    }

    #[must_use]
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            max_size: self.max_cache_size,
            ttl: self.cache_ttl,
            memory_threshold_mb: self.memory_threshold_mb,
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn env_duration(name: &str) -> Option<Duration> {
    parse_duration(&std::env::var(name).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let options = DaemonOptions::default();
        assert_eq!(options.max_cache_size, 50);
        assert_eq!(options.cache_ttl, Duration::from_secs(1800));
        assert_eq!(options.max_conns, 100);
        assert_eq!(options.request_timeout, Duration::from_secs(30));
        assert_eq!(options.memory_threshold_mb, 500);
        assert_eq!(options.mutation_buffer, 512);
        assert_eq!(options.mutation_ring, 100);
        assert_eq!(options.sync_branch, None);
    }
}
