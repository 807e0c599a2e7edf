//! The RPC server: endpoint lifecycle, connection admission, framing,
//! and the per-request pipeline.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::{WorkspacePaths, canonical_root};
use crate::daemon::cache::StorageCache;
use crate::daemon::handlers;
use crate::daemon::lifecycle::{
    DaemonLock, ExclusiveLockState, check_exclusive_lock, cleanup_runtime_files,
};
use crate::daemon::metrics::Metrics;
use crate::daemon::mutations::MutationBus;
use crate::daemon::protocol::{
    Operation, PROTOCOL_VERSION, RpcRequest, RpcResponse, versions_compatible,
};
use crate::daemon::DaemonOptions;
use crate::error::{BeadsError, Result};
use crate::storage::Storage;
use crate::sync::auto::{AutoImportGuard, AutoImportOutcome, maybe_auto_import};
use crate::sync::export::{ExportOptions, auto_flush, export_to_jsonl};

/// Probe window for deciding a leftover socket file is stale.
const STALE_SOCKET_PROBE: Duration = Duration::from_millis(500);
/// Cache sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Storage health probe deadline.
const HEALTH_DEADLINE: Duration = Duration::from_secs(1);
/// Quiet window before a mutation burst is flushed to the log.
const FLUSH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Shared state for the server instance. No file-scope globals: init on
/// startup, torn down on stop.
pub struct ServerState {
    pub workspace: WorkspacePaths,
    pub options: DaemonOptions,
    pub cache: StorageCache,
    pub metrics: Arc<Metrics>,
    pub mutations: MutationBus,
    pub auto_import: AutoImportGuard,
    pub start_time: Instant,
    pub last_activity: Mutex<Instant>,
    pub shutdown: Notify,
    stopping: AtomicBool,
}

/// Run the daemon for one workspace until shutdown.
///
/// # Errors
///
/// Returns an error when another daemon owns the workspace or the
/// endpoint cannot be established.
pub async fn run_daemon(workspace: WorkspacePaths, options: DaemonOptions) -> Result<()> {
    let lock = DaemonLock::acquire(&workspace)?;

    let metrics = Arc::new(Metrics::new());
    let (mutations, mutation_rx) =
        MutationBus::new(options.mutation_buffer, options.mutation_ring, Arc::clone(&metrics));

    let state = Arc::new(ServerState {
        cache: StorageCache::new(options.cache_options(), Arc::clone(&metrics)),
        metrics,
        mutations,
        auto_import: AutoImportGuard::new(),
        start_time: Instant::now(),
        last_activity: Mutex::new(Instant::now()),
        shutdown: Notify::new(),
        stopping: AtomicBool::new(false),
        workspace: workspace.clone(),
        options: options.clone(),
    });

    let listener = match bind_endpoint(&workspace).await {
        Ok(listener) => listener,
        Err(e) => {
            lock.release();
            return Err(e);
        }
    };

    info!(
        socket = %workspace.socket_path().display(),
        version = PROTOCOL_VERSION,
        "daemon listening"
    );
    println!("READY");

    let semaphore = Arc::new(Semaphore::new(options.max_conns));

    // Mutation-driven log flusher.
    spawn_flusher(Arc::clone(&state), mutation_rx);

    // Periodic cache sweep (TTL + memory pressure).
    let sweep_state = Arc::clone(&state);
    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await; // the immediate first tick
        loop {
            interval.tick().await;
            sweep_state.cache.sweep();
        }
    });

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        match Arc::clone(&semaphore).try_acquire_owned() {
                            Ok(permit) => {
                                state.metrics.connection_accepted();
                                let conn_state = Arc::clone(&state);
                                tokio::spawn(async move {
                                    handle_connection(stream, conn_state).await;
                                    drop(permit);
                                });
                            }
                            Err(_) => {
                                // At capacity: close immediately, no response.
                                state.metrics.connection_rejected();
                                drop(stream);
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                }
            }
            () = state.shutdown.notified() => {
                info!("shutdown requested");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
                break;
            }
        }
    }

    // Idempotent stop.
    if !state.stopping.swap(true, Ordering::SeqCst) {
        sweeper.abort();
        state.cache.drain();
        drop(listener);
        cleanup_runtime_files(&workspace);
        lock.release();
        info!("daemon stopped");
    }
    Ok(())
}

/// Bind the unix socket, refusing to evict a live peer.
async fn bind_endpoint(workspace: &WorkspacePaths) -> Result<UnixListener> {
    let socket_path = workspace.socket_path();
    std::fs::create_dir_all(&workspace.beads_dir)?;

    if socket_path.exists() {
        let probe = tokio::time::timeout(
            STALE_SOCKET_PROBE,
            UnixStream::connect(&socket_path),
        )
        .await;
        match probe {
            Ok(Ok(_)) => {
                return Err(BeadsError::DaemonRunning {
                    workspace: workspace.root.clone(),
                });
            }
            _ => {
                debug!(socket = %socket_path.display(), "removing stale endpoint");
                std::fs::remove_file(&socket_path)?;
            }
        }
    }

    let listener = UnixListener::bind(&socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600));
    }

    Ok(listener)
}

/// Consume mutation events and flush dirty issues to the log after each
/// burst settles. Deletes force a full export: they leave no dirty flag,
/// but the log must drop the record.
fn spawn_flusher(
    state: Arc<ServerState>,
    mut rx: tokio::sync::mpsc::Receiver<crate::daemon::protocol::MutationEvent>,
) {
    tokio::spawn(async move {
        while let Some(first) = rx.recv().await {
            debug!(kind = %first.kind, issue_id = %first.issue_id, "mutation");
            let mut saw_delete = first.kind == "deleted";

            // Debounce: absorb the rest of the burst before writing.
            let settle = tokio::time::sleep(FLUSH_DEBOUNCE);
            tokio::pin!(settle);
            loop {
                tokio::select! {
                    more = rx.recv() => match more {
                        Some(event) => saw_delete |= event.kind == "deleted",
                        None => break,
                    },
                    () = &mut settle => break,
                }
            }

            let flush_state = Arc::clone(&state);
            let result = tokio::task::spawn_blocking(move || {
                let handle = flush_state.cache.get(&flush_state.workspace.root)?;
                let mut guard = handle.lock();
                let storage: &mut dyn Storage = &mut *guard;
                let jsonl_path = flush_state.workspace.jsonl_path();
                if saw_delete {
                    export_to_jsonl(storage, &jsonl_path, &ExportOptions { force: true })
                        .map(|outcome| outcome.exported_count)
                } else {
                    auto_flush(storage, &jsonl_path).map(|outcome| outcome.exported_count)
                }
            })
            .await;

            match result {
                Ok(Ok(count)) => debug!(exported = count, "log flush complete"),
                Ok(Err(e)) => warn!(error = %e, "log flush failed"),
                Err(e) => warn!(error = %e, "log flush task failed"),
            }
        }
    });
}

/// One connection: serial request/response loop with read and write
/// deadlines.
async fn handle_connection(stream: UnixStream, state: Arc<ServerState>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::time::timeout(state.options.request_timeout, reader.read_line(&mut line))
            .await;
        match read {
            Err(_) => {
                debug!("read deadline exceeded; closing connection");
                return;
            }
            Ok(Ok(0)) => return, // client closed
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "read failed");
                return;
            }
        }
        if line.trim().is_empty() {
            continue;
        }
        if line.len() > crate::daemon::protocol::MAX_LINE_BYTES {
            let _ = write_half
                .write_all(b"{\"success\":false,\"error\":\"request too large\"}\n")
                .await;
            return;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => process_request(&state, request).await,
            Err(e) => RpcResponse::err(format!("invalid request: {e}")),
        };

        let mut payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "response serialization failed");
                return;
            }
        };
        payload.push('\n');

        let wrote = tokio::time::timeout(
            state.options.request_timeout,
            write_half.write_all(payload.as_bytes()),
        )
        .await;
        match wrote {
            Ok(Ok(())) => {}
            _ => {
                debug!("write failed or deadline exceeded; closing connection");
                return;
            }
        }
    }
}

/// The per-request pipeline: metrics, binding, version, exclusive lock,
/// auto-import, dispatch, mutation fan-out.
async fn process_request(state: &Arc<ServerState>, request: RpcRequest) -> RpcResponse {
    let operation = request.operation;
    let started = Instant::now();
    let response = process_inner(state, &request).await;
    state
        .metrics
        .record(operation.as_str(), started.elapsed(), response.success);
    response
}

async fn process_inner(state: &Arc<ServerState>, request: &RpcRequest) -> RpcResponse {
    let operation = request.operation;

    // Database binding: a client must never mutate a workspace it did not
    // resolve itself.
    if !operation.skips_binding_check() && !request.expected_db.is_empty() {
        let expected = canonical_root(Path::new(&request.expected_db));
        let actual = canonical_root(&state.workspace.db_path());
        if expected != actual {
            return RpcResponse::err(
                BeadsError::DatabaseMismatch {
                    expected: expected.display().to_string(),
                    actual: actual.display().to_string(),
                }
                .to_string(),
            );
        }
    }

    if !operation.skips_version_check()
        && !request.client_version.is_empty()
        && !versions_compatible(PROTOCOL_VERSION, &request.client_version)
    {
        return RpcResponse::err(
            BeadsError::VersionIncompatible {
                daemon: PROTOCOL_VERSION.to_string(),
                client: request.client_version.clone(),
            }
            .to_string(),
        );
    }

    // Honor an external exclusive-lock claim for storage-touching work.
    if touches_storage(operation) {
        if let ExclusiveLockState::Held { holder } = check_exclusive_lock(&state.workspace) {
            let mut response =
                RpcResponse::err(BeadsError::ExclusiveLockHeld { holder }.to_string());
            response.data = Some(json!({"skipped": true}));
            return response;
        }
    }

    if !operation.skips_auto_import() {
        run_auto_import_hook(state);
    }

    *state.last_activity.lock() = Instant::now();

    if operation == Operation::Health {
        return handle_health(state).await;
    }

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        handlers::dispatch(state, operation, &request.args, &request.actor)
    }));

    match outcome {
        Ok(Ok(data)) => RpcResponse::ok(data),
        Ok(Err(e)) => RpcResponse::err(e.to_string()),
        Err(_) => {
            error!(operation = %operation, "handler panicked");
            RpcResponse::err("internal error")
        }
    }
}

const fn touches_storage(operation: Operation) -> bool {
    !matches!(
        operation,
        Operation::Ping
            | Operation::Health
            | Operation::Metrics
            | Operation::Status
            | Operation::GetMutations
            | Operation::Shutdown
    )
}

/// Staleness hook: failures are logged, never surfaced to the request.
/// When the import remapped ids, the log is rewritten by a detached
/// export so the triggering request is not stalled.
fn run_auto_import_hook(state: &Arc<ServerState>) {
    let handle = match state.cache.get(&state.workspace.root) {
        Ok(handle) => handle,
        Err(e) => {
            warn!(error = %e, "auto-import skipped: storage unavailable");
            return;
        }
    };

    let outcome = {
        let mut guard = handle.lock();
        let storage: &mut dyn Storage = &mut *guard;
        maybe_auto_import(storage, &state.workspace.jsonl_path(), &state.auto_import)
    };

    if let AutoImportOutcome::Imported {
        needs_export: true, ..
    } = outcome
    {
        let export_state = Arc::clone(state);
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                let handle = export_state.cache.get(&export_state.workspace.root)?;
                let mut guard = handle.lock();
                let storage: &mut dyn Storage = &mut *guard;
                // The log still carries the pre-remap ids, so the stale-db
                // guard would refuse; the remap is exactly what this export
                // is meant to publish.
                export_to_jsonl(
                    storage,
                    &export_state.workspace.jsonl_path(),
                    &ExportOptions { force: true },
                )
            })
            .await;
            match result {
                Ok(Ok(outcome)) => {
                    info!(exported = outcome.exported_count, "deferred export complete");
                }
                Ok(Err(e)) => warn!(error = %e, "deferred export failed"),
                Err(e) => warn!(error = %e, "deferred export task failed"),
            }
        });
    }
}

/// Storage health probe under a deadline: healthy under 500 ms, degraded
/// under the deadline, unhealthy on error or timeout.
async fn handle_health(state: &Arc<ServerState>) -> RpcResponse {
    let probe_state = Arc::clone(state);
    let probe = tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let handle = probe_state.cache.get(&probe_state.workspace.root)?;
        let guard = handle.lock();
        let storage: &dyn Storage = &*guard;
        storage.get_metadata("health_probe")?;
        Ok::<Duration, BeadsError>(started.elapsed())
    });

    let verdict = match tokio::time::timeout(HEALTH_DEADLINE, probe).await {
        Ok(Ok(Ok(elapsed))) => {
            let status = if elapsed < Duration::from_millis(500) {
                "healthy"
            } else {
                "degraded"
            };
            (status, Some(elapsed))
        }
        Ok(Ok(Err(_))) | Ok(Err(_)) | Err(_) => ("unhealthy", None),
    };

    let snapshot = state.metrics.snapshot();
    RpcResponse::ok(json!({
        "status": verdict.0,
        "probe_ms": verdict.1.map(|d| d.as_secs_f64() * 1000.0),
        "cached_workspaces": state.cache.len(),
        "connections_accepted": snapshot.connections_accepted,
        "connections_rejected": snapshot.connections_rejected,
        "memory_rss_mb": crate::daemon::cache::process_rss_mb(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}
