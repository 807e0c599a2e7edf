//! Blocking RPC client for the workspace daemon.
//!
//! Dials the unix socket, validates liveness with a ping, and retries
//! transient transport failures with a short exponential backoff. Every
//! request carries `expected_db` so a misrouted request raises
//! `DatabaseMismatch` instead of silently mutating the wrong database.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::config::WorkspacePaths;
use crate::daemon::protocol::{Operation, PROTOCOL_VERSION, RpcRequest, RpcResponse};
use crate::error::{BeadsError, Result};

/// Dial timeout before a daemon is declared unreachable.
const DIAL_TIMEOUT: Duration = Duration::from_secs(2);
/// Reconnect backoff schedule.
const BACKOFF: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(200),
    Duration::from_millis(400),
];
/// Slack added over the daemon's request timeout for socket deadlines.
const TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Client handle for one workspace daemon.
pub struct DaemonClient {
    socket_path: PathBuf,
    expected_db: PathBuf,
    io_timeout: Duration,
    stream: Mutex<Option<UnixStream>>,
}

impl DaemonClient {
    /// Connect to the daemon serving `workspace` and validate the
    /// endpoint with a ping before returning.
    ///
    /// A socket file nobody answers on is removed as stale.
    ///
    /// # Errors
    ///
    /// Returns a `Transport` error when no live daemon answers.
    pub fn connect(workspace: &WorkspacePaths) -> Result<Self> {
        Self::connect_with_timeout(workspace, Duration::from_secs(30) + TIMEOUT_SLACK)
    }

    /// Connect with an explicit per-request io timeout.
    ///
    /// # Errors
    ///
    /// Returns a `Transport` error when no live daemon answers.
    pub fn connect_with_timeout(workspace: &WorkspacePaths, io_timeout: Duration) -> Result<Self> {
        let client = Self {
            socket_path: workspace.socket_path(),
            expected_db: workspace.db_path(),
            io_timeout,
            stream: Mutex::new(None),
        };

        let response = client.execute(RpcRequest::new(Operation::Ping))?;
        if !response.success {
            return Err(BeadsError::Transport(format!(
                "daemon ping failed: {}",
                response.error.unwrap_or_default()
            )));
        }
        Ok(client)
    }

    /// Send one request and read its response.
    ///
    /// Transport errors close the connection and retry with backoff
    /// before surfacing.
    ///
    /// # Errors
    ///
    /// Returns a `Transport` error once every reconnect attempt fails.
    pub fn execute(&self, mut request: RpcRequest) -> Result<RpcResponse> {
        request.expected_db = self.expected_db.to_string_lossy().into_owned();
        if request.client_version.is_empty() {
            request.client_version = PROTOCOL_VERSION.to_string();
        }
        let line = serde_json::to_string(&request)?;

        #[allow(clippy::unwrap_used)] // poisoned mutex means a panicked peer thread
        let mut slot = self.stream.lock().unwrap();
        let mut last_error: Option<std::io::Error> = None;

        for (attempt, backoff) in std::iter::once(Duration::ZERO)
            .chain(BACKOFF.into_iter())
            .enumerate()
        {
            if backoff > Duration::ZERO {
                std::thread::sleep(backoff);
            }

            if slot.is_none() {
                match self.dial() {
                    Ok(stream) => *slot = Some(stream),
                    Err(e) => {
                        last_error = Some(e);
                        continue;
                    }
                }
            }

            if let Some(stream) = slot.as_mut() {
                match roundtrip(stream, &line) {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        tracing::debug!(attempt, error = %e, "rpc roundtrip failed; reconnecting");
                        *slot = None;
                        last_error = Some(e);
                    }
                }
            }
        }

        Err(BeadsError::Transport(format!(
            "daemon unreachable at {}: {}",
            self.socket_path.display(),
            last_error.map_or_else(|| "unknown error".to_string(), |e| e.to_string())
        )))
    }

    /// Convenience: run an operation with JSON args.
    ///
    /// # Errors
    ///
    /// Returns a `Transport` error on connection failure.
    pub fn call(&self, operation: Operation, args: Value, actor: &str) -> Result<RpcResponse> {
        let mut request = RpcRequest::new(operation);
        request.args = args;
        request.actor = actor.to_string();
        request.cwd = std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.execute(request)
    }

    fn dial(&self) -> std::io::Result<UnixStream> {
        let deadline = std::time::Instant::now() + DIAL_TIMEOUT;
        loop {
            match UnixStream::connect(&self.socket_path) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.io_timeout))?;
                    stream.set_write_timeout(Some(self.io_timeout))?;
                    return Ok(stream);
                }
                Err(e) => {
                    if e.kind() == std::io::ErrorKind::ConnectionRefused
                        && self.socket_path.exists()
                    {
                        // A refused unix socket is a crashed daemon's
                        // leftover; clean it up for the next start.
                        let _ = std::fs::remove_file(&self.socket_path);
                        return Err(e);
                    }
                    if std::time::Instant::now() >= deadline {
                        return Err(e);
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

fn roundtrip(stream: &mut UnixStream, line: &str) -> std::io::Result<RpcResponse> {
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    let read = reader.read_line(&mut response_line)?;
    if read == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "daemon closed the connection",
        ));
    }
    serde_json::from_str(&response_line)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, WorkspacePaths) {
        let dir = TempDir::new().unwrap();
        let paths = WorkspacePaths::for_root(dir.path());
        std::fs::create_dir_all(&paths.beads_dir).unwrap();
        (dir, paths)
    }

    #[test]
    fn connect_fails_without_daemon() {
        let (_dir, paths) = workspace();
        assert!(DaemonClient::connect_with_timeout(&paths, Duration::from_millis(200)).is_err());
    }

    #[test]
    fn stale_socket_is_removed() {
        let (_dir, paths) = workspace();
        // Bind and immediately drop so the file is left behind with no
        // listener.
        let listener = UnixListener::bind(paths.socket_path()).unwrap();
        drop(listener);
        assert!(paths.socket_path().exists());

        let _ = DaemonClient::connect_with_timeout(&paths, Duration::from_millis(200));
        assert!(!paths.socket_path().exists());
    }

    #[test]
    fn executes_against_inline_server() {
        let (_dir, paths) = workspace();
        let listener = UnixListener::bind(paths.socket_path()).unwrap();

        let server = std::thread::spawn(move || {
            // Serve two requests: the validation ping and the real call.
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut stream = stream;
            for _ in 0..2 {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    break;
                }
                let request: RpcRequest = serde_json::from_str(&line).unwrap();
                assert!(!request.expected_db.is_empty());
                let response = RpcResponse::ok(serde_json::json!({"echo": request.operation}));
                let mut payload = serde_json::to_string(&response).unwrap();
                payload.push('\n');
                stream.write_all(payload.as_bytes()).unwrap();
            }
        });

        let client =
            DaemonClient::connect_with_timeout(&paths, Duration::from_secs(2)).unwrap();
        let response = client
            .call(Operation::Stats, Value::Null, "tester")
            .unwrap();
        assert!(response.success);
        server.join().unwrap();
    }
}
