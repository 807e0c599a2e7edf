//! `bd daemon`, `bd status`, `bd stop`

use serde_json::Value;

use crate::config;
use crate::daemon::{DaemonClient, DaemonOptions, Operation, run_daemon};
use crate::error::{BeadsError, Result};

/// Run the daemon in the foreground until a signal or `shutdown` request.
pub fn run() -> Result<()> {
    let paths = config::discover_workspace(None)?;
    let options = DaemonOptions::from_env();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_daemon(paths, options))
}

/// Print the running daemon's status.
pub fn status() -> Result<()> {
    let paths = config::discover_workspace(None)?;
    let client = DaemonClient::connect(&paths)?;
    let response = client.call(Operation::Status, Value::Null, "cli")?;
    match response.data {
        Some(data) if response.success => {
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
        _ => Err(BeadsError::Transport(
            response.error.unwrap_or_else(|| "no status".to_string()),
        )),
    }
}

/// Request a graceful shutdown.
pub fn stop() -> Result<()> {
    let paths = config::discover_workspace(None)?;
    let client = DaemonClient::connect(&paths)?;
    let response = client.call(Operation::Shutdown, Value::Null, "cli")?;
    if response.success {
        println!("daemon stopping");
        Ok(())
    } else {
        Err(BeadsError::Transport(
            response.error.unwrap_or_else(|| "shutdown failed".to_string()),
        ))
    }
}
