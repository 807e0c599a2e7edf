//! Subcommand implementations.

pub mod daemon_cmd;
pub mod init;
pub mod sync_cmd;
