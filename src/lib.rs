//! `beads` - a local issue tracker core for agent-driven workflows.
//!
//! Issues live in an embedded `SQLite` database for fast queries and are
//! mirrored to a JSONL log committed to version control. Concurrent
//! clones converge through content-hash reconciliation; a per-workspace
//! daemon fronts the storage over a line-delimited RPC protocol.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod model;
pub mod storage;
pub mod sync;
pub mod util;
pub mod validation;

pub use error::{BeadsError, Result};
