//! `bd import`, `bd export`

use std::path::PathBuf;

use clap::Args;

use crate::config;
use crate::error::Result;
use crate::storage::Storage;
use crate::sync::auto::{auto_import_options, check_stale};
use crate::sync::export::{ExportOptions, auto_flush, export_to_jsonl};
use crate::sync::import::{ImportOptions, import_from_jsonl};

#[derive(Debug, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct ImportCliArgs {
    /// Log file to import; the workspace log when omitted.
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Classify and report without mutating.
    #[arg(long)]
    pub dry_run: bool,

    /// Rewrite mismatched-prefix ids and their references.
    #[arg(long)]
    pub rename_on_import: bool,

    /// Tolerate prefix mismatches without rewriting.
    #[arg(long)]
    pub skip_prefix_validation: bool,

    /// Remap same-id-different-content records to fresh ids.
    #[arg(long)]
    pub resolve_collisions: bool,

    /// Keep the first of a duplicated external_ref, clear the rest.
    #[arg(long)]
    pub clear_duplicate_external_refs: bool,

    /// Fail the batch on any label/dependency/comment merge failure.
    #[arg(long)]
    pub strict: bool,
}

pub fn import(args: &ImportCliArgs) -> Result<()> {
    let paths = config::discover_workspace(None)?;
    let mut storage = config::open_storage(&paths)?;

    let input = args
        .path
        .clone()
        .unwrap_or_else(|| paths.jsonl_path());
    let options = ImportOptions {
        dry_run: args.dry_run,
        rename_on_import: args.rename_on_import,
        skip_prefix_validation: args.skip_prefix_validation,
        resolve_collisions: args.resolve_collisions,
        clear_duplicate_external_refs: args.clear_duplicate_external_refs,
        strict: args.strict,
    };

    let report = import_from_jsonl(&mut storage, &input, &options)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// One convergence pass: import the log when it is newer than the
/// database, then flush anything dirty back out.
pub fn sync() -> Result<()> {
    let paths = config::discover_workspace(None)?;
    let mut storage = config::open_storage(&paths)?;
    let log = paths.jsonl_path();

    let storage: &mut dyn Storage = &mut storage;
    if log.exists() && check_stale(storage, &log)? {
        let report = import_from_jsonl(storage, &log, &auto_import_options())?;
        println!(
            "Imported: {} created, {} updated, {} unchanged, {} renamed",
            report.created, report.updated, report.unchanged, report.renamed
        );
    }

    let outcome = auto_flush(storage, &log)?;
    if outcome.flushed {
        println!("Exported {} issue(s) to {}", outcome.exported_count, log.display());
    } else {
        println!("Nothing to export");
    }
    Ok(())
}

pub fn export(force: bool) -> Result<()> {
    let paths = config::discover_workspace(None)?;
    let mut storage = config::open_storage(&paths)?;

    let storage: &mut dyn Storage = &mut storage;
    let outcome = export_to_jsonl(storage, &paths.jsonl_path(), &ExportOptions { force })?;
    println!(
        "Exported {} issue(s) to {} ({})",
        outcome.exported_count,
        paths.jsonl_path().display(),
        outcome.content_hash
    );
    Ok(())
}
