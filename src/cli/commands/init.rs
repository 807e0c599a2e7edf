//! `bd init`

use crate::config;
use crate::error::Result;

pub fn execute(prefix: &str, sync_branch: Option<&str>, force: bool) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let paths = config::init_workspace(&cwd, prefix, sync_branch, force)?;
    println!(
        "Initialized beads workspace at {} (prefix '{prefix}')",
        paths.beads_dir.display()
    );
    if let Some(branch) = sync_branch.map(str::trim).filter(|b| !b.is_empty()) {
        println!("Sync branch: {branch}");
    }
    Ok(())
}
