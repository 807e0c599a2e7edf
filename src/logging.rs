//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Initialize logging to stderr.
///
/// Precedence: `RUST_LOG` when set, then `BD_DEBUG` (non-empty enables
/// debug), then the verbosity flags.
pub fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose || bd_debug_enabled() {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("beads={default_level}")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// True when `BD_DEBUG` is set to a non-empty value.
#[must_use]
pub fn bd_debug_enabled() -> bool {
    std::env::var("BD_DEBUG").is_ok_and(|v| !v.is_empty())
}
