use beads::cli::{Cli, Commands, commands};
use beads::logging::init_logging;
use clap::Parser;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Init {
            prefix,
            sync_branch,
            force,
        } => commands::init::execute(prefix, sync_branch.as_deref(), *force),
        Commands::Daemon => commands::daemon_cmd::run(),
        Commands::Status => commands::daemon_cmd::status(),
        Commands::Stop => commands::daemon_cmd::stop(),
        Commands::Sync => commands::sync_cmd::sync(),
        Commands::Import(args) => commands::sync_cmd::import(args),
        Commands::Export { force } => commands::sync_cmd::export(*force),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        if let Some(hint) = e.suggestion() {
            eprintln!("hint: {hint}");
        }
        std::process::exit(1);
    }
}
