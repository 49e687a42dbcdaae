//! lookout - watch APIs and web pages for new links

use clap::Parser;

use lookout::cli::{Cli, Commands, NotifyCommands};
use lookout::error::Result;
use lookout::logging::init_logging;

mod commands;
mod utils;

fn main() {
    init_logging();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        if let Some(hint) = e.hint() {
            eprintln!("\nHint: {}", hint);
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Cycles
        Commands::Run { watchers } => commands::cmd_run(watchers),
        Commands::Daemon => commands::cmd_daemon(),
        Commands::Test { watcher, json } => commands::cmd_test(&watcher, json),

        // Inspection
        Commands::List { json } => commands::cmd_list(json),
        Commands::Show { watcher, json } => commands::cmd_show(&watcher, json),
        Commands::History {
            watcher,
            limit,
            json,
        } => commands::cmd_history(&watcher, limit, json),
        Commands::Reset {
            watcher,
            pending_only,
            yes,
        } => commands::cmd_reset(&watcher, pending_only, yes),

        // Notification commands
        Commands::Notify(NotifyCommands::Test { watcher }) => commands::cmd_notify_test(watcher),

        // Miscellaneous
        Commands::Doctor => commands::cmd_doctor(),
        Commands::Init { force } => commands::cmd_init(force),
        Commands::Completions { shell } => commands::cmd_completions(shell),
    }
}
