use clap::{Parser, Subcommand, ValueEnum};

/// Shell types for completion generation
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

#[derive(Parser)]
#[command(name = "lookout")]
#[command(author, version, about = "Watch APIs and web pages for new links and batch them into notifications", long_about = None)]
#[command(after_help = r#"Examples:
  lookout init                        Write a sample config.toml
  lookout list                        List configured watchers
  lookout test "rust-blog"            Dry-run one watcher (nothing is sent or saved)
  lookout run                         Run one cycle for every active watcher
  lookout daemon                      Run watchers on their cron schedules

Quick Start:
  1. lookout init
  2. Edit the watchers in the printed config path
  3. lookout notify test
  4. lookout daemon
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one cycle for all active watchers (for cron)
    #[command(after_help = r#"Examples:
  lookout run                         All active watchers
  lookout run -w hn -w rust-blog      Only these watchers
"#)]
    Run {
        /// Only run the named watcher (repeatable)
        #[arg(short, long = "watcher", value_name = "NAME")]
        watchers: Vec<String>,
    },

    /// Run continuously, firing watchers whose cron matches each minute
    Daemon,

    /// Dry-run a watcher: fetch, extract and diff without sending or saving
    Test {
        /// Watcher name
        #[arg(value_name = "NAME")]
        watcher: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured watchers with their stored state
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one watcher's configuration and state
    Show {
        /// Watcher name
        #[arg(value_name = "NAME")]
        watcher: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show cycle history for a watcher
    History {
        /// Watcher name
        #[arg(value_name = "NAME")]
        watcher: String,

        /// Number of cycles to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Forget a watcher's last-seen link and pending queue
    #[command(after_help = r#"Examples:
  lookout reset hn                    Next run is a cold start
  lookout reset hn --pending-only     Drop deferred items, keep the anchor
"#)]
    Reset {
        /// Watcher name
        #[arg(value_name = "NAME")]
        watcher: String,

        /// Only clear the pending queue
        #[arg(long)]
        pending_only: bool,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Notification commands
    #[command(subcommand)]
    Notify(NotifyCommands),

    /// Check configuration, database and notification target
    Doctor,

    /// Write a sample configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    #[command(after_help = r#"Examples:
  lookout completions bash >> ~/.bashrc
  lookout completions zsh >> ~/.zshrc
  lookout completions fish > ~/.config/fish/completions/lookout.fish
"#)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand)]
pub enum NotifyCommands {
    /// Send a test message
    Test {
        /// Use this watcher's chat_id override
        #[arg(short, long = "watcher", value_name = "NAME")]
        watcher: Option<String>,
    },
}
