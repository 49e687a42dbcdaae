//! Miscellaneous commands: notify test, doctor, init, completions

use clap::CommandFactory;
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io;

use lookout::cli::{Cli, CompletionShell};
use lookout::config::{Config, NotifyTarget, SAMPLE_CONFIG};
use lookout::db::Database;
use lookout::error::{LookoutError, Result};
use lookout::message::render_message;
use lookout::notify::{Notifier, TargetNotifier};
use lookout::watcher::Link;

/// Send a test message to the default destination or a watcher's override
pub fn cmd_notify_test(watcher: Option<String>) -> Result<()> {
    let config = Config::load()?;
    let Some(target) = config.default_notify.clone() else {
        println!("\nNo notification target configured.");
        println!("Add a [default_notify] section to {}", Config::config_path()?.display());
        return Ok(());
    };

    let (name, url, destination) = match watcher {
        Some(ref name) => {
            let w = config.get_watcher(name)?;
            (w.name.clone(), w.url.clone(), w.chat_id.clone())
        }
        None => ("lookout".to_string(), "https://example.com".to_string(), None),
    };

    println!("\nSending test notification via {}...", target.kind());
    let text = render_message(
        &name,
        &url,
        &[Link::new("Test notification: your lookout setup is working", &url)],
    );

    TargetNotifier::new(Some(target)).send(&text, destination.as_ref())?;
    println!("  Test notification sent successfully!");
    Ok(())
}

pub fn cmd_doctor() -> Result<()> {
    println!("\nlookout doctor\n");
    println!("  lookout binary: v{}", env!("CARGO_PKG_VERSION"));

    let config_path = Config::config_path()?;
    let config = if config_path.exists() {
        match Config::load_from(&config_path) {
            Ok(config) => {
                println!(
                    "  Config: OK ({} watchers, {} active) {}",
                    config.watchers.len(),
                    config.active_watchers().count(),
                    config_path.display().to_string().dimmed()
                );
                Some(config)
            }
            Err(e) => {
                println!("  Config: {} - {}", "ERROR".red(), e);
                None
            }
        }
    } else {
        println!(
            "  Config: not found at {} (run `lookout init`)",
            config_path.display()
        );
        None
    };

    match Database::open() {
        Ok(db) => match db.list_states() {
            Ok(states) => println!("  Database: OK ({} watchers with state)", states.len()),
            Err(e) => println!("  Database: {} - {}", "ERROR".red(), e),
        },
        Err(e) => println!("  Database: {} - {}", "ERROR".red(), e),
    }

    if let Some(config) = config {
        println!("  Time zone: {}", config.settings.timezone.name());
        match config.default_notify {
            Some(NotifyTarget::Telegram { ref chat_id, .. }) => {
                println!("  Notifications: telegram (chat {})", chat_id)
            }
            Some(NotifyTarget::Command { ref command }) => {
                println!("  Notifications: command `{}`", command)
            }
            None => println!("  Notifications: {}", "NOT CONFIGURED".yellow()),
        }

        let unscheduled: Vec<&str> = config
            .active_watchers()
            .filter(|w| w.cron.is_none())
            .map(|w| w.name.as_str())
            .collect();
        if !unscheduled.is_empty() {
            println!(
                "  Note: {} run on every daemon tick (no cron): {}",
                unscheduled.len(),
                unscheduled.join(", ")
            );
        }
    }

    println!();
    Ok(())
}

/// Write the sample configuration
pub fn cmd_init(force: bool) -> Result<()> {
    let path = Config::config_path()?;
    if path.exists() && !force {
        return Err(LookoutError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, SAMPLE_CONFIG)?;

    println!("\n{}", "Wrote sample configuration".bold());
    println!("  {}\n", path.display());
    println!("Next steps:");
    println!("  1. Edit the [[watchers]] entries and [default_notify]");
    println!("  2. lookout test <name>");
    println!("  3. lookout notify test");
    println!("  4. lookout daemon\n");
    Ok(())
}

pub fn cmd_completions(shell: CompletionShell) -> Result<()> {
    let mut cmd = Cli::command();
    let shell = match shell {
        CompletionShell::Bash => Shell::Bash,
        CompletionShell::Zsh => Shell::Zsh,
        CompletionShell::Fish => Shell::Fish,
        CompletionShell::Powershell => Shell::PowerShell,
    };
    generate(shell, &mut cmd, "lookout", &mut io::stdout());
    Ok(())
}
