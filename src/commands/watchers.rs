//! Watcher inspection commands: list, show, history, reset

use chrono::Utc;
use colored::Colorize;
use inquire::Confirm;
use std::collections::HashMap;

use lookout::config::Config;
use lookout::db::{Database, StoredState};
use lookout::error::{LookoutError, Result};
use lookout::state::StateStore;
use lookout::watcher::SourceType;

use crate::utils::{format_age, truncate_str};

pub fn cmd_list(json: bool) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open()?;
    let states: HashMap<String, StoredState> = db
        .list_states()?
        .into_iter()
        .map(|s| (s.name.clone(), s))
        .collect();

    if json {
        let output: Vec<_> = config
            .watchers
            .iter()
            .map(|w| {
                serde_json::json!({
                    "watcher": w,
                    "state": states.get(&w.name),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if config.watchers.is_empty() {
        println!(
            "No watchers configured. Run `lookout init`, then edit {}",
            Config::config_path()?.display()
        );
        return Ok(());
    }

    println!("\nWatchers:\n");

    let max_name_len = config
        .watchers
        .iter()
        .map(|w| w.name.len())
        .max()
        .unwrap_or(20)
        .min(30);
    let now = Utc::now();

    for watcher in &config.watchers {
        let status = if watcher.is_active {
            "●".green().to_string()
        } else {
            "○".yellow().to_string()
        };
        let kind = match watcher.source_type() {
            SourceType::Api => "api",
            SourceType::Web => "web",
        };
        let cron = watcher
            .cron
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "every tick".to_string());
        let seen = match states.get(&watcher.name) {
            Some(stored) => {
                let pending = stored.state.pending.len();
                let age = format_age(stored.updated_at, now);
                if pending > 0 {
                    format!("{}, {} pending", age, pending)
                } else {
                    age
                }
            }
            None => "never run".dimmed().to_string(),
        };

        println!(
            "  {} {:width$}  {}  {:14}  {}",
            status,
            truncate_str(&watcher.name, 30),
            kind.dimmed(),
            cron,
            seen,
            width = max_name_len
        );
    }
    println!();

    Ok(())
}

pub fn cmd_show(name: &str, json: bool) -> Result<()> {
    let config = Config::load()?;
    let watcher = config.get_watcher(name)?;
    let state = Database::open()?.load_state(&watcher.name)?;

    if json {
        let output = serde_json::json!({ "watcher": watcher, "state": state });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("\n{}\n", watcher.name.bold());
    println!("  URL:          {}", watcher.url);
    println!("  Selector:     {}", watcher.selector);
    println!(
        "  Status:       {}",
        if watcher.is_active {
            "active".green()
        } else {
            "inactive".yellow()
        }
    );
    println!(
        "  Fetch cron:   {}",
        watcher
            .cron
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "every tick".into())
    );
    println!(
        "  Notify cron:  {}",
        watcher
            .cron_notification
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "every cycle".into())
    );
    if let Some(ref chat_id) = watcher.chat_id {
        println!("  Chat:         {}", chat_id);
    }
    for (key, value) in &watcher.request.headers {
        println!("  Header:       {}: {}", key, value);
    }
    for (key, value) in &watcher.request.params {
        println!("  Param:        {}={}", key, value);
    }

    println!();
    match state.last_seen {
        Some(ref seen) if state.anchor().is_some() => {
            println!("  Last seen:    {}", truncate_str(&seen.title, 70));
            println!("                {}", seen.url.dimmed());
            if let Some(at) = seen.observed_at {
                println!("                {}", format_age(at, Utc::now()));
            }
        }
        _ => println!("  Last seen:    {}", "nothing yet (next run is a cold start)".dimmed()),
    }

    if state.pending.is_empty() {
        println!("  Pending:      none");
    } else {
        println!("  Pending:      {} items", state.pending.len());
        for (i, link) in state.pending.iter().enumerate() {
            println!("    {}. {}", i + 1, truncate_str(&link.title, 70));
        }
    }
    println!();

    Ok(())
}

pub fn cmd_history(name: &str, limit: usize, json: bool) -> Result<()> {
    let config = Config::load()?;
    let watcher = config.get_watcher(name)?;
    let cycles = Database::open()?.recent_cycles(&watcher.name, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&cycles)?);
        return Ok(());
    }

    if cycles.is_empty() {
        println!("No cycles recorded for '{}' yet.", watcher.name);
        return Ok(());
    }

    println!("\nHistory for {}:\n", watcher.name.bold());
    for cycle in &cycles {
        let outcome = match cycle.outcome.as_str() {
            "notified" => cycle.outcome.green(),
            "deferred" => cycle.outcome.cyan(),
            "error" => cycle.outcome.red(),
            _ => cycle.outcome.dimmed(),
        };
        let mut line = format!(
            "  {}  {:12}",
            cycle.ran_at.format("%Y-%m-%d %H:%M"),
            outcome
        );
        if cycle.items > 0 {
            line.push_str(&format!("  {} items", cycle.items));
        }
        if cycle.dropped > 0 {
            line.push_str(&format!(", {} dropped", cycle.dropped));
        }
        if let Some(ref detail) = cycle.detail {
            line.push_str(&format!("  {}", truncate_str(detail, 80).dimmed()));
        }
        println!("{}", line);
    }
    println!();

    Ok(())
}

pub fn cmd_reset(name: &str, pending_only: bool, skip_confirm: bool) -> Result<()> {
    let config = Config::load()?;
    let watcher = config.get_watcher(name)?;

    if !skip_confirm {
        let question = if pending_only {
            format!("Drop the pending queue of '{}'?", watcher.name)
        } else {
            format!(
                "Forget everything '{}' has seen? The next run notifies the newest items again.",
                watcher.name
            )
        };
        let confirm = Confirm::new(&question)
            .with_default(false)
            .prompt()
            .map_err(|e| LookoutError::Config(e.to_string()))?;

        if !confirm {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let db = Database::open()?;
    if db.reset_state(&watcher.name, pending_only)? {
        println!("Reset {}.", watcher.name);
    } else {
        println!("'{}' has no stored state.", watcher.name);
    }
    Ok(())
}
