//! Cycle commands: run, daemon, test

use chrono::{DateTime, Timelike, Utc};
use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lookout::config::Config;
use lookout::db::{CycleRecord, Database};
use lookout::error::{LookoutError, Result};
use lookout::fetch::HttpFetcher;
use lookout::notify::{RecordingNotifier, TargetNotifier};
use lookout::runner::{run_bounded, CycleReport, Runner};
use lookout::schedule::ScheduleTable;
use lookout::state::{MemoryStore, StateStore};
use lookout::watcher::WatcherConfig;

use crate::utils::{describe_outcome, truncate_str};

/// Run a batch of watchers in parallel, each on its own connection, and
/// record every outcome in the history table
fn run_watchers(
    config: &Config,
    watchers: &[&WatcherConfig],
    now: DateTime<Utc>,
) -> Vec<Result<CycleReport>> {
    let fetcher = HttpFetcher::from_settings(&config.settings);
    let notifier = TargetNotifier::new(config.default_notify.clone());
    let runner = Runner::new(&fetcher, &notifier, &config.settings);

    run_bounded(watchers, config.settings.max_concurrency, |watcher| {
        let db = Database::open()?;
        let result = runner.run_cycle(&db, watcher, now);
        if let Err(e) = db.record_cycle(&CycleRecord::from_result(&watcher.name, now, &result)) {
            tracing::warn!(watcher = %watcher.name, error = %e, "could not record cycle");
        }
        result
    })
}

/// Print one line per cycle; returns how many failed or could not deliver
fn print_results(watchers: &[&WatcherConfig], results: &[Result<CycleReport>]) -> usize {
    let mut failures = 0;
    for (watcher, result) in watchers.iter().zip(results) {
        match result {
            Ok(report) => {
                if !report.delivered_ok() {
                    failures += 1;
                }
                println!("  {} {}", watcher.name.bold(), describe_outcome(report));
            }
            Err(e) => {
                failures += 1;
                eprintln!("  {} {}: {}", "[ERROR]".red(), watcher.name, e);
            }
        }
    }
    failures
}

/// Run one cycle for every active watcher, or only the named ones
pub fn cmd_run(names: Vec<String>) -> Result<()> {
    let config = Config::load()?;
    // Migrate once before workers open their own connections
    Database::open()?;

    let selected: Vec<&WatcherConfig> = if names.is_empty() {
        config.active_watchers().collect()
    } else {
        names
            .iter()
            .map(|name| config.get_watcher(name))
            .collect::<Result<_>>()?
    };

    if selected.is_empty() {
        println!("No active watchers. Add one to {}", Config::config_path()?.display());
        return Ok(());
    }

    println!("Running {} watchers...\n", selected.len());
    let results = run_watchers(&config, &selected, Utc::now());
    let failures = print_results(&selected, &results);
    println!("\nDone.");

    if failures > 0 {
        return Err(LookoutError::Notification(format!(
            "{} of {} watchers failed or could not deliver",
            failures,
            selected.len()
        )));
    }
    Ok(())
}

/// Tick once a minute and run the watchers whose cron matches
pub fn cmd_daemon() -> Result<()> {
    let mut config = Config::load()?;
    Database::open()?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\n\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| LookoutError::Config(format!("Failed to set Ctrl+C handler: {}", e)))?;

    let mut table = ScheduleTable::new();
    table.sync(&config.watchers);

    println!("\nlookout daemon starting...\n");
    if table.is_empty() {
        println!("No active watchers yet; config.toml is reloaded every minute.");
    } else {
        println!("Scheduled {} watchers:\n", table.len());
        for watcher in config.active_watchers() {
            let cron = watcher
                .cron
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "every minute".to_string());
            println!("  {} - {}", watcher.name, cron);
        }
    }
    println!("\nPress Ctrl+C to stop.\n");

    while running.load(Ordering::SeqCst) {
        // Sleep to the next minute boundary, one second at a time
        let wait = 60 - Utc::now().second().min(59);
        for _ in 0..wait {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(Duration::from_secs(1));
        }
        if !running.load(Ordering::SeqCst) {
            break;
        }

        match Config::load() {
            Ok(fresh) => {
                let changes = table.sync(&fresh.watchers);
                if !changes.is_empty() {
                    tracing::info!(
                        scheduled = ?changes.scheduled,
                        unscheduled = ?changes.unscheduled,
                        "schedule updated"
                    );
                }
                config = fresh;
            }
            Err(e) => tracing::error!(error = %e, "config reload failed, keeping previous schedule"),
        }

        let now = Utc::now();
        let due: Vec<&WatcherConfig> = table
            .due(now, config.settings.timezone)
            .iter()
            .filter_map(|name| config.get_watcher(name).ok())
            .collect();
        if due.is_empty() {
            continue;
        }

        println!("[{}] running {} watchers", now.format("%H:%M"), due.len());
        let results = run_watchers(&config, &due, now);
        print_results(&due, &results);
    }

    Ok(())
}

/// Dry run: real fetch and extraction against the stored state, nothing
/// persisted and nothing sent
pub fn cmd_test(name: &str, json: bool) -> Result<()> {
    let config = Config::load()?;
    let watcher = config.get_watcher(name)?;
    let db = Database::open()?;
    let stored = db.load_state(&watcher.name)?;

    if !json {
        println!("\nTesting watcher: {}\n", watcher.name);
        println!("  Fetching {}...", watcher.url);
    }

    let store = MemoryStore::new().with_state(&watcher.name, stored.clone());
    let fetcher = HttpFetcher::from_settings(&config.settings);
    let notifier = RecordingNotifier::new();
    let runner = Runner::new(&fetcher, &notifier, &config.settings);
    let report = runner.run_cycle(&store, watcher, Utc::now())?;
    let messages = notifier.sent();

    if json {
        let output = serde_json::json!({
            "report": report,
            "first_run": stored.anchor().is_none(),
            "would_send": messages.iter().map(|m| &m.text).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if stored.anchor().is_none() {
        println!("  No previous state: this run is a cold start.");
    }
    println!("  Outcome: {}", describe_outcome(&report));

    if !report.new_links.is_empty() {
        println!("\n  New items:");
        for (i, link) in report.new_links.iter().enumerate() {
            println!("    {}. {}", i + 1, truncate_str(&link.title, 70));
            println!("       {}", link.url.dimmed());
        }
    }

    for message in &messages {
        println!("\n  Would send ({} chars):\n", message.text.chars().count());
        for line in message.text.lines() {
            println!("    {}", line);
        }
    }

    if !report.state.pending.is_empty() {
        println!("\n  Pending after this cycle: {} items", report.state.pending.len());
    }
    println!("\n  (dry run: state not saved, nothing sent)");

    Ok(())
}
