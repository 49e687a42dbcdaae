//! Display helpers shared by the commands

use chrono::{DateTime, Utc};
use colored::Colorize;

use lookout::runner::{CycleOutcome, CycleReport};

/// Truncate a string to `max_len` characters, adding "..." when cut
pub fn truncate_str(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len {
        s.to_string()
    } else {
        let cut: String = chars[..max_len.saturating_sub(3)].iter().collect();
        format!("{}...", cut)
    }
}

/// "just now", "5m ago", "3h ago", "2d ago"
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    if secs < 60 {
        "just now".to_string()
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86400)
    }
}

/// One-line colored summary of a cycle
pub fn describe_outcome(report: &CycleReport) -> String {
    let mut line = match &report.outcome {
        CycleOutcome::NoElements => "no elements found".yellow().to_string(),
        CycleOutcome::NoNewItems => "no new items".dimmed().to_string(),
        CycleOutcome::Notified { sent, urgent: true } => {
            format!("sent {} (urgent)", sent).red().bold().to_string()
        }
        CycleOutcome::Notified { sent, .. } => format!("sent {}", sent).green().to_string(),
        CycleOutcome::Deferred {
            queued,
            pending,
            dropped,
        } => {
            let mut s = format!("deferred {} ({} pending)", queued, pending);
            if *dropped > 0 {
                s.push_str(&format!(", dropped {}", dropped));
            }
            s.cyan().to_string()
        }
    };
    if report.flushed > 0 {
        line.push_str(&format!(", flushed {}", report.flushed));
    }
    for failure in &report.delivery_failures {
        line.push_str(&format!(" {}", format!("[delivery failed: {}]", failure).red()));
    }
    line
}
