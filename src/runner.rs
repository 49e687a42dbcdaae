//! One polling cycle per watcher.
//!
//! A cycle walks: flush check, fetch and extract, diff (or cold start),
//! urgent-or-windowed send, otherwise defer, then advance the anchor.
//! State is written at two points only: after a successful flush and at the
//! end of a cycle that found new items.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Settings;
use crate::diff;
use crate::error::{LookoutError, Result};
use crate::extract;
use crate::fetch::Fetcher;
use crate::logging::watcher_event;
use crate::message;
use crate::notify::Notifier;
use crate::pending;
use crate::schedule;
use crate::state::StateStore;
use crate::watcher::{LastSeen, Link, WatcherConfig, WatcherState};

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The source had nothing matching the selector (or answered 404)
    NoElements,
    /// Nothing newer than the anchor
    NoNewItems,
    /// New items were sent immediately
    Notified { sent: usize, urgent: bool },
    /// New items went to the pending queue
    Deferred {
        queued: usize,
        pending: usize,
        dropped: usize,
    },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::NoElements => "no_elements",
            CycleOutcome::NoNewItems => "no_new_items",
            CycleOutcome::Notified { .. } => "notified",
            CycleOutcome::Deferred { .. } => "deferred",
        }
    }

    /// New items handled by the cycle
    pub fn items(&self) -> usize {
        match self {
            CycleOutcome::Notified { sent, .. } => *sent,
            CycleOutcome::Deferred { queued, .. } => *queued,
            _ => 0,
        }
    }

    /// Items cut from the pending queue to respect the message limit
    pub fn dropped(&self) -> usize {
        match self {
            CycleOutcome::Deferred { dropped, .. } => *dropped,
            _ => 0,
        }
    }
}

/// What a finished cycle did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub watcher: String,
    /// Pending items delivered by the flush step
    pub flushed: usize,
    #[serde(flatten)]
    pub outcome: CycleOutcome,
    /// Items the diff considered new
    pub new_links: Vec<Link>,
    /// Sends that failed; the cycle still completed
    pub delivery_failures: Vec<String>,
    /// State after the cycle
    pub state: WatcherState,
}

impl CycleReport {
    pub fn delivered_ok(&self) -> bool {
        self.delivery_failures.is_empty()
    }
}

/// Whether `title` starts with any of `keywords`, ignoring case
pub fn is_urgent(title: &str, keywords: &[String]) -> bool {
    let title = title.to_lowercase();
    keywords
        .iter()
        .any(|keyword| !keyword.is_empty() && title.starts_with(&keyword.to_lowercase()))
}

/// Drives watcher cycles against a fetcher and a notification sink
pub struct Runner<'a> {
    fetcher: &'a dyn Fetcher,
    notifier: &'a dyn Notifier,
    settings: &'a Settings,
}

impl<'a> Runner<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, notifier: &'a dyn Notifier, settings: &'a Settings) -> Self {
        Self {
            fetcher,
            notifier,
            settings,
        }
    }

    /// Run one cycle for `watcher` at `now`.
    ///
    /// Fetch and extraction errors other than "no elements" are returned
    /// without touching the stored state. Failed sends do not fail the cycle;
    /// they are listed in `CycleReport::delivery_failures`.
    pub fn run_cycle(
        &self,
        store: &dyn StateStore,
        watcher: &WatcherConfig,
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        let mut state = store.load_state(&watcher.name)?;
        let notify_window =
            schedule::matches(watcher.cron_notification.as_ref(), now, self.settings.timezone);

        let mut report = CycleReport {
            watcher: watcher.name.clone(),
            flushed: 0,
            outcome: CycleOutcome::NoNewItems,
            new_links: Vec::new(),
            delivery_failures: Vec::new(),
            state: WatcherState::default(),
        };

        // Flush deferred items
        if !state.pending.is_empty() && notify_window {
            match self.send(watcher, &state.pending) {
                Ok(()) => {
                    report.flushed = state.pending.len();
                    state.pending.clear();
                    store.save_state(&watcher.name, &state)?;
                    watcher_event!(watcher, INFO, flushed = report.flushed, "flushed pending items");
                }
                Err(e) => {
                    watcher_event!(watcher, ERROR, error = %e, "flush failed, keeping pending items");
                    report.delivery_failures.push(e.to_string());
                }
            }
        }

        let links = match self.fetch_links(watcher) {
            Ok(links) => links,
            Err(e) if e.is_recoverable() => {
                watcher_event!(watcher, WARN, reason = %e, "no elements found");
                report.outcome = CycleOutcome::NoElements;
                report.state = state;
                return Ok(report);
            }
            Err(e) => {
                watcher_event!(watcher, ERROR, error = %e, "cycle failed");
                return Err(e);
            }
        };
        watcher_event!(watcher, DEBUG, extracted = links.len(), "extracted links");

        let fresh = match state.anchor() {
            None => links
                .into_iter()
                .take(self.settings.max_new_items)
                .collect::<Vec<_>>(),
            Some(anchor) => diff::new_links(&links, Some(&anchor), self.settings.max_new_items),
        };

        let Some(newest) = fresh.first() else {
            watcher_event!(watcher, DEBUG, "no new items");
            report.state = state;
            return Ok(report);
        };

        let urgent = fresh
            .iter()
            .any(|link| is_urgent(&link.title, &self.settings.urgent_keywords));

        if urgent || notify_window {
            if let Err(e) = self.send(watcher, &fresh) {
                watcher_event!(watcher, ERROR, error = %e, "notification failed");
                report.delivery_failures.push(e.to_string());
            } else {
                watcher_event!(watcher, INFO, sent = fresh.len(), urgent, "notified");
            }
            report.outcome = CycleOutcome::Notified {
                sent: fresh.len(),
                urgent,
            };
        } else {
            let accumulation = pending::accumulate(
                &fresh,
                &state.pending,
                &message::header(&watcher.name),
                &message::footer(&watcher.url),
                self.settings.message_limit,
            );
            if accumulation.dropped > 0 {
                watcher_event!(
                    watcher,
                    WARN,
                    dropped = accumulation.dropped,
                    "pending queue over message limit, dropped oldest items"
                );
            }
            state.pending = accumulation.kept;
            watcher_event!(watcher, INFO, queued = fresh.len(), pending = state.pending.len(), "deferred");
            report.outcome = CycleOutcome::Deferred {
                queued: fresh.len(),
                pending: state.pending.len(),
                dropped: accumulation.dropped,
            };
        }

        state.last_seen = Some(LastSeen::observe(newest, now));
        store.save_state(&watcher.name, &state)?;

        report.new_links = fresh;
        report.state = state;
        Ok(report)
    }

    fn fetch_links(&self, watcher: &WatcherConfig) -> Result<Vec<Link>> {
        let document = self
            .fetcher
            .fetch(&watcher.url, watcher.source_type(), &watcher.request)?
            .ok_or_else(|| {
                LookoutError::NoElementsFound(format!("{} returned 404", watcher.url))
            })?;
        extract::extract(watcher, &document)
    }

    fn send(&self, watcher: &WatcherConfig, links: &[Link]) -> Result<()> {
        let text = message::render_message(&watcher.name, &watcher.url, links);
        self.notifier.send(&text, watcher.chat_id.as_ref())
    }
}

/// Run `job` over `items` with at most `limit` in flight, results in input order
pub fn run_bounded<T, R, F>(items: &[T], limit: usize, job: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let next = AtomicUsize::new(0);
    let results = Mutex::new(Vec::with_capacity(items.len()));
    let workers = limit.max(1).min(items.len());

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(i) else {
                    break;
                };
                let result = job(item);
                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((i, result));
            });
        }
    });

    let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
    results.sort_by_key(|(i, _)| *i);
    results.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn keywords() -> Vec<String> {
        Settings::default().urgent_keywords
    }

    #[test]
    fn test_urgency_is_prefix_and_case_insensitive() {
        assert!(is_urgent("BREAKING: storm", &keywords()));
        assert!(is_urgent("Urgent call", &keywords()));
        assert!(is_urgent("Ultimă oră: vot", &keywords()));
        assert!(is_urgent("ULTIMA ORA", &keywords()));
        assert!(!is_urgent("Not breaking news", &keywords()));
        assert!(!is_urgent("", &keywords()));
    }

    #[test]
    fn test_empty_keyword_never_matches() {
        assert!(!is_urgent("anything", &[String::new()]));
    }

    #[test]
    fn test_outcome_accessors() {
        let deferred = CycleOutcome::Deferred {
            queued: 2,
            pending: 5,
            dropped: 1,
        };
        assert_eq!(deferred.label(), "deferred");
        assert_eq!(deferred.items(), 2);
        assert_eq!(deferred.dropped(), 1);
        assert_eq!(CycleOutcome::NoElements.items(), 0);
    }

    #[test]
    fn test_run_bounded_preserves_order_and_limit() {
        let items: Vec<u64> = (0..12).collect();
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let results = run_bounded(&items, 3, |n| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5 * (12 - n)));
            active.fetch_sub(1, Ordering::SeqCst);
            n * 10
        });

        assert_eq!(results, (0..12).map(|n| n * 10).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_run_bounded_empty() {
        let results: Vec<u8> = run_bounded(&[] as &[u8], 4, |n| *n);
        assert!(results.is_empty());
    }
}
