use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::runner::CycleReport;
use crate::state::StateStore;
use crate::watcher::{LastSeen, Link, WatcherState};

/// How long a connection waits on a lock held by a parallel worker
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Safely convert a Unix timestamp to DateTime<Utc>, falling back to current time if invalid
fn timestamp_to_datetime(timestamp: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

/// A watcher's persisted state with its last write time
#[derive(Debug, Clone, Serialize)]
pub struct StoredState {
    pub name: String,
    #[serde(flatten)]
    pub state: WatcherState,
    pub updated_at: DateTime<Utc>,
}

/// One row of cycle history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleRecord {
    pub id: Uuid,
    pub watcher: String,
    pub ran_at: DateTime<Utc>,
    /// `no_elements`, `no_new_items`, `notified`, `deferred` or `error`
    pub outcome: String,
    /// Links sent or queued in this cycle
    pub items: usize,
    /// Links dropped from the pending queue
    pub dropped: usize,
    pub detail: Option<String>,
}

impl CycleRecord {
    /// Summarise a finished (or failed) cycle for the history table
    pub fn from_result(watcher: &str, ran_at: DateTime<Utc>, result: &Result<CycleReport>) -> Self {
        let (outcome, items, dropped, detail) = match result {
            Ok(report) => {
                let mut notes = Vec::new();
                if report.flushed > 0 {
                    notes.push(format!("flushed {} pending", report.flushed));
                }
                notes.extend(
                    report
                        .delivery_failures
                        .iter()
                        .map(|e| format!("delivery failed: {}", e)),
                );
                let detail = if notes.is_empty() {
                    None
                } else {
                    Some(notes.join("; "))
                };
                (
                    report.outcome.label().to_string(),
                    report.outcome.items(),
                    report.outcome.dropped(),
                    detail,
                )
            }
            Err(e) => ("error".to_string(), 0, 0, Some(e.to_string())),
        };

        Self {
            id: Uuid::new_v4(),
            watcher: watcher.to_string(),
            ran_at,
            outcome,
            items,
            dropped,
            detail,
        }
    }
}

impl Database {
    /// Open or create the database at the configured location
    pub fn open() -> Result<Self> {
        Self::open_at(&Config::db_path()?)
    }

    /// Open or create the database at `db_path`
    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // Run migrations
        embedded::migrations::runner().run(&mut conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        embedded::migrations::runner().run(&mut conn)?;
        Ok(Self { conn })
    }

    // ========== State operations ==========

    /// Clear a watcher's pending queue, and its anchor unless `pending_only`.
    /// Returns false if the watcher has no stored state.
    pub fn reset_state(&self, name: &str, pending_only: bool) -> Result<bool> {
        let sql = if pending_only {
            "UPDATE watcher_state SET pending = '[]', updated_at = ?2 WHERE name = ?1"
        } else {
            "UPDATE watcher_state SET last_seen = NULL, pending = '[]', updated_at = ?2 WHERE name = ?1"
        };
        let changed = self
            .conn
            .execute(sql, params![name, Utc::now().timestamp()])?;
        Ok(changed > 0)
    }

    /// Every stored watcher state, by name
    pub fn list_states(&self) -> Result<Vec<StoredState>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, last_seen, pending, updated_at FROM watcher_state ORDER BY name",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut states = Vec::new();
        for row in rows {
            let (name, last_seen, pending, updated_at) = row?;
            states.push(StoredState {
                name,
                state: decode_state(last_seen, &pending)?,
                updated_at: timestamp_to_datetime(updated_at),
            });
        }

        Ok(states)
    }

    // ========== Cycle history ==========

    pub fn record_cycle(&self, record: &CycleRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cycles (id, watcher, ran_at, outcome, items, dropped, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.watcher,
                record.ran_at.timestamp(),
                record.outcome,
                record.items as i64,
                record.dropped as i64,
                record.detail,
            ],
        )?;
        Ok(())
    }

    /// Most recent cycles for a watcher, newest first
    pub fn recent_cycles(&self, watcher: &str, limit: usize) -> Result<Vec<CycleRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, watcher, ran_at, outcome, items, dropped, detail
             FROM cycles WHERE watcher = ?1 ORDER BY ran_at DESC, rowid DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![watcher, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, watcher, ran_at, outcome, items, dropped, detail) = row?;
            records.push(CycleRecord {
                id: Uuid::parse_str(&id).unwrap_or_default(),
                watcher,
                ran_at: timestamp_to_datetime(ran_at),
                outcome,
                items: items.max(0) as usize,
                dropped: dropped.max(0) as usize,
                detail,
            });
        }

        Ok(records)
    }
}

fn decode_state(last_seen: Option<String>, pending: &str) -> Result<WatcherState> {
    let last_seen: Option<LastSeen> = last_seen
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let pending: Vec<Link> = serde_json::from_str(pending)?;
    Ok(WatcherState { last_seen, pending })
}

impl StateStore for Database {
    fn load_state(&self, watcher: &str) -> Result<WatcherState> {
        let row = self
            .conn
            .query_row(
                "SELECT last_seen, pending FROM watcher_state WHERE name = ?1",
                params![watcher],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            Some((last_seen, pending)) => decode_state(last_seen, &pending),
            None => Ok(WatcherState::default()),
        }
    }

    /// Single-statement upsert, so readers never see a half-written state
    fn save_state(&self, watcher: &str, state: &WatcherState) -> Result<()> {
        self.conn.execute(
            "INSERT INTO watcher_state (name, last_seen, pending, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                last_seen = excluded.last_seen,
                pending = excluded.pending,
                updated_at = excluded.updated_at",
            params![
                watcher,
                state
                    .last_seen
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&state.pending)?,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LookoutError;
    use crate::runner::CycleOutcome;

    fn sample_state() -> WatcherState {
        let link = Link::new("Top story", "https://example.com/1");
        WatcherState {
            last_seen: Some(LastSeen::observe(&link, Utc::now())),
            pending: vec![Link::new("Queued", "https://example.com/2")],
        }
    }

    #[test]
    fn test_state_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.load_state("news").unwrap(), WatcherState::default());

        let mut state = sample_state();
        state.last_seen.as_mut().unwrap().observed_at =
            Some(timestamp_to_datetime(1_700_000_000));
        db.save_state("news", &state).unwrap();
        assert_eq!(db.load_state("news").unwrap(), state);

        // Upsert replaces the whole row
        let cleared = WatcherState::default();
        db.save_state("news", &cleared).unwrap();
        assert_eq!(db.load_state("news").unwrap(), cleared);
        assert_eq!(db.list_states().unwrap().len(), 1);
    }

    #[test]
    fn test_reset_state() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.reset_state("missing", false).unwrap());

        db.save_state("news", &sample_state()).unwrap();
        assert!(db.reset_state("news", true).unwrap());
        let state = db.load_state("news").unwrap();
        assert!(state.pending.is_empty());
        assert!(state.last_seen.is_some());

        db.reset_state("news", false).unwrap();
        let state = db.load_state("news").unwrap();
        assert!(state.last_seen.is_none());
        assert!(state.anchor().is_none());
    }

    #[test]
    fn test_cycle_history() {
        let db = Database::open_in_memory().unwrap();
        let report = CycleReport {
            watcher: "news".into(),
            flushed: 2,
            outcome: CycleOutcome::Deferred {
                queued: 3,
                pending: 3,
                dropped: 1,
            },
            new_links: vec![],
            delivery_failures: vec![],
            state: WatcherState::default(),
        };

        let first = CycleRecord::from_result("news", timestamp_to_datetime(100), &Ok(report));
        let failed: Result<CycleReport> = Err(LookoutError::Extraction("bad".into()));
        let second = CycleRecord::from_result("news", timestamp_to_datetime(200), &failed);
        db.record_cycle(&first).unwrap();
        db.record_cycle(&second).unwrap();

        let history = db.recent_cycles("news", 10).unwrap();
        assert_eq!(history, vec![second, first.clone()]);
        assert_eq!(first.outcome, "deferred");
        assert_eq!(first.items, 3);
        assert_eq!(first.dropped, 1);
        assert_eq!(first.detail.as_deref(), Some("flushed 2 pending"));
        assert_eq!(history[0].outcome, "error");

        assert_eq!(db.recent_cycles("news", 1).unwrap().len(), 1);
        assert!(db.recent_cycles("other", 10).unwrap().is_empty());
    }

    #[test]
    fn test_open_at_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lookout.db");
        let db = Database::open_at(&path).unwrap();
        db.save_state("a", &sample_state()).unwrap();
        drop(db);

        let reopened = Database::open_at(&path).unwrap();
        assert_eq!(reopened.list_states().unwrap()[0].name, "a");
    }
}
