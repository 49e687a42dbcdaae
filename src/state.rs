use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::error::Result;
use crate::watcher::WatcherState;

/// Persistence of per-watcher state. Each `save_state` call is one save point
/// and must be atomic relative to `load_state` for the same watcher.
pub trait StateStore {
    /// State for `watcher`, empty if it has never run
    fn load_state(&self, watcher: &str) -> Result<WatcherState>;

    fn save_state(&self, watcher: &str, state: &WatcherState) -> Result<()>;
}

/// In-process store for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    states: HashMap<String, WatcherState>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing state
    pub fn with_state(self, watcher: &str, state: WatcherState) -> Self {
        self.lock().states.insert(watcher.to_string(), state);
        self
    }

    /// Number of save points reached so far, across all watchers
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for MemoryStore {
    fn load_state(&self, watcher: &str) -> Result<WatcherState> {
        Ok(self.lock().states.get(watcher).cloned().unwrap_or_default())
    }

    fn save_state(&self, watcher: &str, state: &WatcherState) -> Result<()> {
        let mut inner = self.lock();
        inner.states.insert(watcher.to_string(), state.clone());
        inner.saves += 1;
        Ok(())
    }
}
