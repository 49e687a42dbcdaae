pub mod cli;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod logging;
pub mod message;
pub mod notify;
pub mod pending;
pub mod runner;
pub mod schedule;
pub mod state;
pub mod watcher;

pub use error::{LookoutError, Result};
