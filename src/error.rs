use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookoutError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] ureq::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] refinery::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// The source was reachable but the selector matched nothing
    #[error("No elements found: {0}")]
    NoElementsFound(String),

    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("Watcher not found: {0}")]
    WatcherNotFound(String),

    #[error("Watcher name already exists: {0}")]
    DuplicateWatcherName(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Notification failed: {0}")]
    Notification(String),
}

impl LookoutError {
    /// Whether a cycle that hit this error should end as a no-op instead of failing
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LookoutError::NoElementsFound(_))
    }

    /// Get an actionable hint for how to resolve this error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            LookoutError::Fetch(_) => Some(
                "Check your internet connection, or dry-run the watcher:\n  lookout test \"<watcher>\""
            ),
            LookoutError::WatcherNotFound(_) => Some(
                "Run `lookout list` to see configured watchers"
            ),
            LookoutError::DuplicateWatcherName(_) => Some(
                "Watcher names must be unique in config.toml"
            ),
            LookoutError::Extraction(_) => Some(
                "API selectors are three dotted paths separated by spaces: \"<list> <title> <url>\"\nWeb selectors are a single CSS query matching <a> elements"
            ),
            LookoutError::NoElementsFound(_) => Some(
                "The page may have changed layout; check the selector with `lookout test \"<watcher>\"`"
            ),
            LookoutError::InvalidCron(_) => Some(
                "Use five-field cron syntax: minute hour day-of-month month day-of-week"
            ),
            LookoutError::Notification(_) => Some(
                "Check `default_notify` in config.toml, then run `lookout notify test`"
            ),
            LookoutError::Database(_) | LookoutError::Migration(_) => Some(
                "Try running `lookout doctor` to check database status"
            ),
            LookoutError::Config(_) | LookoutError::Toml(_) => Some(
                "Run `lookout init` to write a sample configuration"
            ),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LookoutError>;
