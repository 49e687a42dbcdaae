use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::diff::MAX_NEW_LINKS;
use crate::error::{LookoutError, Result};
use crate::watcher::{Destination, WatcherConfig};

/// Telegram's message size limit, in characters
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Title prefixes that bypass deferral
pub const DEFAULT_URGENT_KEYWORDS: &[&str] = &["breaking", "urgent", "alert", "ultima", "ultimă"];

/// Global lookout configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    /// Default notification target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_notify: Option<NotifyTarget>,

    #[serde(default)]
    pub watchers: Vec<WatcherConfig>,
}

/// Process-wide tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Time zone cron expressions are evaluated in
    #[serde(
        deserialize_with = "deserialize_tz",
        serialize_with = "serialize_tz"
    )]
    pub timezone: Tz,
    /// Upper bound on a rendered notification, in characters
    pub message_limit: usize,
    /// Case-insensitive title prefixes that make an item urgent
    pub urgent_keywords: Vec<String>,
    /// Most new items reported by one cycle
    pub max_new_items: usize,
    /// Watcher cycles running at once
    pub max_concurrency: usize,
    pub fetch_timeout_secs: u64,
    /// Extra fetch attempts after a transport error
    pub fetch_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            message_limit: TELEGRAM_MESSAGE_LIMIT,
            urgent_keywords: DEFAULT_URGENT_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            max_new_items: MAX_NEW_LINKS,
            max_concurrency: 4,
            fetch_timeout_secs: 30,
            fetch_retries: 1,
        }
    }
}

fn deserialize_tz<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Tz, D::Error> {
    let name = String::deserialize(deserializer)?;
    name.parse::<Tz>()
        .map_err(|_| serde::de::Error::custom(format!("unknown time zone '{}'", name)))
}

fn serialize_tz<S: Serializer>(tz: &Tz, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(tz.name())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyTarget {
    /// Telegram Bot API, HTML parse mode
    Telegram {
        bot_token: String,
        chat_id: Destination,
    },
    /// Shell command receiving the message on stdin
    Command { command: String },
}

impl NotifyTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            NotifyTarget::Telegram { .. } => "telegram",
            NotifyTarget::Command { .. } => "command",
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a configuration document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;

        let mut seen = HashSet::new();
        for watcher in &config.watchers {
            if !seen.insert(watcher.name.as_str()) {
                return Err(LookoutError::DuplicateWatcherName(watcher.name.clone()));
            }
        }
        if config.settings.max_concurrency == 0 {
            return Err(LookoutError::Config(
                "settings.max_concurrency must be at least 1".into(),
            ));
        }

        Ok(config)
    }

    /// Get the config file path
    ///
    /// Supports LOOKOUT_CONFIG environment variable
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("LOOKOUT_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let dirs = ProjectDirs::from("", "", "lookout").ok_or_else(|| {
            LookoutError::Config("Could not determine config directory".into())
        })?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "lookout")
            .ok_or_else(|| LookoutError::Config("Could not determine data directory".into()))?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Get the database path
    ///
    /// Supports LOOKOUT_DB environment variable for test isolation
    pub fn db_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("LOOKOUT_DB") {
            return Ok(PathBuf::from(path));
        }
        Ok(Self::data_dir()?.join("lookout.db"))
    }

    pub fn get_watcher(&self, name: &str) -> Result<&WatcherConfig> {
        self.watchers
            .iter()
            .find(|w| w.name == name)
            .ok_or_else(|| LookoutError::WatcherNotFound(name.to_string()))
    }

    pub fn active_watchers(&self) -> impl Iterator<Item = &WatcherConfig> {
        self.watchers.iter().filter(|w| w.is_active)
    }
}

/// Commented starting point written by `lookout init`
pub const SAMPLE_CONFIG: &str = r#"# lookout configuration

[settings]
# Time zone used for cron expressions
timezone = "UTC"
# message_limit = 4096
# urgent_keywords = ["breaking", "urgent", "alert", "ultima", "ultimă"]
# max_new_items = 5
# max_concurrency = 4
# fetch_timeout_secs = 30
# fetch_retries = 1

# Where notifications go unless a watcher overrides chat_id
[default_notify]
type = "command"
command = "cat"
# type = "telegram"
# bot_token = "123456:ABC..."
# chat_id = -1001234567890

# A JSON API: "<list path> <title path> <url path>"
[[watchers]]
name = "hn-frontpage"
url = "https://hn.algolia.com/api/v1/search?tags=front_page"
type = "api"
selector = "hits title url"
cron = "*/15 * * * *"
cron_notification = "0 8,18 * * *"

# An HTML page: one CSS query matching the links
[[watchers]]
name = "rust-blog"
url = "https://blog.rust-lang.org/"
type = "web"
selector = "table.post-list a"
cron = "0 * * * *"
log_level = "info"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::SourceType;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.settings.timezone, Tz::UTC);
        assert_eq!(config.settings.message_limit, 4096);
        assert_eq!(config.settings.max_new_items, 5);
        assert_eq!(config.settings.urgent_keywords.len(), 5);
        assert!(config.watchers.is_empty());
    }

    #[test]
    fn test_sample_config_parses() {
        let config = Config::from_toml_str(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.watchers.len(), 2);
        assert_eq!(config.watchers[0].source_type(), SourceType::Api);
        assert_eq!(config.watchers[1].source_type(), SourceType::Web);
        assert!(config.watchers[0].cron_notification.is_some());
        assert_eq!(config.default_notify.as_ref().map(NotifyTarget::kind), Some("command"));
    }

    #[test]
    fn test_settings_overrides() {
        let config = Config::from_toml_str(
            r#"
            [settings]
            timezone = "Europe/Bucharest"
            message_limit = 1000
            urgent_keywords = ["flash"]
            "#,
        )
        .unwrap();
        assert_eq!(config.settings.timezone, chrono_tz::Europe::Bucharest);
        assert_eq!(config.settings.message_limit, 1000);
        assert_eq!(config.settings.urgent_keywords, vec!["flash".to_string()]);
        assert_eq!(config.settings.max_concurrency, 4);
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let err = Config::from_toml_str("[settings]\ntimezone = \"Mars/Olympus\"").unwrap_err();
        assert!(err.to_string().contains("Mars/Olympus"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let toml = r#"
            [[watchers]]
            name = "a"
            url = "https://example.com"
            selector = "a"

            [[watchers]]
            name = "a"
            url = "https://example.org"
            selector = "a"
        "#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, LookoutError::DuplicateWatcherName(ref n) if n == "a"));
    }

    #[test]
    fn test_telegram_target_accepts_numeric_chat_id() {
        let config = Config::from_toml_str(
            r#"
            [default_notify]
            type = "telegram"
            bot_token = "t"
            chat_id = -1001
            "#,
        )
        .unwrap();
        assert_eq!(
            config.default_notify,
            Some(NotifyTarget::Telegram {
                bot_token: "t".into(),
                chat_id: Destination::new("-1001"),
            })
        );
    }

    #[test]
    fn test_get_watcher() {
        let config = Config::from_toml_str(SAMPLE_CONFIG).unwrap();
        assert!(config.get_watcher("rust-blog").is_ok());
        assert!(matches!(
            config.get_watcher("nope"),
            Err(LookoutError::WatcherNotFound(_))
        ));
        assert_eq!(config.active_watchers().count(), 2);
    }
}
