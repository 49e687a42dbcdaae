use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LookoutError, Result};
use crate::schedule::CronExpr;

/// A titled link extracted from a source. Never mutated after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub title: String,
    pub url: String,
}

impl Link {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// How a watcher's source is fetched and parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// JSON document navigated with dotted paths
    Api,
    /// HTML page queried with a CSS selector
    #[default]
    Web,
}

/// Dotted path into a JSON document, e.g. `data.children`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl FromStr for FieldPath {
    type Err = LookoutError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(LookoutError::Extraction("missing selector component".into()));
        }
        let segments: Vec<String> = s.split('.').map(String::from).collect();
        if segments.iter().any(String::is_empty) {
            return Err(LookoutError::Extraction(format!(
                "empty segment in path '{}'",
                s
            )));
        }
        Ok(Self(segments))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// API selector: `<list path> <title path> <url path>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSelector {
    pub list: FieldPath,
    pub title: FieldPath,
    pub url: FieldPath,
}

impl FromStr for ApiSelector {
    type Err = LookoutError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(' ').collect();
        if parts.len() > 3 {
            return Err(LookoutError::Extraction(format!(
                "API selectors must have dotted list, title and url paths separated by single spaces, got '{}'",
                s
            )));
        }
        let part = |i: usize| parts.get(i).copied().unwrap_or_default();
        Ok(Self {
            list: part(0).parse()?,
            title: part(1).parse()?,
            url: part(2).parse()?,
        })
    }
}

impl fmt::Display for ApiSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.list, self.title, self.url)
    }
}

/// CSS query compiled once when the configuration is loaded
#[derive(Debug, Clone)]
pub struct WebSelector {
    raw: String,
    query: scraper::Selector,
}

impl WebSelector {
    pub fn parse(raw: &str) -> Result<Self> {
        let query = scraper::Selector::parse(raw).map_err(|e| {
            LookoutError::Extraction(format!("Invalid selector '{}': {:?}", raw, e))
        })?;
        Ok(Self {
            raw: raw.to_string(),
            query,
        })
    }

    pub fn query(&self) -> &scraper::Selector {
        &self.query
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for WebSelector {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Display for WebSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parsed selector; the variant determines the source type
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Api(ApiSelector),
    Web(WebSelector),
}

impl Selector {
    pub fn parse(source_type: SourceType, raw: &str) -> Result<Self> {
        match source_type {
            SourceType::Api => Ok(Selector::Api(raw.parse()?)),
            SourceType::Web => Ok(Selector::Web(WebSelector::parse(raw)?)),
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            Selector::Api(_) => SourceType::Api,
            Selector::Web(_) => SourceType::Web,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Api(s) => s.fmt(f),
            Selector::Web(s) => s.fmt(f),
        }
    }
}

/// Extra request options passed to the fetcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RequestOptions {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

/// Per-watcher log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    #[serde(alias = "warn")]
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    /// Whether an event at `level` should be emitted for this watcher
    pub fn allows(&self, level: tracing::Level) -> bool {
        let wanted = if level == tracing::Level::ERROR {
            0
        } else if level == tracing::Level::WARN {
            1
        } else if level == tracing::Level::INFO {
            2
        } else {
            3
        };
        wanted <= *self as u8
    }
}

/// Chat destination; accepts numeric chat ids or `@channel` names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawDestination", into = "String")]
pub struct Destination(String);

impl Destination {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDestination {
    Id(i64),
    Name(String),
}

impl From<RawDestination> for Destination {
    fn from(raw: RawDestination) -> Self {
        match raw {
            RawDestination::Id(id) => Self(id.to_string()),
            RawDestination::Name(name) => Self(name),
        }
    }
}

impl From<Destination> for String {
    fn from(destination: Destination) -> Self {
        destination.0
    }
}

/// A watcher definition, validated once at load time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawWatcher", into = "RawWatcher")]
pub struct WatcherConfig {
    /// Unique name
    pub name: String,
    /// Source URL
    pub url: String,
    /// Parsed selector (also determines the source type)
    pub selector: Selector,
    /// Headers and query params sent with every fetch
    pub request: RequestOptions,
    /// Inactive watchers are never scheduled
    pub is_active: bool,
    /// Fetch cadence (absent = every scheduler tick)
    pub cron: Option<CronExpr>,
    /// When deferred items may be flushed (absent = every cycle)
    pub cron_notification: Option<CronExpr>,
    /// Overrides the default notification destination
    pub chat_id: Option<Destination>,
    pub log_level: LogLevel,
}

impl WatcherConfig {
    /// Create an active watcher with no schedules
    pub fn new(name: impl Into<String>, url: impl Into<String>, selector: Selector) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            selector,
            request: RequestOptions::default(),
            is_active: true,
            cron: None,
            cron_notification: None,
            chat_id: None,
            log_level: LogLevel::default(),
        }
    }

    pub fn source_type(&self) -> SourceType {
        self.selector.source_type()
    }
}

/// Watcher record as written in config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawWatcher {
    name: String,
    url: String,
    #[serde(rename = "type", default)]
    source_type: SourceType,
    selector: String,
    #[serde(default = "default_true")]
    is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cron_notification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chat_id: Option<Destination>,
    #[serde(default)]
    log_level: LogLevel,
    /// Kept last so it serializes after the plain values
    #[serde(default)]
    request: RequestOptions,
}

fn default_true() -> bool {
    true
}

/// Blank cron strings mean "no schedule"
fn parse_optional_cron(raw: Option<&str>) -> Result<Option<CronExpr>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(expr) => CronExpr::parse(expr).map(Some),
    }
}

impl TryFrom<RawWatcher> for WatcherConfig {
    type Error = LookoutError;

    fn try_from(raw: RawWatcher) -> Result<Self> {
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            return Err(LookoutError::Config("watcher name cannot be empty".into()));
        }
        url::Url::parse(&raw.url)
            .map_err(|e| LookoutError::Config(format!("[{}] invalid url '{}': {}", name, raw.url, e)))?;
        let selector = Selector::parse(raw.source_type, &raw.selector)
            .map_err(|e| LookoutError::Config(format!("[{}] {}", name, e)))?;
        let cron = parse_optional_cron(raw.cron.as_deref())
            .map_err(|e| LookoutError::Config(format!("[{}] cron: {}", name, e)))?;
        let cron_notification = parse_optional_cron(raw.cron_notification.as_deref())
            .map_err(|e| LookoutError::Config(format!("[{}] cron_notification: {}", name, e)))?;

        Ok(Self {
            selector,
            url: raw.url,
            request: raw.request,
            is_active: raw.is_active,
            cron,
            cron_notification,
            chat_id: raw.chat_id,
            log_level: raw.log_level,
            name,
        })
    }
}

impl From<WatcherConfig> for RawWatcher {
    fn from(watcher: WatcherConfig) -> Self {
        Self {
            source_type: watcher.source_type(),
            selector: watcher.selector.to_string(),
            name: watcher.name,
            url: watcher.url,
            request: watcher.request,
            is_active: watcher.is_active,
            cron: watcher.cron.map(|c| c.as_str().to_string()),
            cron_notification: watcher.cron_notification.map(|c| c.as_str().to_string()),
            chat_id: watcher.chat_id,
            log_level: watcher.log_level,
        }
    }
}

/// The most recently notified link, used as the diff anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LastSeen {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "timestamp")]
    pub observed_at: Option<DateTime<Utc>>,
}

impl LastSeen {
    pub fn observe(link: &Link, at: DateTime<Utc>) -> Self {
        Self {
            title: link.title.clone(),
            url: link.url.clone(),
            observed_at: Some(at),
        }
    }
}

/// State the runner mutates every cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WatcherState {
    #[serde(default)]
    pub last_seen: Option<LastSeen>,
    /// Deferred links, newest first, bounded by rendered message size
    #[serde(default)]
    pub pending: Vec<Link>,
}

impl WatcherState {
    /// The diff anchor, or `None` on a cold start (no timestamp or no url)
    pub fn anchor(&self) -> Option<Link> {
        let seen = self.last_seen.as_ref()?;
        if seen.observed_at.is_none() || seen.url.is_empty() {
            return None;
        }
        Some(Link::new(seen.title.clone(), seen.url.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_path_parse() {
        let path: FieldPath = "data.children".parse().unwrap();
        assert_eq!(path.segments(), ["data", "children"]);
        assert_eq!(path.to_string(), "data.children");
        assert!("data..children".parse::<FieldPath>().is_err());
    }

    #[test]
    fn test_api_selector_requires_three_components() {
        let selector: ApiSelector = "items title link.href".parse().unwrap();
        assert_eq!(selector.url.segments(), ["link", "href"]);

        for bad in ["items title", "items  link", "", "a b c d"] {
            let err = bad.parse::<ApiSelector>().unwrap_err();
            assert!(matches!(err, LookoutError::Extraction(_)), "{bad:?}");
        }
        let err = "items title".parse::<ApiSelector>().unwrap_err();
        assert!(err.to_string().contains("missing selector component"));
    }

    #[test]
    fn test_web_selector_rejects_garbage() {
        assert!(WebSelector::parse("a.headline").is_ok());
        assert!(WebSelector::parse("a[[").is_err());
    }

    #[test]
    fn test_log_level_gate() {
        assert!(LogLevel::Warning.allows(tracing::Level::ERROR));
        assert!(LogLevel::Warning.allows(tracing::Level::WARN));
        assert!(!LogLevel::Warning.allows(tracing::Level::INFO));
        assert!(LogLevel::Debug.allows(tracing::Level::DEBUG));
        assert!(!LogLevel::Error.allows(tracing::Level::WARN));
    }

    #[test]
    fn test_anchor_requires_timestamp_and_url() {
        let mut state = WatcherState::default();
        assert!(state.anchor().is_none());

        state.last_seen = Some(LastSeen {
            title: "A".into(),
            url: "https://a".into(),
            observed_at: None,
        });
        assert!(state.anchor().is_none());

        state.last_seen = Some(LastSeen::observe(&Link::new("A", "https://a"), Utc::now()));
        assert_eq!(state.anchor(), Some(Link::new("A", "https://a")));

        state.last_seen = Some(LastSeen::observe(&Link::new("A", ""), Utc::now()));
        assert!(state.anchor().is_none());
    }

    #[test]
    fn test_destination_accepts_numbers() {
        #[derive(Deserialize)]
        struct Wrapper {
            chat_id: Destination,
        }
        let w: Wrapper = toml::from_str("chat_id = -100123").unwrap();
        assert_eq!(w.chat_id.as_str(), "-100123");
        let w: Wrapper = toml::from_str("chat_id = \"@news\"").unwrap();
        assert_eq!(w.chat_id.as_str(), "@news");
    }

    #[test]
    fn test_watcher_from_toml() {
        let watcher: WatcherConfig = toml::from_str(
            r#"
            name = "hn"
            url = "https://hacker-news.firebaseio.com/v0/top.json"
            type = "api"
            selector = "hits title url"
            cron_notification = ""
            chat_id = 42
            log_level = "info"
            "#,
        )
        .unwrap();
        assert_eq!(watcher.source_type(), SourceType::Api);
        assert!(watcher.is_active);
        assert!(watcher.cron_notification.is_none());
        assert_eq!(watcher.chat_id, Some(Destination::new("42")));
        assert_eq!(watcher.log_level, LogLevel::Info);
    }

    #[test]
    fn test_watcher_rejects_bad_selector() {
        let result: std::result::Result<WatcherConfig, _> = toml::from_str(
            r#"
            name = "broken"
            url = "https://example.com/api.json"
            type = "api"
            selector = "items title"
            "#,
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("missing selector component"), "{err}");
    }
}
