use std::thread;
use std::time::Duration;

use rand::Rng;
use ureq::ResponseExt;

use crate::config::Settings;
use crate::error::{LookoutError, Result};
use crate::watcher::{RequestOptions, SourceType};

const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; lookout/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Base delay between attempts; each retry doubles it and adds jitter
const RETRY_BASE_MS: u64 = 500;

/// A fetched source document
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// Parsed JSON body of an API source
    Json(serde_json::Value),
    /// Raw HTML of a web page, with the final URL after redirects
    Html { url: String, body: String },
}

/// Fetch capability consumed by the runner
pub trait Fetcher: Send + Sync {
    /// Fetch and parse a source. `Ok(None)` means the source answered 404.
    fn fetch(
        &self,
        url: &str,
        source_type: SourceType,
        options: &RequestOptions,
    ) -> Result<Option<Document>>;
}

/// Blocking HTTP fetcher with a global timeout and bounded retries
pub struct HttpFetcher {
    agent: ureq::Agent,
    retries: u32,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent, retries }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Duration::from_secs(settings.fetch_timeout_secs),
            settings.fetch_retries,
        )
    }

    fn fetch_once(
        &self,
        url: &str,
        source_type: SourceType,
        options: &RequestOptions,
    ) -> Result<Option<Document>> {
        let mut request = self.agent.get(url).header("User-Agent", USER_AGENT);

        for (key, value) in &options.headers {
            request = request.header(key, value);
        }
        for (key, value) in &options.params {
            request = request.query(key, value);
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(404)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let final_url = response.get_uri().to_string();
        let body = response.into_body().read_to_string()?;

        let document = match source_type {
            SourceType::Api => Document::Json(serde_json::from_str(&body).map_err(|e| {
                LookoutError::Extraction(format!("response from {} is not valid JSON: {}", url, e))
            })?),
            SourceType::Web => Document::Html {
                url: final_url,
                body,
            },
        };
        Ok(Some(document))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        source_type: SourceType,
        options: &RequestOptions,
    ) -> Result<Option<Document>> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url, source_type, options) {
                Err(LookoutError::Fetch(e)) if attempt < self.retries => {
                    attempt += 1;
                    let delay = retry_delay(attempt);
                    tracing::debug!(%url, attempt, error = %e, ?delay, "retrying fetch");
                    thread::sleep(delay);
                }
                result => return result,
            }
        }
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE_MS.saturating_mul(1 << attempt.saturating_sub(1).min(4));
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_grows() {
        for _ in 0..20 {
            let first = retry_delay(1).as_millis() as u64;
            assert!((RETRY_BASE_MS..=RETRY_BASE_MS * 3 / 2).contains(&first));
            let third = retry_delay(3).as_millis() as u64;
            assert!((RETRY_BASE_MS * 4..=RETRY_BASE_MS * 6).contains(&third));
        }
    }

    #[test]
    fn test_retry_delay_is_capped() {
        assert!(retry_delay(30) <= Duration::from_millis(RETRY_BASE_MS * 16 * 3 / 2));
    }

    #[test]
    fn test_user_agent_names_crate() {
        assert!(USER_AGENT.contains("lookout/"));
    }
}
