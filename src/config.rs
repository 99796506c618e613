// Client configuration
//
// Endpoint of the lock sidecar plus the two timings the client cares about:
// how often a held lease is renewed (and a blocking acquire retried), and how
// long a single HTTP request may take.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default address of the lock sidecar.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080";

/// Default renewal / retry interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const ENDPOINT_VAR: &str = "LEASEHOLD_ENDPOINT";
const INTERVAL_VAR: &str = "LEASEHOLD_INTERVAL_MS";
const REQUEST_TIMEOUT_VAR: &str = "LEASEHOLD_REQUEST_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Base URI of the coordination service
    pub endpoint: String,

    /// Milliseconds between renewals of a held lease, and between
    /// attempts of a blocking acquire
    pub interval_ms: u64,

    /// Milliseconds before a single CHECK or CLAIM request is abandoned
    pub request_timeout_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            interval_ms: duration_ms(DEFAULT_INTERVAL),
            request_timeout_ms: duration_ms(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl LeaseConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `LEASEHOLD_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(endpoint) = env::var(ENDPOINT_VAR) {
            config.endpoint = endpoint;
        }
        if let Some(ms) = env_millis(INTERVAL_VAR)? {
            config.interval_ms = ms;
        }
        if let Some(ms) = env_millis(REQUEST_TIMEOUT_VAR)? {
            config.request_timeout_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = duration_ms(interval);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parsed endpoint; must be an absolute http(s) URL usable as a base
    pub fn endpoint_url(&self) -> Result<reqwest::Url> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {:?}: {}", self.endpoint, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "endpoint {:?} must use http or https",
                self.endpoint
            )));
        }
        if url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "endpoint {:?} cannot be used as a base URL",
                self.endpoint
            )));
        }
        Ok(url)
    }

    pub fn validate(&self) -> Result<()> {
        self.endpoint_url()?;
        if self.interval_ms == 0 {
            return Err(Error::Config("interval_ms must be greater than zero".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn env_millis(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{var}={raw:?} is not a number of milliseconds: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LeaseConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.interval(), Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: LeaseConfig =
            serde_json::from_str(r#"{ "endpoint": "http://sidecar:13131" }"#).unwrap();
        assert_eq!(config.endpoint, "http://sidecar:13131");
        assert_eq!(config.interval_ms, 10_000);
        assert_eq!(config.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_builders() {
        let config = LeaseConfig::new("http://127.0.0.1:9000")
            .with_interval(Duration::from_millis(250))
            .with_request_timeout(Duration::from_secs(2));
        assert_eq!(config.interval_ms, 250);
        assert_eq!(config.request_timeout_ms, 2_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(
            LeaseConfig::new("not a url").validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            LeaseConfig::new("ftp://localhost").validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            LeaseConfig::new("mailto:ops@example.com").validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            LeaseConfig::default().with_interval(Duration::ZERO).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            LeaseConfig::default()
                .with_request_timeout(Duration::ZERO)
                .validate(),
            Err(Error::Config(_))
        ));
    }
}
