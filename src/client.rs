// Coordination service client
//
// The lock sidecar exposes two operations per named lock:
// - CHECK (GET  /locks/{name}): 200 exists, 404 not found
// - CLAIM (PUT  /locks/{name}): 200 created or renewed, 409 held elsewhere

use crate::{config::LeaseConfig, Error, Result};
use async_trait::async_trait;
use reqwest::{header::ACCEPT, RequestBuilder, StatusCode, Url};

#[async_trait]
pub trait CoordinationClient: Send + Sync + std::fmt::Debug {
    /// Presence check for the named lock
    async fn check(&self, name: &str) -> Result<StatusCode>;

    /// Create-or-renew claim on the named lock
    async fn claim(&self, name: &str) -> Result<StatusCode>;
}

#[derive(Debug, Clone)]
pub struct HttpCoordinationClient {
    http: reqwest::Client,
    base: Url,
}

impl HttpCoordinationClient {
    pub fn new(config: &LeaseConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base: config.endpoint_url()?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    /// `{endpoint}/locks/{name}`, with `name` encoded as one path segment
    pub fn lock_url(&self, name: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("endpoint {} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(["locks", name]);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<StatusCode> {
        match request.header(ACCEPT, "application/json").send().await {
            Ok(response) => Ok(response.status()),
            // Errors that still carry a status count as that status
            Err(err) => match err.status() {
                Some(status) => Ok(status),
                None => Err(Error::Transport(err)),
            },
        }
    }
}

#[async_trait]
impl CoordinationClient for HttpCoordinationClient {
    async fn check(&self, name: &str) -> Result<StatusCode> {
        let url = self.lock_url(name)?;
        self.send(self.http.get(url)).await
    }

    async fn claim(&self, name: &str) -> Result<StatusCode> {
        let url = self.lock_url(name)?;
        self.send(self.http.put(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str) -> HttpCoordinationClient {
        HttpCoordinationClient::new(&LeaseConfig::new(endpoint)).unwrap()
    }

    #[test]
    fn test_lock_url() {
        let client = client("http://localhost:8080");
        assert_eq!(
            client.lock_url("migrations").unwrap().as_str(),
            "http://localhost:8080/locks/migrations"
        );
    }

    #[test]
    fn test_lock_url_keeps_endpoint_path() {
        let client = client("http://sidecar:13131/api/");
        assert_eq!(
            client.lock_url("db").unwrap().as_str(),
            "http://sidecar:13131/api/locks/db"
        );
    }

    #[test]
    fn test_lock_url_encodes_name() {
        let client = client("http://localhost:8080");
        assert_eq!(
            client.lock_url("a/b c").unwrap().as_str(),
            "http://localhost:8080/locks/a%2Fb%20c"
        );
    }

    #[test]
    fn test_rejects_invalid_endpoint() {
        let result = HttpCoordinationClient::new(&LeaseConfig::new("localhost"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        // Port 9 (discard) on loopback is not expected to accept connections
        let config = LeaseConfig::new("http://127.0.0.1:9")
            .with_request_timeout(std::time::Duration::from_secs(2));
        let client = HttpCoordinationClient::new(&config).unwrap();
        let result = client.check("anything").await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
