//! HTTP client for the fleet service REST API.
//!
//! The push feeds carry deltas; everything the engine needs *before* the
//! first delta comes from here: the initial device set plus the server's
//! current time, log history, and the unread counters. The client also
//! serves as the engine's [`TimeSource`] for the hourly clock refresh.
//!
//! # Example
//!
//! ```no_run
//! use fleetsync_core::service_client::SyncClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SyncClient::new("http://fleet.example.com", "api-token")?;
//!
//! let home = client.fetch_home().await?;
//! println!("{} devices at {}", home.devices.len(), home.current_time);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use fleetsync_types::{DeviceRecord, LogCategory, LogEntry, UnreadCounts};

use crate::clock::TimeSource;

/// Error type for sync client operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncClientError {
    /// The service is not reachable.
    #[error("service not reachable at {url}: {source}")]
    NotReachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Invalid base URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The auth token contains characters that cannot go into a header.
    #[error("invalid auth token")]
    InvalidToken,

    /// API returned an error response.
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
}

/// Result type for sync client operations.
pub type Result<T> = std::result::Result<T, SyncClientError>;

/// The home payload: the full device set plus the server's clock at the
/// moment of the fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomePayload {
    /// All devices known to the server.
    pub devices: Vec<DeviceRecord>,
    /// Server time when the payload was assembled.
    #[serde(with = "time::serde::rfc3339")]
    pub current_time: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
struct TimePayload {
    #[serde(with = "time::serde::rfc3339")]
    current_time: OffsetDateTime,
}

/// HTTP client for the fleet service API.
#[derive(Debug, Clone)]
pub struct SyncClient {
    client: Client,
    base_url: String,
}

impl SyncClient {
    /// Create a client for the given base url, authenticating every
    /// request with `Authorization: Token <token>`.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(SyncClientError::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Token {}", token))
            .map_err(|_| SyncClientError::InvalidToken)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .default_headers(headers)
            .build()
            .map_err(SyncClientError::Request)?;

        Ok(Self { client, base_url })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the home payload: the device set and the server's current
    /// time, in one consistent response.
    pub async fn fetch_home(&self) -> Result<HomePayload> {
        let url = format!("{}/api/home/", self.base_url);
        self.get(&url).await
    }

    /// Fetch the server's current time alone.
    pub async fn fetch_server_time(&self) -> Result<OffsetDateTime> {
        let url = format!("{}/api/time/", self.base_url);
        let payload: TimePayload = self.get(&url).await?;
        Ok(payload.current_time)
    }

    /// Fetch the unread log counters.
    pub async fn fetch_unread(&self) -> Result<UnreadCounts> {
        let url = format!("{}/api/logs/unread/", self.base_url);
        self.get(&url).await
    }

    /// Fetch one category's log history, newest first.
    pub async fn fetch_logs(&self, category: LogCategory) -> Result<Vec<LogEntry>> {
        let url = format!("{}/api/logs/{}/", self.base_url, category);
        self.get(&url).await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| SyncClientError::NotReachable {
                    url: url.to_string(),
                    source: e,
                })?;
        self.handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(SyncClientError::Request)
        } else {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| status.to_string());

            Err(SyncClientError::ApiError {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl TimeSource for SyncClient {
    async fn fetch_server_time(&self) -> crate::error::Result<OffsetDateTime> {
        SyncClient::fetch_server_time(self)
            .await
            .map_err(|e| crate::error::Error::TimeFetch(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = SyncClient::new("http://localhost:8000", "t").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[test]
    fn test_client_normalizes_url() {
        let client = SyncClient::new("http://localhost:8000/", "t").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[test]
    fn test_client_rejects_bare_host() {
        let result = SyncClient::new("localhost:8000", "t");
        assert!(matches!(result, Err(SyncClientError::InvalidUrl(_))));
    }

    #[test]
    fn test_client_rejects_unprintable_token() {
        let result = SyncClient::new("http://localhost:8000", "bad\ntoken");
        assert!(matches!(result, Err(SyncClientError::InvalidToken)));
    }

    #[test]
    fn test_home_payload_decodes() {
        let json = r#"{
            "devices": [],
            "current_time": "2026-01-10T12:00:00Z"
        }"#;
        let payload: HomePayload = serde_json::from_str(json).unwrap();
        assert!(payload.devices.is_empty());
        assert_eq!(payload.current_time.hour(), 12);
    }
}
