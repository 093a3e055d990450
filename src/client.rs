//! HTTP client for fetching live state vectors from OpenSky.

use crate::protocol::{self, ParseError};
use crate::types::LiveRecord;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL},
    Client, StatusCode,
};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Server returned error status: {status}")]
    ServerError { status: StatusCode },
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Authentication failed")]
    AuthError,
    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] ParseError),
}

/// Bounding box for geographic queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Global bounding box covering the entire world.
    pub const GLOBAL: Self = Self {
        south: -90.0,
        north: 90.0,
        west: -180.0,
        east: 180.0,
    };

    /// Central London, roughly Richmond to the City.
    pub const LONDON: Self = Self {
        south: 51.417680,
        north: 51.495647,
        west: -0.233946,
        east: -0.102311,
    };

    /// Create a bounding box from coordinates.
    pub fn new(south: f64, north: f64, west: f64, east: f64) -> Self {
        Self {
            south,
            north,
            west,
            east,
        }
    }

    fn to_query_string(&self) -> String {
        format!(
            "lamin={}&lomin={}&lamax={}&lomax={}",
            self.south, self.west, self.north, self.east
        )
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::LONDON
    }
}

/// Configuration for the OpenSky client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Area to request state vectors for
    pub bbox: BoundingBox,
    /// Request timeout
    pub timeout: Duration,
    /// Optional account credentials, raising the anonymous rate limit
    pub credentials: Option<(String, String)>,
}

impl ClientConfig {
    pub fn new(bbox: BoundingBox) -> Self {
        Self {
            bbox,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.credentials = Some((username, password));
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://opensky-network.org".to_string(),
            bbox: BoundingBox::default(),
            timeout: Duration::from_secs(30),
            credentials: None,
        }
    }
}

/// Source of live aircraft state for a fixed area.
pub trait StateFeed: Send + Sync {
    /// Fetch the current state vectors.
    fn fetch_states(&self) -> impl Future<Output = Result<Vec<LiveRecord>, ClientError>> + Send;
}

/// Client for the OpenSky REST API.
pub struct OpenSkyClient {
    client: Client,
    config: ClientConfig,
}

impl OpenSkyClient {
    /// Create a new OpenSky client.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn states_url(&self) -> String {
        format!(
            "{}/api/states/all?{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.bbox.to_query_string()
        )
    }

    /// Fetch state vectors inside the configured bounding box.
    pub async fn fetch(&self) -> Result<Vec<LiveRecord>, ClientError> {
        let url = self.states_url();

        tracing::debug!("Fetching: {}", url);

        let mut request = self.client.get(&url);
        if let Some((ref username, ref password)) = self.config.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;

        match response.status() {
            StatusCode::OK => {
                let bytes = response.bytes().await?;
                let states = protocol::parse_states(&bytes)?;
                tracing::debug!(
                    time = ?states.time,
                    records = states.records.len(),
                    "Fetched states"
                );
                Ok(states.records)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = ["x-rate-limit-retry-after-seconds", "retry-after"]
                    .iter()
                    .find_map(|name| response.headers().get(*name))
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);

                Err(ClientError::RateLimited { retry_after })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::AuthError),
            status => Err(ClientError::ServerError { status }),
        }
    }
}

impl StateFeed for OpenSkyClient {
    async fn fetch_states(&self) -> Result<Vec<LiveRecord>, ClientError> {
        self.fetch().await
    }
}
