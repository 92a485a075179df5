//! HTTP fetch pipeline.
//!
//! Converts engine [`ResourceRequest`]s into reqwest calls and captures the
//! full response (status, headers, body) whatever its status. Deciding what
//! a non-success status means is left to the caller.
//!
//! ### Limits
//! - Request timeout: `network_timeout_ms` (default 8s)
//! - Max redirects: 5
//! - Max body bytes: 10MB

pub mod url;

use std::time::{Duration, Instant};

use reqwest::{Client, Method, header};

pub use self::url::{UrlError, canonicalize};

use offsync_core::{AppConfig, Error, ResourceRequest, Response};

/// Headers that describe the hop rather than the resource.
const SKIPPED_REQUEST_HEADERS: &[&str] = &["host", "connection", "content-length", "transfer-encoding"];

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "offsync/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 10MB)
    pub max_bytes: usize,

    /// Request timeout (default: 8s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "offsync/0.1".to_string(),
            max_bytes: 10 * 1024 * 1024,
            timeout: Duration::from_millis(8000),
            max_redirects: 5,
        }
    }
}

impl FetchConfig {
    /// Derive fetch settings from the application config.
    pub fn from_app(config: &AppConfig) -> Self {
        Self { user_agent: config.user_agent.clone(), timeout: config.network_timeout(), ..Self::default() }
    }
}

/// HTTP client that turns requests into captured [`Response`]s.
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Execute a request and capture the response.
    ///
    /// Non-success statuses are returned as responses, not errors. Transport
    /// failures map to `Error::Network`, elapsed timeouts to `Error::Timeout`.
    pub async fn execute(&self, request: &ResourceRequest) -> Result<Response, Error> {
        let start = Instant::now();
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("invalid method {}: {e}", request.method)))?;

        let mut builder = self.http.request(method, request.url.as_str());
        for (name, value) in &request.headers {
            if SKIPPED_REQUEST_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| transport_error(request, &e))?;
        let status = response.status().as_u16();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::Network(format!("{request}: {len} bytes exceeds {}", self.config.max_bytes)));
        }

        let headers = collect_headers(response.headers());
        let bytes = response.bytes().await.map_err(|e| transport_error(request, &e))?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::Network(format!(
                "{request}: {} bytes exceeds {}",
                bytes.len(),
                self.config.max_bytes
            )));
        }

        tracing::debug!(
            "fetched {} -> {} in {}ms ({} bytes)",
            request,
            status,
            start.elapsed().as_millis(),
            bytes.len()
        );

        Ok(Response::new(status, headers, bytes.to_vec()))
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

fn transport_error(request: &ResourceRequest, err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(request.to_string())
    } else {
        Error::Network(format!("{request}: {err}"))
    }
}

/// Header pairs as received, skipping values that are not valid UTF-8.
fn collect_headers(headers: &header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}
