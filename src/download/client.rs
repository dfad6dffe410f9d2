//! HTTP client wrapper used by the download executor.
//!
//! This module provides the `HttpClient` struct, which owns a pooled
//! `reqwest::Client` configured with a connect timeout, default headers (for
//! example an auth cookie captured by the producer) and the tool's
//! User-Agent.
//!
//! No total request timeout is configured. Liveness is enforced by the
//! executor's stall timer, and a slow but steadily progressing transfer must
//! never be killed.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use super::error::DownloadError;

/// Errors raised while building the HTTP client.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    /// A configured header name or value is not valid HTTP.
    #[error("invalid request header '{name}'")]
    InvalidHeader {
        /// The offending header name.
        name: String,
    },

    /// reqwest rejected the client configuration.
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Options for [`HttpClient::with_options`].
#[derive(Debug, Clone)]
pub struct HttpClientOptions {
    /// Maximum time to establish a connection.
    pub connect_timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
    /// Extra headers attached to every request (e.g. `Cookie`).
    pub headers: Vec<(String, String)>,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: Vec::new(),
        }
    }
}

/// HTTP client for streaming artifact downloads.
///
/// Create once and clone freely; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with default options.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError::Build`] if the TLS backend cannot be
    /// initialized.
    pub fn new() -> Result<Self, ClientBuildError> {
        Self::with_options(&HttpClientOptions::default())
    }

    /// Creates a client from explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError::InvalidHeader`] for malformed header
    /// names/values and [`ClientBuildError::Build`] if reqwest rejects the
    /// configuration.
    #[instrument(level = "debug", skip(options), fields(headers = options.headers.len()))]
    pub fn with_options(options: &HttpClientOptions) -> Result<Self, ClientBuildError> {
        let headers = build_header_map(&options.headers)?;

        // Session cookies set by a CDN redirect are replayed on later requests.
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .gzip(true)
            .cookie_store(true)
            .user_agent(options.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }

    /// Sends a GET request and returns the response once headers arrive.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Transport`] for connection/DNS/TLS failures
    /// - [`DownloadError::HttpStatus`] for any non-2xx status; the body is
    ///   dropped unread
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::transport(url, describe_reqwest_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            debug!(url, status = status.as_u16(), "non-success status");
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        Ok(response)
    }
}

/// Flattens a reqwest error and its source chain into one line.
pub(crate) fn describe_reqwest_error(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn build_header_map(headers: &[(String, String)]) -> Result<HeaderMap, ClientBuildError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| {
            ClientBuildError::InvalidHeader {
                name: name.clone(),
            }
        })?;
        let mut header_value = HeaderValue::from_str(value.trim()).map_err(|_| {
            ClientBuildError::InvalidHeader {
                name: name.clone(),
            }
        })?;
        if header_name == reqwest::header::COOKIE || header_name == reqwest::header::AUTHORIZATION
        {
            header_value.set_sensitive(true);
        }
        map.append(header_name, header_value);
    }
    Ok(map)
}
