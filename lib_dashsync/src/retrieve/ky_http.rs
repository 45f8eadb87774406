//! # HTTP Retrieval Utilities
//!
//! A small asynchronous API client around `reqwest` for the polling
//! transport. It joins request paths onto a base URL, injects an optional
//! bearer token and hands back the raw body together with the transaction
//! metadata.
//!
//! Each call is exactly one attempt; the polling loop owns the cadence.
//! Decoding is left to the caller, since a body that does not decode is a
//! different failure from a request that did not succeed.

use std::time::Duration;

use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Method, Url};

use crate::error::SyncError;

/// # API Response
///
/// The body and metadata of one HTTP transaction.
#[derive(Debug)]
pub struct ApiResponse {
    /// The response body as text. Empty for bodiless responses.
    pub body: String,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// A single-attempt asynchronous HTTP client bound to one base URL.
pub struct ApiClient {
    inner: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a new `ApiClient`.
    ///
    /// # Arguments
    /// * `base_url` - The absolute base URL (e.g. "https://dash.example.com/").
    /// * `auth_token` - An optional bearer token for the Authorization header.
    /// * `timeout` - Per-request timeout covering connect, send and body read.
    ///
    /// # Errors
    /// Returns [`SyncError::Url`] if `base_url` is not absolute, or
    /// [`SyncError::Http`] if the TLS backend cannot be initialised.
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url)?;
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dashsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            inner,
            base_url,
            auth_token,
        })
    }

    /// The base URL all paths are joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs one request and captures the response.
    ///
    /// A non-2xx status is *not* an error: it comes back as
    /// `ApiResponse { success: false, .. }` with the error body attached.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be joined, the request cannot be
    /// sent (connection refused, timeout), or the body cannot be read.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
    ) -> Result<ApiResponse, SyncError> {
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(method, full_url);

        if let Some(h) = headers {
            req = req.headers(h);
        }
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = req.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(ApiResponse {
            body,
            status: status.as_u16(),
            success: status.is_success(),
            headers,
        })
    }

    /// Shorthand for a `GET` without extra headers.
    pub async fn get(&self, path: &str) -> Result<ApiResponse, SyncError> {
        self.request(Method::GET, path, None).await
    }
}
