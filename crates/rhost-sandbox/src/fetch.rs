//! Outbound HTTP for the `fetch_url` capability.
//!
//! The capability layer talks to a [`Fetcher`] rather than to an HTTP client
//! directly so the transport can be swapped (and faked in tests).  The
//! default [`HttpFetcher`] uses a blocking `reqwest` client, since capability
//! calls run synchronously on the thread executing the guest.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::HeaderMap;
use url::Url;

/// A fully decoded outbound request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Failures a [`Fetcher`] can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The request could not be sent or no response arrived.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response arrived but its body could not be read.
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Performs outbound requests on behalf of runnables.
pub trait Fetcher: Send + Sync {
    /// Send `request` and return the full response body.
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError>;
}

/// [`Fetcher`] backed by `reqwest::blocking`.
///
/// The client is built lazily on first use so it is created on the thread
/// that executes guests, never inside an async context.
pub struct HttpFetcher {
    timeout: Duration,
    client: OnceLock<Result<reqwest::blocking::Client, String>>,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: OnceLock::new(),
        }
    }

    /// The shared client.  A failed build is remembered and reported as a
    /// transport failure on every call.
    fn client(&self) -> Result<&reqwest::blocking::Client, FetchError> {
        self.client
            .get_or_init(|| {
                reqwest::blocking::Client::builder()
                    .user_agent(concat!("rhost/", env!("CARGO_PKG_VERSION")))
                    .timeout(self.timeout)
                    .build()
                    .map_err(|e| {
                        tracing::error!(error = %e, "failed to build http client");
                        format!("failed to build http client: {e}")
                    })
            })
            .as_ref()
            .map_err(|reason| FetchError::Transport(reason.clone()))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        tracing::debug!(method = %request.method, url = %request.url, "fetching on behalf of runnable");

        let mut builder = self
            .client()?
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let body = response
            .bytes()
            .map_err(|e| FetchError::Body(e.to_string()))?;

        Ok(body.to_vec())
    }
}
