//! # Offline Net
//!
//! Request and response types plus the network collaborator used by the
//! offline caching worker.
//!
//! The worker never talks HTTP itself. It asks a [`Fetcher`] for a response,
//! and [`ResourceLoader`] is the production fetcher backed by `reqwest`.
//! Every fetch is a single attempt; there is no retry layer.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use offline_common::OfflineError;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<NetError> for OfflineError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Timeout(after) => OfflineError::Timeout(after),
            NetError::InvalidUrl(url) => OfflineError::InvalidArgument(url),
            other => OfflineError::network_with_source("fetch failed", other),
        }
    }
}

/// Identity of a request inside a cache bucket: method plus absolute URL.
///
/// The fragment is not part of the identity; `/index.html#reports` and
/// `/index.html` share one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: Method,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method,
            url: url.as_str().to_string(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An intercepted or outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            timeout: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parse `url` and create a GET request.
    pub fn parse_get(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether this is an idempotent read the worker may cache.
    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    /// Cache identity of this request.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.method.clone(), &self.url)
    }
}

/// A fully buffered HTTP response.
///
/// Bodies are `Bytes`, so cloning a response for the cache is cheap.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Create a response with no headers.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Only complete `200 OK` responses are written back on revalidation.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// The network collaborator: one request in, one response or failure out.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Issue `request` once.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("OfflineWorker/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// `reqwest`-backed [`Fetcher`].
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "ResourceLoader initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for ResourceLoader {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .timeout(timeout);

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                NetError::Timeout(timeout)
            } else {
                NetError::HttpError(e)
            }
        };

        let response = req_builder.send().await.map_err(classify)?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(classify)?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url,
            status,
            headers,
            body,
        })
    }
}
