//! Network side of the engine.
//!
//! ### Fetcher
//! - The [`Fetcher`] trait is the only way strategies reach the network, so
//!   tests can script it.
//! - [`HttpFetcher`] implements it on reqwest (rustls, compression, bounded redirects).
//! - A non-2xx status is a normal response, not an error.
//!
//! ### Cache mode
//! - `CacheMode::NoStore` asks every HTTP-level cache on the path to revalidate
//!   (`Cache-Control: no-cache`, `Pragma: no-cache`).
//!
//! ### Cancellation
//! - A request carrying an [`AbortSignal`] is raced against it; when the
//!   signal fires the in-flight request is dropped and `Error::Timeout` returned.

pub mod abort;
pub mod url;

use reqwest::{Client, header};
use std::time::{Duration, Instant};

pub use abort::{AbortController, AbortSignal, Deadline};
pub use url::{UrlError, resolve};

use stash_core::{Error, Request, Response};

/// How the request interacts with HTTP-level caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
}

/// Per-request fetch options.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub cache: CacheMode,
    pub signal: Option<AbortSignal>,
}

impl FetchOptions {
    /// Bypass HTTP caches.
    pub fn no_store() -> Self {
        Self { cache: CacheMode::NoStore, signal: None }
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Performs network fetches on behalf of the engine.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a request. Resolves with any response the origin sends, whatever its status.
    async fn fetch(&self, request: &Request, options: FetchOptions) -> Result<Response, Error>;
}

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "stash/0.1")
    pub user_agent: String,

    /// Overall request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { user_agent: "stash/0.1".to_string(), timeout: Duration::from_millis(20000), max_redirects: 5 }
    }
}

impl FetchConfig {
    /// Derive fetch settings from the application configuration.
    pub fn from_app(config: &stash_core::AppConfig) -> Self {
        Self { user_agent: config.user_agent.clone(), timeout: config.network_timeout(), ..Default::default() }
    }
}

/// reqwest-backed [`Fetcher`].
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    /// Create a new fetcher with the given configuration.
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
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http })
    }

    async fn exchange(&self, request: &Request, cache: CacheMode) -> Result<Response, Error> {
        let url = request.url();
        let mut builder = self.http.request(request.method().clone(), url.as_str());
        if cache == CacheMode::NoStore {
            builder = builder
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::PRAGMA, "no-cache");
        }

        let response = builder.send().await.map_err(|e| classify_error(url, e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| classify_error(url, e))?;

        Ok(Response::new(status, headers, body))
    }
}

fn classify_error(url: &::url::Url, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("{url}: {err}"))
    } else {
        Error::Network(format!("{url}: {err}"))
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request, options: FetchOptions) -> Result<Response, Error> {
        let url = request.url();
        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::InvalidUrl(format!("unsupported scheme: {scheme}"))),
        }

        let start = Instant::now();
        let result = match options.signal {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.aborted() => Err(Error::Timeout(format!("{url}: aborted at deadline"))),
                    result = self.exchange(request, options.cache) => result,
                }
            }
            None => self.exchange(request, options.cache).await,
        };

        let fetch_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => tracing::debug!(
                url = %url,
                status = response.status().as_u16(),
                bytes = response.body().len(),
                fetch_ms,
                "fetched"
            ),
            Err(err) => tracing::debug!(url = %url, error = %err, fetch_ms, "fetch failed"),
        }

        result
    }
}
