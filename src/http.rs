//! HTTP access for source extractors, with bounded retry.
//!
//! # Architecture
//!
//! - [`Fetch`]: capability trait the extractors depend on (GET text, form POST,
//!   GET bytes)
//! - [`HttpFetcher`]: `reqwest` implementation with a per-request timeout
//! - [`RetryFetch`]: decorator that retries transient fetch failures
//!
//! Extractors never talk to `reqwest` directly, so tests can drive them with
//! canned pages.
//!
//! # Retry Strategy
//!
//! - Only [`ScrapeError::Fetch`] is retried
//! - Exponential backoff from a base delay, capped at 30 seconds
//! - Random jitter (0-250ms by default) added to every delay

use std::fmt;
use std::time::{Duration, Instant};

use rand::{rng, Rng};
use reqwest::Client;
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

use crate::error::ScrapeError;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// One outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Request {
    Get(String),
    /// Form-encoded POST, e.g. a per-year report listing.
    PostForm {
        url: String,
        form: Vec<(String, String)>,
    },
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Request::Get(url.into())
    }

    pub fn post_form(url: impl Into<String>, form: &[(&str, String)]) -> Self {
        Request::PostForm {
            url: url.into(),
            form: form
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Request::Get(url) | Request::PostForm { url, .. } => url,
        }
    }
}

/// Network access as seen by an extractor.
// runs on one task; callers never need the futures to be Send
#[allow(async_fn_in_trait)]
pub trait Fetch {
    /// Response body as text.
    async fn text(&self, request: &Request) -> Result<String, ScrapeError>;

    /// Response body as raw bytes (PDFs and other assets).
    async fn bytes(&self, request: &Request) -> Result<Vec<u8>, ScrapeError>;
}

/// `reqwest`-backed fetcher. Non-2xx statuses and timeouts are fetch errors.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.unwrap_or(USER_AGENT))
            .build()
            .map_err(|e| ScrapeError::Config(format!("could not build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn send(&self, request: &Request) -> Result<reqwest::Response, ScrapeError> {
        let builder = match request {
            Request::Get(url) => self.client.get(url),
            Request::PostForm { url, form } => self.client.post(url).form(form),
        };
        let url = request.url();
        let response = builder
            .send()
            .await
            .map_err(|e| ScrapeError::fetch(url, describe(&e)))?;
        response
            .error_for_status()
            .map_err(|e| ScrapeError::fetch(url, describe(&e)))
    }
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out ({e})")
    } else if let Some(status) = e.status() {
        format!("HTTP {status}")
    } else {
        e.to_string()
    }
}

impl Fetch for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(url = %request.url()))]
    async fn text(&self, request: &Request) -> Result<String, ScrapeError> {
        let t0 = Instant::now();
        let body = self
            .send(request)
            .await?
            .text()
            .await
            .map_err(|e| ScrapeError::fetch(request.url(), describe(&e)))?;
        debug!(bytes = body.len(), elapsed_ms = t0.elapsed().as_millis() as u64, "Fetched page");
        Ok(body)
    }

    #[instrument(level = "debug", skip_all, fields(url = %request.url()))]
    async fn bytes(&self, request: &Request) -> Result<Vec<u8>, ScrapeError> {
        let body = self
            .send(request)
            .await?
            .bytes()
            .await
            .map_err(|e| ScrapeError::fetch(request.url(), describe(&e)))?;
        Ok(body.to_vec())
    }
}

/// Wrapper that retries fetch failures of any [`Fetch`] with backoff.
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=max_jitter)
/// ```
pub struct RetryFetch<T> {
    /// The wrapped fetcher
    inner: T,
    /// Retries after the first attempt; 0 disables retrying
    max_retries: usize,
    /// Delay before the first retry
    base_delay: Duration,
    /// Cap on the exponential delay, before jitter
    max_delay: Duration,
    /// Upper bound of the random jitter added to each delay
    max_jitter: Duration,
}

impl<T: Fetch> RetryFetch<T> {
    /// Wrap `inner` with retries.
    ///
    /// # Arguments
    ///
    /// * `inner` - The fetcher to retry
    /// * `max_retries` - Retries after the first attempt (2 by default in config)
    /// * `base_delay` - Delay before the first retry, doubled for each later one
    ///
    /// # Example
    ///
    /// ```ignore
    /// let http = HttpFetcher::new(Duration::from_secs(30), None)?;
    /// let fetch = RetryFetch::new(http, 2, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            delay
        } else {
            delay + Duration::from_millis(rng().random_range(0..=jitter_ms))
        }
    }

    async fn retrying<'a, O, F, Fut>(&'a self, request: &'a Request, op: F) -> Result<O, ScrapeError>
    where
        F: Fn(&'a T, &'a Request) -> Fut,
        Fut: std::future::Future<Output = Result<O, ScrapeError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match op(&self.inner, request).await {
                Ok(out) => return Ok(out),
                Err(e @ ScrapeError::Fetch { .. }) => {
                    attempt += 1;
                    let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total,
                            url = %request.url(),
                            error = %e,
                            "fetch exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total,
                        ?delay,
                        url = %request.url(),
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T: Fetch> Fetch for RetryFetch<T> {
    async fn text(&self, request: &Request) -> Result<String, ScrapeError> {
        self.retrying(request, |inner, req| inner.text(req)).await
    }

    async fn bytes(&self, request: &Request) -> Result<Vec<u8>, ScrapeError> {
        self.retrying(request, |inner, req| inner.bytes(req)).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned bodies keyed by request; unknown requests are 404s.
    #[derive(Debug, Default)]
    pub struct FakeFetch {
        pages: HashMap<Request, String>,
        pub calls: AtomicUsize,
    }

    impl FakeFetch {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, request: Request, body: &str) -> Self {
            self.pages.insert(request, body.to_string());
            self
        }
    }

    impl Fetch for FakeFetch {
        async fn text(&self, request: &Request) -> Result<String, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .get(request)
                .cloned()
                .ok_or_else(|| ScrapeError::fetch(request.url(), "HTTP 404 Not Found"))
        }

        async fn bytes(&self, request: &Request) -> Result<Vec<u8>, ScrapeError> {
            self.text(request).await.map(String::into_bytes)
        }
    }

    /// Fails the first `failures` calls, then succeeds.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
        error: fn(&str) -> ScrapeError,
    }

    impl Fetch for Flaky {
        async fn text(&self, request: &Request) -> Result<String, ScrapeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err((self.error)(request.url()))
            } else {
                Ok("ok".to_string())
            }
        }

        async fn bytes(&self, request: &Request) -> Result<Vec<u8>, ScrapeError> {
            self.text(request).await.map(String::into_bytes)
        }
    }

    fn flaky(failures: usize, error: fn(&str) -> ScrapeError) -> RetryFetch<Flaky> {
        RetryFetch::new(
            Flaky {
                failures,
                calls: AtomicUsize::new(0),
                error,
            },
            2,
            Duration::from_millis(1),
        )
        .with_max_jitter(Duration::ZERO)
    }

    fn timeout(url: &str) -> ScrapeError {
        ScrapeError::fetch(url, "timed out")
    }

    fn unparseable(url: &str) -> ScrapeError {
        ScrapeError::parse(url, "no table")
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let fetch = flaky(2, timeout);
        let body = fetch.text(&Request::get("http://example.test")).await.unwrap();
        assert_eq!(body, "ok");
        assert_eq!(fetch.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let fetch = flaky(5, timeout);
        let err = fetch.text(&Request::get("http://example.test")).await.unwrap_err();
        assert_eq!(err.kind(), "fetch");
        assert_eq!(fetch.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_fetch_errors_are_not_retried() {
        let fetch = flaky(5, unparseable);
        let err = fetch.text(&Request::get("http://example.test")).await.unwrap_err();
        assert_eq!(err.kind(), "parse");
        assert_eq!(fetch.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let fetch = RetryFetch::new(FakeFetch::new(), 10, Duration::from_secs(1))
            .with_max_jitter(Duration::ZERO);
        assert_eq!(fetch.delay_for(1), Duration::from_secs(1));
        assert_eq!(fetch.delay_for(3), Duration::from_secs(4));
        assert_eq!(fetch.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_post_form_request_url() {
        let req = Request::post_form("http://example.test/list", &[("report_year", "2020".to_string())]);
        assert_eq!(req.url(), "http://example.test/list");
        assert_eq!(
            req,
            Request::PostForm {
                url: "http://example.test/list".to_string(),
                form: vec![("report_year".to_string(), "2020".to_string())],
            }
        );
    }
}
