use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use thiserror::Error;
use url::Url;

use super::rate_limit::{Clock, RateLimiter};
use super::RawContent;

const MAX_DIGEST_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors from retrieving one digest page.
///
/// The variants are the retry classes the orchestrator acts on; transport
/// details are flattened into the message so the error stays `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// No digest exists for this date (404/410, redirected away, or future date).
    #[error("Digest not published")]
    NotFound,
    /// Server returned 429; `retry_after` is the server's hint, if any.
    #[error("Rate limited by source{}", .retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },
    /// Timeout, connection failure, 5xx or truncated body.
    #[error("Transient fetch failure: {0}")]
    Transient(String),
    /// A response that retrying will not fix.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Discriminant of [`FetchError`], for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    NotFound,
    RateLimited,
    Transient,
    Malformed,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::NotFound => FetchErrorKind::NotFound,
            FetchError::RateLimited { .. } => FetchErrorKind::RateLimited,
            FetchError::Transient(_) => FetchErrorKind::Transient,
            FetchError::Malformed(_) => FetchErrorKind::Malformed,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_builder() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Transient(err.to_string())
        }
    }
}

/// Anything that can produce the raw digest page for a date.
#[async_trait]
pub trait DigestSource: Send + Sync {
    async fn fetch(&self, date: NaiveDate, newsletter_type: &str) -> Result<RawContent, FetchError>;
}

/// HTTP digest source for `{base_url}/{newsletter_type}/{YYYY-MM-DD}`.
///
/// Every request goes through the shared [`RateLimiter`]. Dates after
/// `clock.today()` return [`FetchError::NotFound`] without touching the network.
pub struct FetchClient {
    client: reqwest::Client,
    base_url: Url,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl FetchClient {
    pub fn new(
        client: reqwest::Client,
        mut base_url: Url,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        // Url::join replaces the last segment unless the base ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client,
            base_url,
            limiter,
            clock,
            timeout,
        }
    }

    pub fn digest_url(&self, date: NaiveDate, newsletter_type: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(&format!("{}/{}", newsletter_type, date.format("%Y-%m-%d")))
            .map_err(|e| FetchError::Malformed(format!("invalid digest URL: {e}")))
    }

    async fn request(&self, url: &Url, date: NaiveDate) -> Result<(Url, String), FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;

        let status = response.status();
        match status.as_u16() {
            404 | 410 => return Err(FetchError::NotFound),
            429 => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(FetchError::RateLimited { retry_after });
            }
            _ if status.is_server_error() => {
                return Err(FetchError::Transient(format!("HTTP {}", status.as_u16())));
            }
            _ if !status.is_success() => {
                return Err(FetchError::Malformed(format!("HTTP {}", status.as_u16())));
            }
            _ => {}
        }

        // Missing digests redirect to the archive page instead of returning 404
        let final_url = response.url().clone();
        let date_str = date.format("%Y-%m-%d").to_string();
        if !final_url.path().contains(&date_str) {
            tracing::debug!(requested = %url, landed = %final_url, "Redirected away from digest");
            return Err(FetchError::NotFound);
        }

        let bytes = read_limited_bytes(response, MAX_DIGEST_SIZE).await?;
        let body = String::from_utf8(bytes)
            .map_err(|e| FetchError::Malformed(format!("body is not valid UTF-8: {e}")))?;
        if body.trim().is_empty() {
            return Err(FetchError::Malformed("empty body".to_string()));
        }

        Ok((final_url, body))
    }
}

/// Shared HTTP client for the digest source and the translator.
///
/// Redirects are capped at 3 hops and loops are rejected; the fetcher then
/// inspects the final URL to detect "digest missing" redirects.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(redirect_policy())
        .user_agent(concat!("tldr-harvest/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(timeout)
        .build()
}

fn redirect_policy() -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

#[async_trait]
impl DigestSource for FetchClient {
    async fn fetch(&self, date: NaiveDate, newsletter_type: &str) -> Result<RawContent, FetchError> {
        if date > self.clock.today() {
            tracing::debug!(%date, "Date is in the future, not fetching");
            return Err(FetchError::NotFound);
        }

        let url = self.digest_url(date, newsletter_type)?;
        self.limiter.acquire().await;

        tracing::debug!(%url, "Fetching digest");
        let (final_url, body) = tokio::time::timeout(self.timeout, self.request(&url, date))
            .await
            .map_err(|_| {
                FetchError::Transient(format!("timed out after {}s", self.timeout.as_secs()))
            })??;

        tracing::debug!(%url, bytes = body.len(), "Fetched digest");
        Ok(RawContent {
            date,
            newsletter_type: newsletter_type.to_string(),
            url: final_url,
            body,
        })
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::Malformed(format!(
                "response exceeds {} bytes",
                limit
            )));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::Transient(e.to_string()))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::Malformed(format!(
                "response exceeds {} bytes",
                limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::Transient(format!(
                "incomplete response: expected {} bytes, received {}",
                expected,
                bytes.len()
            )));
        }
    }

    Ok(bytes)
}
