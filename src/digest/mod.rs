//! Retrieval and parsing of daily newsletter digests.
//!
//! - [`fetcher`] - HTTP retrieval of one digest page, with failure classification
//! - [`rate_limit`] - process-wide minimum spacing between source requests
//! - [`parser`] - turning a page snapshot into ordered [`ArticleRecord`](crate::storage::ArticleRecord)s
//!
//! The orchestrator only sees the [`DigestSource`] and [`DigestParser`] traits,
//! so markup specifics never leak into retry or state-machine logic.

mod fetcher;
mod parser;
mod rate_limit;

use chrono::NaiveDate;
use url::Url;

pub use fetcher::{build_http_client, DigestSource, FetchClient, FetchError, FetchErrorKind};
pub use parser::{DigestParser, ParseError, TldrHtmlParser};
pub use rate_limit::{Clock, FixedClock, RateLimiter, SystemClock};

/// A digest page as retrieved, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent {
    pub date: NaiveDate,
    pub newsletter_type: String,
    /// Final URL after redirects; relative article links resolve against it.
    pub url: Url,
    pub body: String,
}
