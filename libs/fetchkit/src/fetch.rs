use std::sync::Arc;

use async_trait::async_trait;
use fetchkit_errors::Result;

use crate::agent::UserAgentFetcher;
use crate::config::RetryConfig;
use crate::limit::MaxBytesFetcher;
use crate::logging::LoggingFetcher;
use crate::mime::MimeTypeFetcher;
use crate::request::FetchRequest;
use crate::response::FetchResponse;
use crate::retry::RetryFetcher;
use crate::status::StatusCodeFetcher;

/// One HTTP fetch per invocation, with classified errors.
///
/// Layers compose linearly: each wraps an inner `Fetch`, may adjust the
/// request on the way down or govern the response on the way up, and must be
/// safe for arbitrary concurrent use. `close` cascades to the terminal,
/// which releases only resources it owns.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Perform one fetch.
    ///
    /// # Errors
    /// Returns a classified error for network failures, rejected responses,
    /// unusable requests, cancellation, or deadline expiry.
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse>;

    /// Release owned resources; layers forward to their delegate.
    ///
    /// # Errors
    /// Propagates a delegate's release failure.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Builder for the recommended layer stack.
///
/// Starts at the terminal fetcher and wraps outward, so calls read
/// innermost-first:
///
/// ```no_run
/// use fetchkit::{Chain, HttpFetcher, RetryConfig};
///
/// let fetcher = Chain::new(HttpFetcher::new())
///     .max_bytes(1024 * 1024)
///     .allow_statuses([200, 304])
///     .allow_mime_types(["text/html", "application/xml"])
///     .retry(RetryConfig::default())
///     .random_user_agent()
///     .logging()
///     .build();
/// ```
pub struct Chain {
    inner: Arc<dyn Fetch>,
}

impl Chain {
    #[must_use]
    pub fn new(terminal: impl Fetch + 'static) -> Self {
        Self {
            inner: Arc::new(terminal),
        }
    }

    #[must_use]
    pub fn from_arc(inner: Arc<dyn Fetch>) -> Self {
        Self { inner }
    }

    /// Cap response bodies; see `MaxBytesFetcher` for the limit sentinels.
    #[must_use]
    pub fn max_bytes(self, limit: i64) -> Self {
        Self {
            inner: MaxBytesFetcher::layer(self.inner, limit),
        }
    }

    /// Reject statuses outside the allow-list (default `{200}` when empty).
    #[must_use]
    pub fn allow_statuses(self, statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            inner: Arc::new(StatusCodeFetcher::with_allowed(self.inner, statuses)),
        }
    }

    /// Reject responses whose media type is outside the allow-list.
    #[must_use]
    pub fn allow_mime_types<I, S>(self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            inner: Arc::new(MimeTypeFetcher::new(self.inner, types)),
        }
    }

    /// Retry transient failures for idempotent requests.
    #[must_use]
    pub fn retry(self, config: RetryConfig) -> Self {
        Self {
            inner: Arc::new(RetryFetcher::new(self.inner, config)),
        }
    }

    /// Inject a random browser User-Agent when the caller set none.
    #[must_use]
    pub fn random_user_agent(self) -> Self {
        Self {
            inner: Arc::new(UserAgentFetcher::new(self.inner)),
        }
    }

    /// Structured request/response logging with redaction.
    #[must_use]
    pub fn logging(self) -> Self {
        Self {
            inner: Arc::new(LoggingFetcher::new(self.inner)),
        }
    }

    #[must_use]
    pub fn build(self) -> Arc<dyn Fetch> {
        self.inner
    }
}
