use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use fetchkit_errors::{Error, Kind};
use http::header::HeaderMap;
use http::StatusCode;

use crate::config::BODY_SNIPPET_BYTES;
use crate::redact;
use crate::response::FetchResponse;

/// Marker cause attached when the retry budget runs out.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("max retries exceeded")]
pub struct MaxRetriesExceeded;

/// A response rejected on its status code.
///
/// Carries enough redacted context to debug the failure without re-fetching:
/// the status line, the scrubbed URL and headers, and a bounded snippet of
/// the body. The body itself has been drained and closed by the time this
/// value exists.
#[derive(Debug)]
pub struct StatusError {
    pub status: StatusCode,
    pub status_text: String,
    /// Redacted request URL.
    pub url: String,
    /// Response headers with credential-bearing values masked.
    pub headers: HeaderMap,
    /// Up to 4 KiB of the response body, lossy UTF-8.
    pub body_snippet: String,
    /// Parsed `Retry-After`, when the upstream sent one.
    pub retry_after: Option<Duration>,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl StatusError {
    /// Consume a rejected response: capture a bounded snippet, drain the
    /// rest, and close the body.
    pub(crate) async fn from_response(
        mut response: FetchResponse,
        cause: Option<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        let snippet = response.body.read_snippet(BODY_SNIPPET_BYTES).await;
        let status = response.status;
        let status_text = response.status_text().to_owned();
        let url = redact::redact_url(&response.url);
        let headers = redact::redact_headers(&response.headers);
        let retry_after = response.retry_after();
        response.drain().await;

        Self {
            status,
            status_text,
            url,
            headers,
            body_snippet: snippet,
            retry_after,
            source: cause,
        }
    }

    /// Taxonomy kind for this status.
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self.status.as_u16() {
            404 => Kind::NotFound,
            403 => Kind::Forbidden,
            429 | 500..=599 => Kind::Unavailable,
            _ => Kind::InvalidInput,
        }
    }

    /// Lift into the shared taxonomy, classified by status.
    #[must_use]
    pub(crate) fn into_error(self) -> Error {
        let kind = self.kind();
        let message = format!("unexpected status {}", self.status.as_u16());
        Error::wrap(self, kind, message)
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {} {} from {}", self.status.as_u16(), self.status_text, self.url)?;
        if !self.body_snippet.is_empty() {
            write!(f, ": {}", self.body_snippet)?;
        }
        Ok(())
    }
}

impl StdError for StatusError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|s| s as _)
    }
}
