//! Idempotency-gated retries with exponential backoff, full jitter, and
//! server-directed delays.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fetchkit_errors::{Error, Kind, Result};
use rand::Rng;

use crate::config::{is_idempotent_method, RetryConfig};
use crate::error::{MaxRetriesExceeded, StatusError};
use crate::fetch::Fetch;
use crate::request::{FetchBody, FetchRequest};
use crate::response::FetchResponse;

/// Retry wrapper around an inner fetcher.
///
/// Performs up to `1 + effective_max_retries` attempts, where the effective
/// budget collapses to zero for non-idempotent methods (POST, PATCH). Between
/// attempts it waits `min(2^(n-1) * min_delay, max_delay)` with full jitter,
/// unless the upstream sent a larger (capped) `Retry-After`. Waits race the
/// request's cancellation token and deadline.
pub struct RetryFetcher {
    inner: Arc<dyn Fetch>,
    config: RetryConfig,
}

impl RetryFetcher {
    #[must_use]
    pub fn new(inner: Arc<dyn Fetch>, config: RetryConfig) -> Self {
        Self {
            inner,
            config: config.normalized(),
        }
    }

    /// Skip normalization so timing-sensitive tests can run sub-second
    /// backoff windows.
    #[cfg(test)]
    fn with_raw_config(inner: Arc<dyn Fetch>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Delay before retry `attempt` (1-based): exponential base with full
    /// jitter, overridden upward by a capped server-directed delay, floored
    /// at `min_delay` when the result degenerates below a millisecond.
    fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let base = self
            .config
            .min_delay
            .saturating_mul(1u32 << shift)
            .min(self.config.max_delay);

        let mut delay = if base.is_zero() {
            Duration::ZERO
        } else {
            let ceiling = u64::try_from(base.as_nanos()).unwrap_or(u64::MAX);
            Duration::from_nanos(rand::rng().random_range(0..=ceiling))
        };

        if let Some(server_directed) = retry_after {
            let capped = server_directed.min(self.config.max_delay);
            if capped > delay {
                delay = capped;
            }
        }

        if delay < Duration::from_millis(1) {
            delay = self.config.min_delay;
        }
        delay
    }
}

/// Persistent-looking statuses worth another attempt: 429, and 5xx except
/// the ones that cannot improve on retry (501, 505, 511).
fn should_retry_status(status: u16) -> bool {
    status == 429 || (status >= 500 && !matches!(status, 501 | 505 | 511))
}

/// Transient-failure policy for errors. Unknown failures count as transient;
/// anything the caller did wrong, was denied, or that cannot change on a
/// second attempt does not.
fn is_retriable(err: &Error) -> bool {
    match err.kind() {
        Kind::Canceled
        | Kind::DeadlineExceeded
        | Kind::InvalidInput
        | Kind::Forbidden
        | Kind::NotFound
        | Kind::ExecutionFailed => false,
        Kind::Unavailable => !matches!(
            err.find_source::<StatusError>().map(|s| s.status.as_u16()),
            Some(501 | 505 | 511)
        ),
        _ => true,
    }
}

async fn deadline_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        }
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Fetch for RetryFetcher {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse> {
        let FetchRequest {
            method,
            url,
            headers,
            body,
            get_body,
            cancel,
            deadline,
        } = request;

        if self.config.max_retries > 0
            && matches!(body, Some(FetchBody::Stream(_)))
            && get_body.is_none()
        {
            return Err(Error::new(
                Kind::InvalidInput,
                "streaming request body has no rewind thunk; provide one or disable retries",
            ));
        }

        let effective_max_retries = if is_idempotent_method(&method) {
            self.config.max_retries
        } else {
            0
        };

        let body_template = body.as_ref().and_then(FetchBody::try_clone);
        let mut next_body = body;
        let mut attempt: u32 = 0;
        let mut retry_after: Option<Duration> = None;
        let mut retry_reason = String::new();

        loop {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt, retry_after);
                tracing::warn!(
                    target: "fetchkit::retry",
                    attempt,
                    remaining = effective_max_retries - attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    reason = %retry_reason,
                    retry_after_secs = retry_after.map(|d| d.as_secs()),
                    url = %crate::redact::redact_url(&url),
                    "retrying request"
                );
                retry_after = None;

                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => {
                        return Err(Error::new(Kind::Canceled, "request canceled during retry wait"));
                    }
                    () = deadline_expired(deadline) => {
                        return Err(Error::new(
                            Kind::DeadlineExceeded,
                            "request deadline exceeded during retry wait",
                        ));
                    }
                }

                next_body = if let Some(thunk) = &get_body {
                    match thunk() {
                        Ok(fresh) => Some(fresh),
                        Err(e) => {
                            return Err(Error::wrap(
                                e,
                                Kind::InvalidInput,
                                "request body rewind failed",
                            ));
                        }
                    }
                } else if let Some(template) = &body_template {
                    template.try_clone()
                } else {
                    None
                };
            }

            let attempt_request = FetchRequest {
                method: method.clone(),
                url: url.clone(),
                headers: headers.clone(),
                body: next_body.take(),
                get_body: get_body.clone(),
                cancel: cancel.clone(),
                deadline,
            };

            match self.inner.execute(attempt_request).await {
                Ok(response) => {
                    let status = response.status.as_u16();
                    if !should_retry_status(status) {
                        return Ok(response);
                    }
                    if attempt >= effective_max_retries {
                        // Budget exhausted on a persistent status: surface it
                        // as a classified error carrying a body snippet.
                        let status_error = StatusError::from_response(
                            response,
                            Some(Box::new(MaxRetriesExceeded)),
                        )
                        .await;
                        return Err(status_error.into_error());
                    }
                    retry_after = response.retry_after();
                    retry_reason = format!("status_code_{status}");
                    // Consume the rejected body so the connection is
                    // reusable for the next attempt.
                    response.drain().await;
                }
                Err(err) => {
                    if err.is(Kind::Canceled) || err.is(Kind::DeadlineExceeded) {
                        return Err(err);
                    }
                    if !is_retriable(&err) {
                        return Err(err);
                    }
                    if attempt >= effective_max_retries {
                        return Err(Error::wrap(err, Kind::Unavailable, "max retries exceeded"));
                    }
                    retry_after = err.find_source::<StatusError>().and_then(|s| s.retry_after);
                    retry_reason = "network_error".to_owned();
                }
            }

            attempt += 1;
        }
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
