use std::time::Duration;

/// Default User-Agent sent when neither the caller nor an outer layer set one.
pub const DEFAULT_USER_AGENT: &str = concat!("fetchkit/", env!("CARGO_PKG_VERSION"));

/// Permissive, HTML-favoring Accept value injected when the caller set none.
pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Default locale injected when the caller set no Accept-Language.
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Upper bound on cached transports; overflow evicts the least recently used.
pub const MAX_TRANSPORT_CACHE_SIZE: usize = 100;

/// Default cap on idle pooled connections per host.
pub const DEFAULT_MAX_IDLE_CONNS: usize = 100;

/// Idle pooled connections are dropped after this long unused.
pub const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);

/// Bounds TCP + TLS connection setup.
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How much of a discarded body is read before the stream is dropped.
pub const MAX_DRAIN_BYTES: u64 = 64 * 1024;

/// Cap on the body snippet embedded in status errors.
pub const BODY_SNIPPET_BYTES: usize = 4 * 1024;

/// Body-size cap applied when the caller asks for a default limit.
pub const DEFAULT_MAX_BODY_BYTES: i64 = 64 * 1024 * 1024;

/// Sentinel limit that disables body-size enforcement entirely.
pub const NO_LIMIT: i64 = -1;

/// Redirect hops followed before the last response is handed back.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Retry counts are clamped to this many retries after the first attempt.
pub const MAX_ALLOWED_RETRIES: u32 = 10;

/// Fallback ceiling for retry delays when the configured one is unusable.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Configured minimum retry delays below this are raised to it.
pub const MIN_RETRY_DELAY_FLOOR: Duration = Duration::from_secs(1);

/// Idempotent per RFC 9110: safe to repeat without changing the outcome.
/// POST and PATCH are not, and degrade to a single attempt under retry.
#[must_use]
pub fn is_idempotent_method(method: &http::Method) -> bool {
    matches!(
        *method,
        http::Method::GET
            | http::Method::HEAD
            | http::Method::PUT
            | http::Method::DELETE
            | http::Method::OPTIONS
            | http::Method::TRACE
    )
}

/// Retry policy: attempt budget plus the backoff window.
///
/// Delays grow exponentially from `min_delay` (doubling per retry, capped at
/// `max_delay`), are fully jittered over `[0, base]`, and can be overridden
/// upward by a server-supplied `Retry-After` (itself capped at `max_delay`).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt. Total attempts = 1 + `max_retries`.
    pub max_retries: u32,
    /// First backoff base; also the floor for degenerate computed delays.
    pub min_delay: Duration,
    /// Ceiling for every wait, including server-directed ones.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay: MIN_RETRY_DELAY_FLOOR,
            max_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_retries: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            min_delay,
            max_delay,
        }
    }

    /// No retries; the wrapped fetcher becomes a pass-through.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Clamp the configuration into its supported envelope:
    /// retries to `[0, MAX_ALLOWED_RETRIES]`, `min_delay` up to the floor,
    /// and `max_delay` coerced when it undercuts `min_delay` (to the default
    /// ceiling if zero, else to `min_delay`).
    #[must_use]
    pub(crate) fn normalized(mut self) -> Self {
        self.max_retries = self.max_retries.min(MAX_ALLOWED_RETRIES);
        if self.min_delay < MIN_RETRY_DELAY_FLOOR {
            self.min_delay = MIN_RETRY_DELAY_FLOOR;
        }
        if self.max_delay < self.min_delay {
            self.max_delay = if self.max_delay.is_zero() {
                DEFAULT_MAX_RETRY_DELAY
            } else {
                self.min_delay
            };
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_methods() {
        assert!(is_idempotent_method(&http::Method::GET));
        assert!(is_idempotent_method(&http::Method::HEAD));
        assert!(is_idempotent_method(&http::Method::PUT));
        assert!(is_idempotent_method(&http::Method::DELETE));
        assert!(is_idempotent_method(&http::Method::OPTIONS));
        assert!(is_idempotent_method(&http::Method::TRACE));
        assert!(!is_idempotent_method(&http::Method::POST));
        assert!(!is_idempotent_method(&http::Method::PATCH));
    }

    #[test]
    fn retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.min_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn normalize_clamps_retry_count() {
        let config = RetryConfig::new(99, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(config.normalized().max_retries, MAX_ALLOWED_RETRIES);
    }

    #[test]
    fn normalize_raises_min_delay_to_floor() {
        let config = RetryConfig::new(1, Duration::from_millis(5), Duration::from_secs(30));
        assert_eq!(config.normalized().min_delay, MIN_RETRY_DELAY_FLOOR);
    }

    #[test]
    fn normalize_coerces_zero_max_delay_to_default() {
        let config = RetryConfig::new(1, Duration::from_secs(2), Duration::ZERO);
        assert_eq!(config.normalized().max_delay, DEFAULT_MAX_RETRY_DELAY);
    }

    #[test]
    fn normalize_coerces_small_max_delay_to_min() {
        let config = RetryConfig::new(1, Duration::from_secs(5), Duration::from_secs(2));
        let normalized = config.normalized();
        assert_eq!(normalized.max_delay, normalized.min_delay);
        assert_eq!(normalized.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn disabled_has_no_retries() {
        assert_eq!(RetryConfig::disabled().max_retries, 0);
    }
}
