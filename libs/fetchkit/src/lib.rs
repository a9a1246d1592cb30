//! Composable HTTP fetch pipeline for scraping and notification workflows.
//!
//! The crate is built around one capability, [`Fetch`]: execute a prepared
//! request, get back a streaming response or a classified error. Behaviors
//! are layered by wrapping fetchers around a terminal [`HttpFetcher`]:
//!
//! - [`HttpFetcher`] dispatches over pooled transports (shared process-wide
//!   through a bounded LRU keyed by transport configuration), injects
//!   standard headers, and follows redirects with a redacted Referer;
//! - [`RetryFetcher`] retries transient failures with exponential backoff,
//!   full jitter, and `Retry-After` support, gated on method idempotency;
//! - [`StatusCodeFetcher`], [`MimeTypeFetcher`], and [`MaxBytesFetcher`]
//!   enforce status, media-type, and body-size invariants, draining and
//!   closing rejected bodies so connections stay reusable;
//! - [`UserAgentFetcher`] and [`LoggingFetcher`] round out the recommended
//!   stack.
//!
//! Credentials and sensitive query parameters never reach logs, error
//! messages, or outgoing Referer headers; see [`redact`].
//!
//! ```no_run
//! use fetchkit::{Chain, Fetch, FetchRequest, HttpFetcher, RetryConfig};
//!
//! # async fn run() -> fetchkit::Result<()> {
//! let fetcher = Chain::new(HttpFetcher::new())
//!     .max_bytes(4 * 1024 * 1024)
//!     .allow_statuses([200])
//!     .allow_mime_types(["text/html", "application/rss+xml"])
//!     .retry(RetryConfig::default())
//!     .random_user_agent()
//!     .logging()
//!     .build();
//!
//! let response = fetcher
//!     .execute(FetchRequest::get("https://example.com/feed".parse().unwrap()))
//!     .await?;
//! let page = response.body.text().await?;
//! # let _ = page;
//! # Ok(())
//! # }
//! ```

mod agent;
mod client;
mod config;
mod error;
mod fetch;
mod limit;
mod logging;
mod mime;
pub mod redact;
mod request;
mod response;
mod retry;
mod status;
mod transport;

#[cfg(test)]
mod testutil;

pub use fetchkit_errors::{Error, Kind, Result};

pub use agent::{UserAgentFetcher, DEFAULT_USER_AGENTS};
pub use client::{HttpFetcher, HttpFetcherBuilder};
pub use config::{
    is_idempotent_method, RetryConfig, BODY_SNIPPET_BYTES, DEFAULT_ACCEPT,
    DEFAULT_ACCEPT_LANGUAGE, DEFAULT_IDLE_CONN_TIMEOUT, DEFAULT_MAX_BODY_BYTES,
    DEFAULT_MAX_IDLE_CONNS, DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_RETRY_DELAY,
    DEFAULT_TLS_HANDSHAKE_TIMEOUT, DEFAULT_USER_AGENT, MAX_ALLOWED_RETRIES, MAX_DRAIN_BYTES,
    MAX_TRANSPORT_CACHE_SIZE, MIN_RETRY_DELAY_FLOOR, NO_LIMIT,
};
pub use error::{MaxRetriesExceeded, StatusError};
pub use fetch::{Chain, Fetch};
pub use limit::MaxBytesFetcher;
pub use logging::LoggingFetcher;
pub use mime::MimeTypeFetcher;
pub use request::{FetchBody, FetchRequest, GetBody};
pub use response::{parse_retry_after, Body, FetchResponse};
pub use retry::RetryFetcher;
pub use status::StatusCodeFetcher;
pub use transport::{shared_transport, CookieJar, ProxyConfig, Transport, TransportConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use http::StatusCode;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Compile-time assertion that the shared types cross task boundaries.
    #[test]
    fn shared_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpFetcher>();
        assert_send_sync::<Transport>();
        assert_send_sync::<Arc<dyn Fetch>>();
        assert_send_sync::<FetchRequest>();
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn recommended_chain() -> Arc<dyn Fetch> {
        Chain::new(HttpFetcher::builder().no_proxy().build())
            .max_bytes(1024 * 1024)
            .allow_statuses([200])
            .allow_mime_types(["text/"])
            .retry(RetryConfig::new(
                2,
                Duration::from_secs(1),
                Duration::from_secs(2),
            ))
            .random_user_agent()
            .logging()
            .build()
    }

    #[tokio::test]
    async fn chain_recovers_from_a_transient_500() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/flaky",
            get({
                let hits = hits.clone();
                move || {
                    let hits = hits.clone();
                    async move {
                        if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                            (StatusCode::INTERNAL_SERVER_ERROR, "oops")
                        } else {
                            (StatusCode::OK, "recovered")
                        }
                    }
                }
            }),
        );
        let addr = serve(app).await;

        let fetcher = recommended_chain();
        let resp = fetcher
            .execute(FetchRequest::get(format!("http://{addr}/flaky").parse().unwrap()))
            .await
            .unwrap();

        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body.bytes().await.unwrap(), "recovered");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn chain_rejects_disallowed_media_types() {
        let app = Router::new().route(
            "/data",
            get(|| async {
                (
                    [(http::header::CONTENT_TYPE, "application/octet-stream")],
                    "binary",
                )
            }),
        );
        let addr = serve(app).await;

        let fetcher = recommended_chain();
        let err = fetcher
            .execute(FetchRequest::get(format!("http://{addr}/data").parse().unwrap()))
            .await
            .unwrap_err();

        assert!(err.is(Kind::InvalidInput), "{err}");
        assert!(err.to_string().contains("unsupported media type"), "{err}");
    }

    #[tokio::test]
    async fn chain_classifies_404_without_retrying() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/missing",
            get({
                let hits = hits.clone();
                move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        (StatusCode::NOT_FOUND, "gone")
                    }
                }
            }),
        );
        let addr = serve(app).await;

        let fetcher = recommended_chain();
        let err = fetcher
            .execute(FetchRequest::get(
                format!("http://{addr}/missing?token=supersecret").parse().unwrap(),
            ))
            .await
            .unwrap_err();

        assert!(err.is(Kind::NotFound), "{err}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // The error's rendered form never leaks the query secret.
        assert!(!err.to_string().contains("supersecret"), "{err}");
    }

    #[tokio::test]
    async fn chain_close_cascades_to_the_terminal() {
        let fetcher = Chain::new(HttpFetcher::builder().no_proxy().disable_transport_cache().build())
            .allow_statuses([200])
            .retry(RetryConfig::disabled())
            .logging()
            .build();
        fetcher.close().await.unwrap();
    }
}
