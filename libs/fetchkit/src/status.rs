use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use fetchkit_errors::Result;

use crate::error::StatusError;
use crate::fetch::Fetch;
use crate::request::FetchRequest;
use crate::response::FetchResponse;

/// Rejects responses whose status is outside an allow-list (default `{200}`).
///
/// A rejected response never reaches the caller: its body is snapshotted into
/// a bounded snippet, drained, and closed, and a classified [`StatusError`]
/// comes back instead.
pub struct StatusCodeFetcher {
    inner: Arc<dyn Fetch>,
    allowed: HashSet<u16>,
}

impl StatusCodeFetcher {
    #[must_use]
    pub fn new(inner: Arc<dyn Fetch>) -> Self {
        Self::with_allowed(inner, [200])
    }

    /// An empty allow-list falls back to the default `{200}`.
    #[must_use]
    pub fn with_allowed(inner: Arc<dyn Fetch>, statuses: impl IntoIterator<Item = u16>) -> Self {
        let mut allowed: HashSet<u16> = statuses.into_iter().collect();
        if allowed.is_empty() {
            allowed.insert(200);
        }
        Self { inner, allowed }
    }
}

#[async_trait]
impl Fetch for StatusCodeFetcher {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse> {
        let response = self.inner.execute(request).await?;
        if self.allowed.contains(&response.status.as_u16()) {
            return Ok(response);
        }
        Err(StatusError::from_response(response, None).await.into_error())
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{response, response_with, test_url, tracked_body};
    use fetchkit_errors::{Error, Kind};
    use http::header::HeaderMap;
    use http::StatusCode;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    struct OneShotFetcher {
        response: Mutex<Option<FetchResponse>>,
    }

    impl OneShotFetcher {
        fn new(response: FetchResponse) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(response)),
            })
        }
    }

    #[async_trait]
    impl Fetch for OneShotFetcher {
        async fn execute(&self, _request: FetchRequest) -> Result<FetchResponse> {
            self.response
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::new(Kind::ExecutionFailed, "already consumed"))
        }
    }

    #[tokio::test]
    async fn default_allows_only_200() {
        let inner = OneShotFetcher::new(response(StatusCode::OK, "fine"));
        let fetcher = StatusCodeFetcher::new(inner);
        let resp = fetcher.execute(FetchRequest::get(test_url())).await.unwrap();
        assert_eq!(resp.body.bytes().await.unwrap(), "fine");
    }

    #[tokio::test]
    async fn rejects_404_as_not_found_with_snippet() {
        let inner = OneShotFetcher::new(response(StatusCode::NOT_FOUND, "nothing here"));
        let fetcher = StatusCodeFetcher::new(inner);

        let err = fetcher
            .execute(FetchRequest::get(test_url()))
            .await
            .unwrap_err();
        assert!(err.is(Kind::NotFound));
        let status_error = err.find_source::<StatusError>().unwrap();
        assert_eq!(status_error.status, StatusCode::NOT_FOUND);
        assert_eq!(status_error.body_snippet, "nothing here");
    }

    #[tokio::test]
    async fn rejects_403_as_forbidden_and_429_as_unavailable() {
        for (status, kind) in [
            (StatusCode::FORBIDDEN, Kind::Forbidden),
            (StatusCode::TOO_MANY_REQUESTS, Kind::Unavailable),
            (StatusCode::BAD_GATEWAY, Kind::Unavailable),
        ] {
            let inner = OneShotFetcher::new(response(status, ""));
            let fetcher = StatusCodeFetcher::new(inner);
            let err = fetcher
                .execute(FetchRequest::get(test_url()))
                .await
                .unwrap_err();
            assert!(err.is(kind), "status {status}");
        }
    }

    #[tokio::test]
    async fn custom_allow_list_is_honored() {
        let inner = OneShotFetcher::new(response(StatusCode::NOT_MODIFIED, ""));
        let fetcher = StatusCodeFetcher::with_allowed(inner, [200, 304]);
        let resp = fetcher.execute(FetchRequest::get(test_url())).await.unwrap();
        assert_eq!(resp.status, StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn empty_allow_list_falls_back_to_200() {
        let inner = OneShotFetcher::new(response(StatusCode::OK, "ok"));
        let fetcher = StatusCodeFetcher::with_allowed(inner, []);
        fetcher.execute(FetchRequest::get(test_url())).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_body_is_closed_exactly_once() {
        let (body, closed) = tracked_body(b"teapot problems");
        let inner = OneShotFetcher::new(response_with(
            StatusCode::IM_A_TEAPOT,
            HeaderMap::new(),
            body,
        ));
        let fetcher = StatusCodeFetcher::new(inner);

        let err = fetcher
            .execute(FetchRequest::get(test_url()))
            .await
            .unwrap_err();
        assert!(err.is(Kind::InvalidInput));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn allowed_response_body_is_untouched() {
        let (body, closed) = tracked_body(b"keep me");
        let inner = OneShotFetcher::new(response_with(StatusCode::OK, HeaderMap::new(), body));
        let fetcher = StatusCodeFetcher::new(inner);

        let resp = fetcher.execute(FetchRequest::get(test_url())).await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert_eq!(resp.body.bytes().await.unwrap(), "keep me");
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
