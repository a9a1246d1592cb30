//! Shared helpers for the in-crate test suites.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use fetchkit_errors::Result;
use futures_util::Stream;
use http::header::HeaderMap;
use http::StatusCode;
use url::Url;

use crate::response::{Body, FetchResponse};

/// Stream wrapper whose drop bumps a counter, so tests can assert a body was
/// closed exactly once.
struct TrackedStream {
    chunks: std::vec::IntoIter<Result<Bytes>>,
    closed: Arc<AtomicUsize>,
}

impl Stream for TrackedStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().chunks.next())
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Body over `content` plus a close counter (incremented when the underlying
/// stream is dropped).
pub(crate) fn tracked_body(content: &[u8]) -> (Body, Arc<AtomicUsize>) {
    let closed = Arc::new(AtomicUsize::new(0));
    let stream = TrackedStream {
        chunks: vec![Ok(Bytes::copy_from_slice(content))].into_iter(),
        closed: closed.clone(),
    };
    (Body::from_stream(stream), closed)
}

pub(crate) fn test_url() -> Url {
    "http://upstream.test/page".parse().unwrap()
}

pub(crate) fn response_with(status: StatusCode, headers: HeaderMap, body: Body) -> FetchResponse {
    FetchResponse {
        status,
        headers,
        url: test_url(),
        body,
    }
}

pub(crate) fn response(status: StatusCode, body: &'static str) -> FetchResponse {
    response_with(status, HeaderMap::new(), Body::from_bytes(body))
}
