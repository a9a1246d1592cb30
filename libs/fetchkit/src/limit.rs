use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use fetchkit_errors::{Error, Kind, Result};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};

use crate::config::{DEFAULT_MAX_BODY_BYTES, NO_LIMIT};
use crate::fetch::Fetch;
use crate::request::FetchRequest;
use crate::response::{Body, FetchResponse};

/// Caps response body size two ways: a `Content-Length` pre-check that
/// rejects before any byte is read, and a streaming guard that fails the
/// read which would cross the limit. The streaming failure surfaces through
/// the caller's body read, not through `execute`.
pub struct MaxBytesFetcher {
    inner: Arc<dyn Fetch>,
    limit: u64,
}

impl MaxBytesFetcher {
    /// Wrap `inner` with a byte limit.
    ///
    /// `NO_LIMIT` (−1) returns the delegate unchanged; zero and other
    /// negative values apply [`DEFAULT_MAX_BODY_BYTES`]; positive values are
    /// used verbatim.
    #[must_use]
    pub fn layer(inner: Arc<dyn Fetch>, limit: i64) -> Arc<dyn Fetch> {
        let limit = match limit {
            NO_LIMIT => return inner,
            l if l <= 0 => DEFAULT_MAX_BODY_BYTES.unsigned_abs(),
            l => l.unsigned_abs(),
        };
        Arc::new(Self { inner, limit })
    }
}

#[async_trait]
impl Fetch for MaxBytesFetcher {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse> {
        let response = self.inner.execute(request).await?;

        if let Some(content_length) = response.content_length() {
            if content_length > self.limit {
                let limit = self.limit;
                response.drain().await;
                return Err(Error::new(
                    Kind::InvalidInput,
                    format!("content length {content_length} exceeds limit of {limit} bytes"),
                ));
            }
        }

        let FetchResponse {
            status,
            headers,
            url,
            body,
        } = response;
        Ok(FetchResponse {
            status,
            headers,
            url,
            body: Body::from_stream(LimitedStream {
                inner: body.into_stream(),
                limit: self.limit,
                read: 0,
                done: false,
            }),
        })
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

/// Counts bytes as they stream by and fails the read that would cross the
/// limit.
struct LimitedStream {
    inner: BoxStream<'static, Result<Bytes>>,
    limit: u64,
    read: u64,
    done: bool,
}

impl Stream for LimitedStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.read += chunk.len() as u64;
                if this.read > this.limit {
                    this.done = true;
                    return Poll::Ready(Some(Err(Error::new(
                        Kind::InvalidInput,
                        format!("response body exceeds limit of {} bytes", this.limit),
                    ))));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
