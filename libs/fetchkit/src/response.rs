use std::fmt;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use fetchkit_errors::{Error, Kind, Result};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http::header::HeaderMap;
use http::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::MAX_DRAIN_BYTES;

/// Parse a `Retry-After` header value.
///
/// Supports both RFC 7231 forms:
/// - non-negative integer seconds: `"120"` → 120 s
/// - HTTP-date (RFC 1123); dates already in the past clamp to zero
///
/// Missing or unparseable values yield `None`.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds.unsigned_abs()));
    }

    let parsed = httpdate::parse_http_date(trimmed).ok()?;
    Some(
        parsed
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}

/// A streaming response body.
///
/// The caller owns the body: read it to EOF (via [`Body::bytes`],
/// [`Body::text`], [`Body::json`], or [`Body::chunk`] in a loop) or discard
/// it with [`Body::drain`]. Only consumed bodies let the underlying
/// connection return to the pool.
pub struct Body {
    stream: BoxStream<'static, Result<Bytes>>,
}

impl Body {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            stream: futures_util::stream::empty().boxed(),
        }
    }

    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            stream: futures_util::stream::once(async move { Ok(bytes) }).boxed(),
        }
    }

    #[must_use]
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: futures_util::Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
        }
    }

    /// Next chunk, or `None` at EOF.
    ///
    /// # Errors
    /// Surfaces stream failures, including the size-limit error injected by
    /// a `MaxBytesFetcher` upstream.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.stream.next().await.transpose()
    }

    pub(crate) fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        self.stream
    }

    /// Read the body to EOF.
    ///
    /// No size cap of its own; compose a `MaxBytesFetcher` in the chain to
    /// bound untrusted bodies.
    ///
    /// # Errors
    /// Surfaces the first stream failure encountered while reading.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut collected = Vec::new();
        while let Some(chunk) = self.stream.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(collected))
    }

    /// Read the body to EOF as lossy UTF-8 text.
    ///
    /// # Errors
    /// Surfaces the first stream failure encountered while reading.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read the body to EOF and parse it as JSON.
    ///
    /// # Errors
    /// Surfaces stream failures, and `InvalidInput` when the body is not
    /// valid JSON for `T`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::wrap(e, Kind::InvalidInput, "response body is not valid json"))
    }

    /// Read up to `max` bytes as a lossy text snippet, leaving the rest of
    /// the stream in place. Read errors end the snippet early.
    pub(crate) async fn read_snippet(&mut self, max: usize) -> String {
        let mut collected: Vec<u8> = Vec::new();
        while collected.len() < max {
            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    let room = max - collected.len();
                    collected.extend_from_slice(&chunk[..chunk.len().min(room)]);
                }
                Some(Err(_)) | None => break,
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }

    /// Discard the body: read up to [`MAX_DRAIN_BYTES`] and drop the stream.
    /// Read errors are swallowed; the stream is dropped regardless. Keeping
    /// the drain bounded stops a hostile upstream from costing unbounded
    /// work for a response nobody wants.
    pub async fn drain(mut self) {
        let mut drained: u64 = 0;
        while drained < MAX_DRAIN_BYTES {
            match self.stream.next().await {
                Some(Ok(chunk)) => drained += chunk.len() as u64,
                Some(Err(_)) | None => break,
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Body")
    }
}

/// An upstream response. The body is the caller's to consume or drain.
#[derive(Debug)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Final URL after any redirects the terminal fetcher followed.
    pub url: Url,
    pub body: Body,
}

impl FetchResponse {
    #[must_use]
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(&self.headers)
    }

    /// Drain-and-close: discard the body so the connection can be reused.
    pub async fn drain(self) {
        self.body.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_retry_after(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, value.parse().unwrap());
        headers
    }

    #[test]
    fn retry_after_seconds() {
        let headers = headers_with_retry_after("120");
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(120)));
    }

    #[test]
    fn retry_after_seconds_with_whitespace() {
        let headers = headers_with_retry_after("  60  ");
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(60)));
    }

    #[test]
    fn retry_after_zero() {
        let headers = headers_with_retry_after("0");
        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn retry_after_negative_seconds_is_unparseable() {
        let headers = headers_with_retry_after("-5");
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn retry_after_garbage_is_unparseable() {
        let headers = headers_with_retry_after("soon");
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn retry_after_missing() {
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn retry_after_past_date_clamps_to_zero() {
        let headers = headers_with_retry_after("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn retry_after_future_date() {
        let future = SystemTime::now() + Duration::from_secs(60);
        let headers = headers_with_retry_after(&httpdate::fmt_http_date(future));
        let parsed = parse_retry_after(&headers).unwrap();
        assert!(parsed.as_secs() >= 58 && parsed.as_secs() <= 62, "{parsed:?}");
    }

    #[tokio::test]
    async fn body_bytes_reads_to_eof() {
        let body = Body::from_stream(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]));
        assert_eq!(body.bytes().await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn body_chunk_iterates() {
        let mut body = Body::from_bytes("chunked");
        assert_eq!(body.chunk().await.unwrap().unwrap(), "chunked");
        assert!(body.chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn body_json_parses() {
        #[derive(serde::Deserialize)]
        struct Payload {
            ok: bool,
        }
        let body = Body::from_bytes(r#"{"ok":true}"#);
        let parsed: Payload = body.json().await.unwrap();
        assert!(parsed.ok);
    }

    #[tokio::test]
    async fn body_json_rejects_garbage() {
        let err = Body::from_bytes("nope").json::<serde_json::Value>().await.unwrap_err();
        assert!(err.is(Kind::InvalidInput));
    }

    #[tokio::test]
    async fn snippet_caps_and_leaves_remainder() {
        let mut body = Body::from_stream(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"abcdef")),
            Ok(Bytes::from_static(b"ghijkl")),
        ]));
        let snippet = body.read_snippet(4).await;
        assert_eq!(snippet, "abcd");
        // The remainder is still readable.
        let rest = body.bytes().await.unwrap();
        assert_eq!(rest, "ghijkl");
    }

    #[tokio::test]
    async fn drain_swallows_read_errors() {
        let body = Body::from_stream(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(Error::new(Kind::Unavailable, "mid-stream failure")),
        ]));
        // Must not panic or surface the error.
        body.drain().await;
    }

    #[tokio::test]
    async fn drain_stops_at_bound() {
        // Endless stream; the drain bound is what terminates the loop.
        let chunk = Bytes::from(vec![0u8; 8 * 1024]);
        let body = Body::from_stream(futures_util::stream::repeat_with(move || Ok(chunk.clone())));
        tokio::time::timeout(Duration::from_secs(5), body.drain())
            .await
            .expect("drain must stop at MAX_DRAIN_BYTES");
    }
}
