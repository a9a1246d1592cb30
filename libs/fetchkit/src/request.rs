use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use std::pin::Pin;

use bytes::Bytes;
use fetchkit_errors::Result;
use futures_util::Stream;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Rewind thunk: produces a fresh copy of the request body so an attempt can
/// be replayed (retry, 307/308 redirect).
pub type GetBody = Arc<dyn Fn() -> Result<FetchBody> + Send + Sync>;

/// An outgoing request body.
///
/// `Bytes` bodies are cheap to clone and therefore inherently replayable.
/// `Stream` bodies are one-shot; replaying one requires a [`GetBody`] thunk
/// on the request.
pub enum FetchBody {
    Bytes(Bytes),
    Stream(Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + Sync + 'static>>),
}

impl FetchBody {
    #[must_use]
    pub fn bytes(body: impl Into<Bytes>) -> Self {
        FetchBody::Bytes(body.into())
    }

    #[must_use]
    pub fn stream<S>(stream: S) -> Self
    where
        S: futures_util::Stream<Item = Result<Bytes>> + Send + Sync + 'static,
    {
        FetchBody::Stream(Box::pin(stream))
    }

    /// Replayable copy, when the body supports it.
    #[must_use]
    pub(crate) fn try_clone(&self) -> Option<FetchBody> {
        match self {
            FetchBody::Bytes(bytes) => Some(FetchBody::Bytes(bytes.clone())),
            FetchBody::Stream(_) => None,
        }
    }
}

impl fmt::Debug for FetchBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            FetchBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for FetchBody {
    fn from(bytes: Bytes) -> Self {
        FetchBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for FetchBody {
    fn from(bytes: Vec<u8>) -> Self {
        FetchBody::Bytes(bytes.into())
    }
}

impl From<String> for FetchBody {
    fn from(body: String) -> Self {
        FetchBody::Bytes(body.into())
    }
}

impl From<&'static str> for FetchBody {
    fn from(body: &'static str) -> Self {
        FetchBody::Bytes(Bytes::from_static(body.as_bytes()))
    }
}

/// A prepared outbound request.
///
/// Requests move through the chain by value; a layer that needs to add or
/// change a header does so on its own copy, so the caller's request value is
/// never mutated behind their back.
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<FetchBody>,
    /// Rewind thunk for one-shot bodies; preferred over cloning when present.
    pub get_body: Option<GetBody>,
    /// Cooperative cancellation; honored at the dispatch point and during
    /// retry waits.
    pub cancel: CancellationToken,
    /// Hard deadline for the whole call, retries included.
    pub deadline: Option<Instant>,
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("get_body", &self.get_body.is_some())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl FetchRequest {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            get_body: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn post(url: Url, body: impl Into<FetchBody>) -> Self {
        Self::new(Method::POST, url).body(body)
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<FetchBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn get_body(mut self, thunk: GetBody) -> Self {
        self.get_body = Some(thunk);
        self
    }

    #[must_use]
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
