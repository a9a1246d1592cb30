use std::error::Error as StdError;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fetchkit_errors::{Error, Kind, Result};
use futures_util::StreamExt;
use http::header::{self, HeaderMap, HeaderValue};
use http::Method;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{
    DEFAULT_ACCEPT, DEFAULT_ACCEPT_LANGUAGE, DEFAULT_IDLE_CONN_TIMEOUT, DEFAULT_MAX_REDIRECTS,
    DEFAULT_TLS_HANDSHAKE_TIMEOUT, DEFAULT_USER_AGENT,
};
use crate::fetch::Fetch;
use crate::redact;
use crate::request::{FetchBody, FetchRequest};
use crate::response::{Body, FetchResponse};
use crate::transport::{
    normalize_max_idle, shared_transport, CookieJar, ProxyConfig, Transport, TransportConfig,
};

/// Options for the terminal fetcher.
///
/// Transport-shaping options (timeouts, pool caps, proxy) select which shared
/// transport the fetcher uses; everything else configures the fetcher itself.
/// Construction never fails: configuration problems (a malformed proxy URL,
/// an unbuildable transport) are latched and returned by every `execute`.
pub struct HttpFetcherBuilder {
    request_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    max_idle_conns: Option<i32>,
    proxy: Option<ProxyConfig>,
    max_redirects: usize,
    cookie_jar: Option<CookieJar>,
    transport: Option<Transport>,
    user_agent: Option<String>,
    disable_transport_cache: bool,
    disable_logging: bool,
    init_err: Option<(Kind, String)>,
}

impl Default for HttpFetcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcherBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_timeout: None,
            read_timeout: None,
            connect_timeout: None,
            idle_timeout: None,
            max_idle_conns: None,
            proxy: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            cookie_jar: None,
            transport: None,
            user_agent: None,
            disable_transport_cache: false,
            disable_logging: false,
            init_err: None,
        }
    }

    /// Bound each dispatch (one attempt, headers through body start).
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Bound waiting on response bytes once connected.
    #[must_use]
    pub fn response_header_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Bound TCP + TLS connection setup.
    #[must_use]
    pub fn tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Drop idle pooled connections after this long unused.
    #[must_use]
    pub fn idle_conn_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Idle-connection cap: negative = default, 0 = unlimited, >0 = explicit.
    #[must_use]
    pub fn max_idle_conns(mut self, max: i32) -> Self {
        self.max_idle_conns = Some(max);
        self
    }

    /// Proxy selection. Empty string keeps environment-derived proxies; a
    /// malformed URL latches an init error returned by every `execute`.
    #[must_use]
    pub fn proxy_url(mut self, proxy_url: &str) -> Self {
        if proxy_url.is_empty() {
            self.proxy = Some(ProxyConfig::Environment);
            return self;
        }
        match proxy_url.parse::<Url>() {
            Ok(url) => self.proxy = Some(ProxyConfig::Url(url)),
            Err(e) => {
                self.init_err.get_or_insert((
                    Kind::InvalidInput,
                    format!("invalid proxy url {proxy_url:?}: {e}"),
                ));
            }
        }
        self
    }

    /// Connect directly, ignoring environment proxies.
    #[must_use]
    pub fn no_proxy(mut self) -> Self {
        self.proxy = Some(ProxyConfig::Direct);
        self
    }

    /// Redirect hops to follow before handing back the last response.
    #[must_use]
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Pluggable cookie jar. Forces a private transport: jars are not part
    /// of the cache key, so jar-carrying pools are never shared.
    #[must_use]
    pub fn cookie_jar(mut self, jar: CookieJar) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    /// Use a caller-supplied transport. With no other transport-shaping
    /// option set it is used as-is and never owned; with overrides a new
    /// transport is built from the merged settings (the original is still
    /// not owned).
    #[must_use]
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// User-Agent injected when the request carries none.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Build a private transport instead of using the process-wide cache.
    /// The fetcher owns it and releases it on `close`.
    #[must_use]
    pub fn disable_transport_cache(mut self) -> Self {
        self.disable_transport_cache = true;
        self
    }

    /// Silence per-dispatch debug logging.
    #[must_use]
    pub fn disable_logging(mut self) -> Self {
        self.disable_logging = true;
        self
    }

    #[must_use]
    pub fn build(self) -> HttpFetcher {
        let mut init_err = self.init_err.clone();

        let user_agent = self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let user_agent = match HeaderValue::from_str(user_agent) {
            Ok(value) => value,
            Err(_) => {
                init_err.get_or_insert((
                    Kind::InvalidInput,
                    format!("invalid user agent {user_agent:?}"),
                ));
                HeaderValue::from_static(DEFAULT_USER_AGENT)
            }
        };

        let mut transport = None;
        let mut owns_transport = false;
        if init_err.is_none() {
            match self.resolve_transport() {
                Ok((resolved, owned)) => {
                    transport = Some(resolved);
                    owns_transport = owned;
                }
                Err(e) => {
                    init_err = Some((e.kind(), e.to_string()));
                }
            }
        }

        HttpFetcher {
            transport: Mutex::new(transport),
            owns_transport,
            request_timeout: self.request_timeout,
            max_redirects: self.max_redirects,
            user_agent,
            log_requests: !self.disable_logging,
            init_err,
        }
    }

    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            proxy: self.proxy.clone().unwrap_or_default(),
            read_timeout: self.read_timeout,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_TLS_HANDSHAKE_TIMEOUT),
            idle_timeout: self.idle_timeout.unwrap_or(DEFAULT_IDLE_CONN_TIMEOUT),
            max_idle_per_host: normalize_max_idle(self.max_idle_conns.unwrap_or(-1)),
        }
    }

    fn has_transport_overrides(&self) -> bool {
        self.read_timeout.is_some()
            || self.connect_timeout.is_some()
            || self.idle_timeout.is_some()
            || self.max_idle_conns.is_some()
            || self.proxy.is_some()
    }

    fn resolve_transport(&self) -> Result<(Transport, bool)> {
        if let Some(injected) = &self.transport {
            if !self.has_transport_overrides() && self.cookie_jar.is_none() {
                return Ok((injected.clone(), false));
            }
            let base = injected.config();
            let merged = TransportConfig {
                proxy: self.proxy.clone().unwrap_or_else(|| base.proxy.clone()),
                read_timeout: self.read_timeout.or(base.read_timeout),
                connect_timeout: self.connect_timeout.unwrap_or(base.connect_timeout),
                idle_timeout: self.idle_timeout.unwrap_or(base.idle_timeout),
                max_idle_per_host: self
                    .max_idle_conns
                    .map_or(base.max_idle_per_host, normalize_max_idle),
            };
            return Transport::build(merged, self.cookie_jar.clone()).map(|t| (t, true));
        }

        let config = self.transport_config();
        if self.disable_transport_cache || self.cookie_jar.is_some() {
            return Transport::build(config, self.cookie_jar.clone()).map(|t| (t, true));
        }
        shared_transport(&config).map(|t| (t, false))
    }
}

/// Terminal fetcher: one network dispatch per attempt, redirects followed
/// in-process so the outgoing Referer can be redacted on every hop.
pub struct HttpFetcher {
    transport: Mutex<Option<Transport>>,
    owns_transport: bool,
    request_timeout: Option<Duration>,
    max_redirects: usize,
    user_agent: HeaderValue,
    log_requests: bool,
    init_err: Option<(Kind, String)>,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> HttpFetcherBuilder {
        HttpFetcherBuilder::new()
    }

    /// The transport this fetcher dispatches through, for inspection.
    /// `None` once an owned transport has been released by `close`.
    #[must_use]
    pub fn transport(&self) -> Option<Transport> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn current_transport(&self) -> Result<Transport> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::new(Kind::ExecutionFailed, "fetcher is closed"))
    }

    async fn dispatch(
        &self,
        transport: &Transport,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<FetchBody>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<FetchResponse> {
        let mut builder = transport.client().request(method, url).headers(headers);
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        builder = match body {
            Some(FetchBody::Bytes(bytes)) => builder.body(bytes),
            Some(FetchBody::Stream(stream)) => builder.body(reqwest::Body::wrap_stream(stream)),
            None => builder,
        };

        let send = async { builder.send().await.map_err(map_transport_error) };
        let response = if let Some(deadline) = deadline {
            let deadline = tokio::time::Instant::from_std(deadline);
            tokio::select! {
                () = cancel.cancelled() => Err(canceled()),
                outcome = tokio::time::timeout_at(deadline, send) => match outcome {
                    Ok(inner) => inner,
                    Err(_) => Err(deadline_exceeded()),
                },
            }
        } else {
            tokio::select! {
                () = cancel.cancelled() => Err(canceled()),
                inner = send => inner,
            }
        }?;

        let status = response.status();
        let response_headers = response.headers().clone();
        let final_url = response.url().clone();
        let stream = response
            .bytes_stream()
            .map(|item| item.map_err(|e| Error::wrap(e, Kind::Unavailable, "response body read failed")));

        Ok(FetchResponse {
            status,
            headers: response_headers,
            url: final_url,
            body: Body::from_stream(stream),
        })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse> {
        if let Some((kind, message)) = &self.init_err {
            return Err(Error::new(*kind, message.clone()));
        }
        let transport = self.current_transport()?;

        match request.url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::new(
                    Kind::InvalidInput,
                    format!("unsupported url scheme {other:?}"),
                ));
            }
        }

        let FetchRequest {
            method,
            url,
            mut headers,
            body,
            get_body,
            cancel,
            deadline,
        } = request;

        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, self.user_agent.clone());
        }
        if !headers.contains_key(header::ACCEPT) {
            headers.insert(header::ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        }
        if !headers.contains_key(header::ACCEPT_LANGUAGE) {
            headers.insert(
                header::ACCEPT_LANGUAGE,
                HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE),
            );
        }

        let had_body = body.is_some();
        let body_template = body.as_ref().and_then(FetchBody::try_clone);

        let mut current_url = url;
        let mut current_method = method;
        let mut current_body = body;
        let mut referer: Option<HeaderValue> = None;
        let mut hops = 0usize;

        loop {
            if self.log_requests {
                tracing::debug!(
                    target: "fetchkit::http",
                    method = %current_method,
                    url = %redact::redact_url(&current_url),
                    hop = hops,
                    "dispatching request"
                );
            }

            let mut hop_headers = headers.clone();
            if let Some(value) = &referer {
                hop_headers.insert(header::REFERER, value.clone());
            }

            let response = self
                .dispatch(
                    &transport,
                    current_method.clone(),
                    current_url.clone(),
                    hop_headers,
                    current_body.take(),
                    &cancel,
                    deadline,
                )
                .await?;

            let status = response.status.as_u16();
            if !matches!(status, 301 | 302 | 303 | 307 | 308) {
                return Ok(response);
            }
            if hops >= self.max_redirects {
                // Limit reached: the last response belongs to the caller.
                return Ok(response);
            }

            let Some(next_url) = response
                .headers
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|location| current_url.join(location).ok())
            else {
                return Ok(response);
            };
            if !matches!(next_url.scheme(), "http" | "https") {
                return Ok(response);
            }

            let (next_method, next_body) = match status {
                303 => rewrite_to_get(&current_method),
                301 | 302 => {
                    if matches!(current_method, Method::GET | Method::HEAD) {
                        (current_method.clone(), None)
                    } else {
                        rewrite_to_get(&current_method)
                    }
                }
                _ => {
                    // 307/308 preserve the method and replay the body.
                    if !had_body {
                        (current_method.clone(), None)
                    } else if let Some(thunk) = &get_body {
                        let fresh = thunk().map_err(|e| {
                            Error::wrap(e, Kind::InvalidInput, "request body rewind failed")
                        })?;
                        (current_method.clone(), Some(fresh))
                    } else if let Some(template) = &body_template {
                        (current_method.clone(), template.try_clone())
                    } else {
                        // One-shot body with no rewind thunk: stop here.
                        return Ok(response);
                    }
                }
            };

            if next_method != current_method {
                for name in [
                    header::CONTENT_LENGTH,
                    header::CONTENT_TYPE,
                    header::CONTENT_ENCODING,
                    header::TRANSFER_ENCODING,
                ] {
                    headers.remove(&name);
                }
            }

            // No Referer across an https -> http downgrade.
            referer = if current_url.scheme() == "https" && next_url.scheme() == "http" {
                None
            } else {
                redact::referer_value(&current_url)
            };

            if self.log_requests {
                tracing::debug!(
                    target: "fetchkit::http",
                    status,
                    location = %redact::redact_url(&next_url),
                    "following redirect"
                );
            }

            // Consume the redirect body so the connection can be reused.
            response.drain().await;

            current_url = next_url;
            current_method = next_method;
            current_body = next_body;
            hops += 1;
        }
    }

    async fn close(&self) -> Result<()> {
        if self.owns_transport {
            self.transport
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }
        Ok(())
    }
}

fn rewrite_to_get(method: &Method) -> (Method, Option<FetchBody>) {
    if *method == Method::HEAD {
        (Method::HEAD, None)
    } else {
        (Method::GET, None)
    }
}

fn canceled() -> Error {
    Error::new(Kind::Canceled, "request canceled")
}

fn deadline_exceeded() -> Error {
    Error::new(Kind::DeadlineExceeded, "request deadline exceeded")
}

fn map_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        return Error::wrap(err, Kind::Unavailable, "request timed out");
    }
    if err.is_connect() {
        if is_tls_failure(&err) {
            return Error::wrap(err, Kind::ExecutionFailed, "tls negotiation failed");
        }
        return Error::wrap(err, Kind::Unavailable, "connection failed");
    }
    if err.is_builder() || err.is_request() {
        return Error::wrap(err, Kind::InvalidInput, "request could not be sent");
    }
    Error::wrap(err, Kind::Unknown, "request failed")
}

/// TLS trust and identity failures are permanent; retrying cannot help.
/// reqwest flattens them into connect errors, so the chain text is the only
/// signal left to tell them apart from transient connect trouble.
fn is_tls_failure(err: &reqwest::Error) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        let text = e.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("handshake") || text.contains("tls") {
            return true;
        }
        current = e.source();
    }
    false
}
