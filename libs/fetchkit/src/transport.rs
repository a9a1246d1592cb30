//! Shared transports and the process-wide transport cache.
//!
//! A [`Transport`] is a configured connection pool (TLS, proxy, pool shaping).
//! Fetchers sharing a configuration share one transport, maximizing
//! connection reuse across every caller in the process. The cache is a
//! bounded LRU keyed by the configuration tuple; overflow evicts the least
//! recently used transport, whose idle connections close once the last
//! in-flight user drops its handle.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use fetchkit_errors::{Error, Kind, Result};
use http::header::HeaderValue;
use lru::LruCache;
use url::Url;

use crate::config::{
    DEFAULT_IDLE_CONN_TIMEOUT, DEFAULT_MAX_IDLE_CONNS, DEFAULT_TLS_HANDSHAKE_TIMEOUT,
    MAX_TRANSPORT_CACHE_SIZE,
};

/// Pluggable cookie jar accepted by the fetcher options.
pub type CookieJar = Arc<dyn reqwest::cookie::CookieStore>;

/// How outbound connections reach the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProxyConfig {
    /// Honor `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY` and platform settings.
    Environment,
    /// Connect directly, ignoring any environment proxy.
    Direct,
    /// Route everything through an explicit proxy URL.
    Url(Url),
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig::Environment
    }
}

/// Transport identity: two fetchers with equal configs share a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportConfig {
    pub proxy: ProxyConfig,
    /// Bounds waiting on response bytes once connected.
    pub read_timeout: Option<Duration>,
    /// Bounds TCP + TLS connection setup.
    pub connect_timeout: Duration,
    /// Idle pooled connections are dropped after this long unused.
    pub idle_timeout: Duration,
    /// Cap on idle pooled connections per host.
    pub max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::Environment,
            read_timeout: None,
            connect_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_CONN_TIMEOUT,
            max_idle_per_host: DEFAULT_MAX_IDLE_CONNS,
        }
    }
}

/// Map the signed max-idle option onto the pool cap:
/// negative = default, zero = unlimited, positive = verbatim.
#[must_use]
pub(crate) fn normalize_max_idle(value: i32) -> usize {
    match value {
        v if v < 0 => DEFAULT_MAX_IDLE_CONNS,
        0 => usize::MAX,
        v => usize::try_from(v).unwrap_or(DEFAULT_MAX_IDLE_CONNS),
    }
}

/// Adapter so caller-supplied `Arc<dyn CookieStore>` jars fit the sized
/// generic on the client builder.
struct JarHandle(CookieJar);

impl reqwest::cookie::CookieStore for JarHandle {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.0.set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.0.cookies(url)
    }
}

/// A configured connection pool. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct Transport {
    config: TransportConfig,
    client: reqwest::Client,
}

impl Transport {
    /// Build a transport for `config`.
    ///
    /// # Errors
    /// Returns `InvalidInput` for an unusable proxy URL, or `ExecutionFailed`
    /// when the underlying client cannot be constructed.
    pub fn new(config: TransportConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Build a private transport carrying a cookie jar. Jars are never part
    /// of the cache key, so jar-carrying transports are always private.
    pub(crate) fn build(config: TransportConfig, jar: Option<CookieJar>) -> Result<Self> {
        // Redirects are followed by the terminal fetcher itself so it can
        // redact the Referer on every hop.
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host);

        if let Some(read_timeout) = config.read_timeout {
            builder = builder.read_timeout(read_timeout);
        }

        match &config.proxy {
            ProxyConfig::Environment => {}
            ProxyConfig::Direct => builder = builder.no_proxy(),
            ProxyConfig::Url(url) => {
                let proxy = reqwest::Proxy::all(url.clone())
                    .map_err(|e| Error::wrap(e, Kind::InvalidInput, "invalid proxy url"))?;
                builder = builder.proxy(proxy);
            }
        }

        if let Some(jar) = jar {
            builder = builder.cookie_provider(Arc::new(JarHandle(jar)));
        }

        let client = builder
            .build()
            .map_err(|e| Error::wrap(e, Kind::ExecutionFailed, "failed to build transport"))?;

        Ok(Self { config, client })
    }

    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Bounded LRU of shared transports. One mutex covers the whole structure;
/// nothing network-facing happens under it.
struct TransportCache {
    entries: Mutex<LruCache<TransportConfig, Transport>>,
    evictions: AtomicUsize,
}

impl TransportCache {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            evictions: AtomicUsize::new(0),
        }
    }

    fn get(&self, config: &TransportConfig) -> Result<Transport> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(transport) = entries.get(config) {
            return Ok(transport.clone());
        }

        let transport = Transport::new(config.clone())?;
        if let Some((evicted, _)) = entries.push(config.clone(), transport.clone()) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                target: "fetchkit::transport",
                proxy = ?evicted.proxy,
                "evicted least recently used transport"
            );
        }
        Ok(transport)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    fn contains(&self, config: &TransportConfig) -> bool {
        // peek does not disturb recency
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peek(config)
            .is_some()
    }
}

fn cache() -> &'static TransportCache {
    static CACHE: OnceLock<TransportCache> = OnceLock::new();
    CACHE.get_or_init(|| TransportCache::with_capacity(MAX_TRANSPORT_CACHE_SIZE))
}

/// Fetch the process-wide shared transport for `config`, creating it on the
/// first request. Callers do not own the result; eviction retires it.
///
/// # Errors
/// Returns the construction error when a cache miss cannot build a transport
/// for `config`.
pub fn shared_transport(config: &TransportConfig) -> Result<Transport> {
    cache().get(config)
}
