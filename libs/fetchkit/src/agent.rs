use std::sync::Arc;

use async_trait::async_trait;
use fetchkit_errors::Result;
use http::header::{HeaderValue, USER_AGENT};
use rand::seq::IndexedRandom;

use crate::fetch::Fetch;
use crate::request::FetchRequest;
use crate::response::FetchResponse;

/// Browser User-Agent strings used when the caller supplies no pool.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
];

/// Injects a User-Agent chosen uniformly at random when the request carries
/// none. Requests that already have one pass through untouched, and the
/// `randomize` flag can turn injection off entirely.
pub struct UserAgentFetcher {
    inner: Arc<dyn Fetch>,
    agents: Vec<HeaderValue>,
    randomize: bool,
}

impl UserAgentFetcher {
    #[must_use]
    pub fn new(inner: Arc<dyn Fetch>) -> Self {
        Self::with_agents(inner, DEFAULT_USER_AGENTS.iter().copied())
    }

    /// Use a caller-provided pool. Entries that are not valid header values
    /// are dropped; an empty pool falls back to the built-in list.
    #[must_use]
    pub fn with_agents<I, S>(inner: Arc<dyn Fetch>, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut agents: Vec<HeaderValue> = agents
            .into_iter()
            .filter_map(|agent| HeaderValue::from_str(agent.as_ref()).ok())
            .collect();
        if agents.is_empty() {
            agents = DEFAULT_USER_AGENTS
                .iter()
                .map(|agent| HeaderValue::from_static(agent))
                .collect();
        }
        Self {
            inner,
            agents,
            randomize: true,
        }
    }

    /// With `randomize` off the request is forwarded with its User-Agent
    /// left absent (the terminal fetcher's default then applies).
    #[must_use]
    pub fn randomize(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }
}

#[async_trait]
impl Fetch for UserAgentFetcher {
    async fn execute(&self, mut request: FetchRequest) -> Result<FetchResponse> {
        if self.randomize && !request.headers.contains_key(USER_AGENT) {
            if let Some(agent) = self.agents.choose(&mut rand::rng()) {
                request.headers.insert(USER_AGENT, agent.clone());
            }
        }
        self.inner.execute(request).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
