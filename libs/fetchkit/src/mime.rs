use std::sync::Arc;

use async_trait::async_trait;
use fetchkit_errors::{Error, Kind, Result};

use crate::fetch::Fetch;
use crate::request::FetchRequest;
use crate::response::FetchResponse;

/// Enforces an allow-list of response media types.
///
/// The `Content-Type` is parsed and its parameters stripped; the remaining
/// media type must match an allow-list entry case-insensitively, either
/// exactly or by prefix (an entry like `text/` admits every text type).
/// Rejected responses are drained and closed.
pub struct MimeTypeFetcher {
    inner: Arc<dyn Fetch>,
    /// Lower-cased allow-list entries.
    allowed: Vec<String>,
}

impl MimeTypeFetcher {
    #[must_use]
    pub fn new<I, S>(inner: Arc<dyn Fetch>, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = types
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { inner, allowed }
    }

    fn is_allowed(&self, media_type: &str) -> bool {
        self.allowed.iter().any(|entry| media_type.starts_with(entry))
    }
}

#[async_trait]
impl Fetch for MimeTypeFetcher {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse> {
        let response = self.inner.execute(request).await?;

        let Some(content_type) = response.content_type().map(str::to_owned) else {
            response.drain().await;
            return Err(Error::new(
                Kind::InvalidInput,
                "missing response content type",
            ));
        };

        let media_type = match content_type.parse::<mime::Mime>() {
            Ok(parsed) => parsed.essence_str().to_ascii_lowercase(),
            Err(_) => {
                response.drain().await;
                return Err(Error::new(
                    Kind::InvalidInput,
                    format!(
                        "unsupported media type {content_type:?}, allowed: {:?}",
                        self.allowed
                    ),
                ));
            }
        };

        if self.is_allowed(&media_type) {
            return Ok(response);
        }

        response.drain().await;
        Err(Error::new(
            Kind::InvalidInput,
            format!(
                "unsupported media type {media_type:?}, allowed: {:?}",
                self.allowed
            ),
        ))
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
