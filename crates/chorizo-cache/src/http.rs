//! HTTP JSON fetcher for remote cache sources.

use std::time::Duration;

use async_trait::async_trait;
use chorizo_core::CacheFetchError;
use serde_json::Value;
use url::Url;

use crate::ttl::Fetch;

/// GETs a URL and parses the body as JSON.
///
/// Non-2xx responses and unparsable bodies are errors; nothing is retried
/// here. The cache decides what a failed fetch means.
#[derive(Debug, Clone)]
pub struct HttpJsonFetcher {
    http: reqwest::Client,
    url: Url,
}

impl HttpJsonFetcher {
    /// Build a fetcher with its own client and request timeout.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, CacheFetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheFetchError::Transport {
                url: url.to_string(),
                reason: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self { http, url })
    }

    /// Share an existing client.
    pub fn with_client(http: reqwest::Client, url: Url) -> Self {
        Self { http, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Fetch<Value> for HttpJsonFetcher {
    async fn fetch(&self) -> Result<Value, CacheFetchError> {
        let resp = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| CacheFetchError::Transport {
                url: self.url.to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(CacheFetchError::Status {
                url: self.url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        resp.json()
            .await
            .map_err(|e| CacheFetchError::Decode(format!("{}: {e}", self.url)))
    }
}
