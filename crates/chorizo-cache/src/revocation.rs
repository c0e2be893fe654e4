//! Revocation list cache.
//!
//! Same TTL and single-flight mechanics as the key set cache, with the
//! fetched document kept verbatim. [`is_revoked`](RevocationCache::is_revoked)
//! reads either `{"revoked": [id, ...]}` or a bare `[id, ...]`.

use std::sync::Arc;
use std::time::Duration;

use chorizo_core::CacheFetchError;
use serde_json::Value;
use url::Url;

use crate::http::HttpJsonFetcher;
use crate::ttl::{FailurePolicy, Fetch, TtlCache};

/// Cached, periodically refreshed revocation payload.
#[derive(Debug, Clone)]
pub struct RevocationCache {
    cache: TtlCache<Value>,
}

impl RevocationCache {
    pub const NAME: &'static str = "revocation";

    pub fn new(ttl: Duration, policy: FailurePolicy, source: impl Fetch<Value> + 'static) -> Self {
        Self {
            cache: TtlCache::new(Self::NAME, ttl, policy, source),
        }
    }

    pub fn from_url(
        url: Url,
        ttl: Duration,
        timeout: Duration,
        policy: FailurePolicy,
    ) -> Result<Self, CacheFetchError> {
        Ok(Self::new(ttl, policy, HttpJsonFetcher::new(url, timeout)?))
    }

    /// The cached payload, exactly as fetched.
    pub async fn get(&self) -> Result<Arc<Value>, CacheFetchError> {
        self.cache.get().await
    }

    pub async fn refresh(&self) -> Result<Arc<Value>, CacheFetchError> {
        self.cache.refresh().await
    }

    /// Whether `id` appears in the current payload.
    pub async fn is_revoked(&self, id: &str) -> Result<bool, CacheFetchError> {
        Ok(contains_id(&*self.get().await?, id))
    }

    pub fn cache(&self) -> &TtlCache<Value> {
        &self.cache
    }
}

fn contains_id(payload: &Value, id: &str) -> bool {
    let list = match payload {
        Value::Array(items) => items,
        other => match other.get("revoked").and_then(Value::as_array) {
            Some(items) => items,
            None => return false,
        },
    };
    list.iter().any(|item| item.as_str() == Some(id))
}
