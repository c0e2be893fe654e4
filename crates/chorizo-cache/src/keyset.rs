//! # Key Set Cache
//!
//! A [`TtlCache`] over the remote verification key set. Each successful
//! refresh decodes the fetched document into a fresh [`KeyTable`] that
//! replaces the previous one wholesale.
//!
//! ## Key set format
//!
//! ```json
//! { "keys": [ { "kid": "k1", "kty": "OKP", "crv": "Ed25519", "x": "<base64url>" } ] }
//! ```
//!
//! Entries without a non-empty `kid` are skipped. Entries with another key
//! type, or with unusable key material, are skipped with a warning so one bad
//! entry cannot take the whole set down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chorizo_core::CacheFetchError;
use ed25519_dalek::VerifyingKey;
use serde_json::Value;
use url::Url;

use crate::http::HttpJsonFetcher;
use crate::ttl::{FailurePolicy, Fetch, TtlCache};

/// Verification keys by key identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyTable {
    keys: HashMap<String, VerifyingKey>,
}

impl KeyTable {
    /// Decode a fetched key set document.
    ///
    /// # Errors
    ///
    /// [`CacheFetchError::Decode`] if the document has no `keys` array.
    pub fn from_key_set(document: &Value) -> Result<Self, CacheFetchError> {
        let entries = document
            .get("keys")
            .and_then(Value::as_array)
            .ok_or_else(|| CacheFetchError::Decode("key set has no \"keys\" array".into()))?;

        let mut keys = HashMap::new();
        for entry in entries {
            let Some(kid) = entry.get("kid").and_then(Value::as_str).filter(|k| !k.is_empty()) else {
                tracing::debug!("skipping key set entry without kid");
                continue;
            };
            match decode_key(entry) {
                Ok(key) => {
                    keys.insert(kid.to_string(), key);
                }
                Err(reason) => tracing::warn!(kid = %kid, reason = %reason, "skipping key set entry"),
            }
        }
        Ok(Self { keys })
    }

    pub fn get(&self, kid: &str) -> Option<&VerifyingKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key identifiers, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

fn str_field<'a>(entry: &'a Value, name: &str) -> &'a str {
    entry.get(name).and_then(Value::as_str).unwrap_or("")
}

fn decode_key(entry: &Value) -> Result<VerifyingKey, String> {
    match (str_field(entry, "kty"), str_field(entry, "crv")) {
        ("OKP", "Ed25519") => {}
        (kty, crv) => return Err(format!("unsupported key type kty={kty:?} crv={crv:?}")),
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(str_field(entry, "x"))
        .map_err(|e| format!("invalid x base64: {e}"))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("Ed25519 key must be 32 bytes, got {}", b.len()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| "invalid Ed25519 public key".to_string())
}

struct KeySetFetcher<F> {
    source: F,
}

#[async_trait]
impl<F: Fetch<Value>> Fetch<KeyTable> for KeySetFetcher<F> {
    async fn fetch(&self) -> Result<KeyTable, CacheFetchError> {
        let document = self.source.fetch().await?;
        let table = KeyTable::from_key_set(&document)?;
        tracing::debug!(keys = table.len(), "decoded key set");
        Ok(table)
    }
}

/// Cached, periodically refreshed verification keys.
#[derive(Debug, Clone)]
pub struct KeySetCache {
    cache: TtlCache<KeyTable>,
}

impl KeySetCache {
    pub const NAME: &'static str = "keyset";

    /// A key set cache over any JSON source.
    pub fn new(ttl: Duration, policy: FailurePolicy, source: impl Fetch<Value> + 'static) -> Self {
        Self {
            cache: TtlCache::new(Self::NAME, ttl, policy, KeySetFetcher { source }),
        }
    }

    /// A key set cache fetching `url` over HTTP.
    pub fn from_url(
        url: Url,
        ttl: Duration,
        timeout: Duration,
        policy: FailurePolicy,
    ) -> Result<Self, CacheFetchError> {
        Ok(Self::new(ttl, policy, HttpJsonFetcher::new(url, timeout)?))
    }

    /// The current key table.
    pub async fn get(&self) -> Result<Arc<KeyTable>, CacheFetchError> {
        self.cache.get().await
    }

    /// Look up a key by identifier, refreshing per the cache rules first.
    pub async fn key(&self, kid: &str) -> Result<Option<VerifyingKey>, CacheFetchError> {
        Ok(self.get().await?.get(kid).copied())
    }

    /// Force a refresh (joining one already in flight).
    pub async fn refresh(&self) -> Result<Arc<KeyTable>, CacheFetchError> {
        self.cache.refresh().await
    }

    pub fn cache(&self) -> &TtlCache<KeyTable> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use serde_json::json;

    fn jwk(kid: &str, key: &SigningKey) -> Value {
        json!({
            "kid": kid,
            "kty": "OKP",
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(key.verifying_key().as_bytes()),
        })
    }

    #[test]
    fn test_decodes_okp_keys() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let table = KeyTable::from_key_set(&json!({ "keys": [jwk("k1", &key)] })).unwrap();
        assert_eq!(table.get("k1"), Some(&key.verifying_key()));
        assert_eq!(table.ids(), ["k1"]);
    }

    #[test]
    fn test_skips_entries_without_kid_or_supported_type() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let doc = json!({ "keys": [
            jwk("", &key),
            { "x": "abc" },
            { "kid": "rsa", "kty": "RSA", "n": "...", "e": "AQAB" },
            { "kid": "short", "kty": "OKP", "crv": "Ed25519", "x": "AAAA" },
            jwk("good", &key),
        ]});
        let table = KeyTable::from_key_set(&doc).unwrap();
        assert_eq!(table.ids(), ["good"]);
    }

    #[test]
    fn test_document_without_keys_array_is_a_decode_error() {
        assert!(matches!(
            KeyTable::from_key_set(&json!({ "jwks": [] })),
            Err(CacheFetchError::Decode(_))
        ));
        assert!(KeyTable::from_key_set(&json!({ "keys": [] })).unwrap().is_empty());
    }
}
