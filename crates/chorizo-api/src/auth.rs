//! # Authentication & Authorization Middleware
//!
//! Bearer token verification against the cached remote key set, with
//! permission checks against the token's `perm` claim.
//!
//! ## Token Format
//!
//! ```text
//! Authorization: Bearer base64url(header).base64url(payload).base64url(signature)
//! ```
//!
//! - header: `{"alg": "EdDSA", "kid": "<key id>"}`. `kid` selects the
//!   verification key through [`KeySetCache::key`].
//! - signature: Ed25519 over the ASCII bytes `header.payload`.
//! - payload: `{"perm": [...], "exp": <unix seconds>, "jti": "...", "sub": "..."}`.
//!   `perm` may also be a space-separated string.
//!
//! ## Caller
//!
//! Every request that passes [`authenticate`] gets a [`Caller`] in its
//! extensions. With no key set configured, authentication is disabled and
//! every request runs as [`Caller::Anonymous`], which passes every
//! permission check.

use std::collections::BTreeSet;
use std::fmt;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chorizo_cache::{KeySetCache, RevocationCache};
use chorizo_core::AuthError;
use ed25519_dalek::{Signature, Verifier};
use serde::{Deserialize, Deserializer};

use crate::error::AppError;
use crate::state::AppState;

// ─── Claims ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default)]
    kid: String,
}

/// Verified token payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default, deserialize_with = "permissions")]
    pub perm: BTreeSet<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPermissions {
    List(Vec<String>),
    Spaced(String),
}

fn permissions<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<String>, D::Error> {
    Ok(match Option::<RawPermissions>::deserialize(d)? {
        Some(RawPermissions::List(list)) => list.into_iter().collect(),
        Some(RawPermissions::Spaced(s)) => s.split_whitespace().map(str::to_string).collect(),
        None => BTreeSet::new(),
    })
}

// ─── Caller ──────────────────────────────────────────────────────────

/// Identity of the request, injected by [`authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Authentication is disabled.
    Anonymous,
    /// A verified bearer token.
    Token(Claims),
}

impl Caller {
    /// Check that every `required` permission is granted.
    pub fn require(&self, required: &BTreeSet<String>) -> Result<(), AuthError> {
        let Self::Token(claims) = self else {
            return Ok(());
        };
        let missing: Vec<String> = required.difference(&claims.perm).cloned().collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermission { missing })
        }
    }

    pub fn claims(&self) -> Option<&Claims> {
        match self {
            Self::Anonymous => None,
            Self::Token(claims) => Some(claims),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or(AppError::Auth(AuthError::MissingCredential))
    }
}

// ─── Verification ────────────────────────────────────────────────────

/// Verifies bearer tokens against the remote key set and revocation list.
#[derive(Clone)]
pub struct Authenticator {
    keys: KeySetCache,
    revocation: Option<RevocationCache>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("keys", &self.keys.cache().state())
            .field("revocation", &self.revocation.as_ref().map(|r| r.cache().state()))
            .finish()
    }
}

impl Authenticator {
    pub fn new(keys: KeySetCache, revocation: Option<RevocationCache>) -> Self {
        Self { keys, revocation }
    }

    pub fn keys(&self) -> &KeySetCache {
        &self.keys
    }

    /// Verify a compact token and return its claims.
    ///
    /// The revocation list is only consulted for tokens carrying a `jti`.
    /// If it cannot be obtained the token is refused.
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(malformed("token must have three segments"));
        };

        let header: TokenHeader = decode_segment(header_b64, "header")?;
        if header.alg != "EdDSA" {
            return Err(malformed(format!("unsupported alg '{}'", header.alg)));
        }
        if header.kid.is_empty() {
            return Err(malformed("token header has no kid"));
        }

        let key = self
            .keys
            .key(&header.kid)
            .await?
            .ok_or_else(|| AuthError::UnknownKey { kid: header.kid.clone() })?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| malformed("signature is not base64url"))?;
        let signature = Signature::from_slice(&signature).map_err(|_| AuthError::InvalidSignature)?;
        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        key.verify(signing_input.as_bytes(), &signature)
            .map_err(|_| AuthError::InvalidSignature)?;

        let claims: Claims = decode_segment(payload_b64, "payload")?;
        if claims.exp.is_some_and(|exp| exp <= chrono::Utc::now().timestamp()) {
            return Err(AuthError::Expired);
        }
        if let (Some(revocation), Some(jti)) = (&self.revocation, &claims.jti) {
            if revocation.is_revoked(jti).await? {
                return Err(AuthError::Revoked);
            }
        }
        Ok(claims)
    }
}

fn malformed(reason: impl Into<String>) -> AuthError {
    AuthError::MalformedCredential(reason.into())
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str, what: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| malformed(format!("token {what} is not base64url")))?;
    serde_json::from_slice(&bytes).map_err(|e| malformed(format!("token {what} is not valid JSON: {e}")))
}

// ─── Middleware ──────────────────────────────────────────────────────

/// Verify the bearer token and inject the [`Caller`].
pub async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let Some(authenticator) = state.auth.as_deref() else {
        request.extensions_mut().insert(Caller::Anonymous);
        return next.run(request).await;
    };

    let bearer = request.headers().typed_get::<Authorization<Bearer>>();
    let result = match bearer {
        Some(Authorization(bearer)) => authenticator.verify(bearer.token()).await,
        None if request.headers().contains_key(header::AUTHORIZATION) => {
            Err(malformed("authorization header must use the Bearer scheme"))
        }
        None => Err(AuthError::MissingCredential),
    };

    match result {
        Ok(claims) => {
            tracing::debug!(sub = ?claims.sub, "authenticated request");
            request.extensions_mut().insert(Caller::Token(claims));
            next.run(request).await
        }
        Err(e) => reject(e),
    }
}

/// Log, count, and render an authentication or authorization refusal.
pub fn reject(error: AuthError) -> Response {
    tracing::warn!(cause = error.cause(), error = %error, "request refused");
    metrics::counter!("chorizo_auth_rejections_total", "cause" => error.cause()).increment(1);
    AppError::Auth(error).into_response()
}
