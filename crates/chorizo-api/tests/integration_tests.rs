//! # Integration Tests for chorizo-api
//!
//! Drives the assembled router end to end: generic CRUD over the fixture
//! schemas, variant projection, structured error bodies, and bearer
//! authentication against a mock key set and revocation list.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chorizo_api::auth::Authenticator;
use chorizo_api::{AppConfig, AppState};
use chorizo_cache::{FailurePolicy, KeySetCache, RevocationCache};
use chorizo_core::PersistenceError;
use chorizo_entity::{Engine, MemoryBackend, TypeRegistry};
use chorizo_schema::SchemaValidator;
use ed25519_dalek::{Signer, SigningKey};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// -- Helpers ------------------------------------------------------------------

fn registry() -> TypeRegistry {
    let mut schemas = SchemaValidator::new().unwrap();
    schemas
        .load_dir(Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/schemas"))
        .unwrap();
    let mut registry = TypeRegistry::with_schemas(schemas);
    registry
        .add_discriminator("widget", "kind", json!("gauge"), "gauge")
        .unwrap();
    registry
}

/// State with authentication disabled.
fn open_state() -> AppState {
    AppState::in_memory(registry())
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = chorizo_api::app(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

// -- Health -------------------------------------------------------------------

#[tokio::test]
async fn test_health_lists_registered_types() {
    let (status, body) = send(&open_state(), empty_request("GET", "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["auth"], false);
    let types = body["types"].as_array().unwrap();
    assert!(types.contains(&json!("widget")));
    assert!(types.contains(&json!("gauge")));
}

#[tokio::test]
async fn test_metrics_without_recorder_is_404() {
    let (status, _) = send(&open_state(), empty_request("GET", "/metrics", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// -- CRUD ---------------------------------------------------------------------

#[tokio::test]
async fn test_create_applies_defaults_and_assigns_key() {
    let state = open_state();
    let (status, body) = send(
        &state,
        json_request("POST", "/v1/widget", json!({ "label": "first" }), None),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], 1);
    assert_eq!(body["label"], "first");
    assert_eq!(body["kind"], "plain");
}

#[tokio::test]
async fn test_get_patch_delete_flow() {
    let state = open_state();
    let (status, created) = send(
        &state,
        json_request("POST", "/v1/widget", json!({ "label": "w", "weight": 1.5 }), None),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_i64().unwrap();

    let (status, fetched) = send(&state, empty_request("GET", &format!("/v1/widget/{id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);

    let (status, updated) = send(
        &state,
        json_request("PATCH", &format!("/v1/widget/{id}"), json!({ "weight": 2.5 }), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["weight"], 2.5);
    assert_eq!(updated["label"], "w");

    let (_, refetched) = send(&state, empty_request("GET", &format!("/v1/widget/{id}"), None)).await;
    assert_eq!(refetched["weight"], 2.5);

    let (status, _) = send(&state, empty_request("DELETE", &format!("/v1/widget/{id}"), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&state, empty_request("GET", &format!("/v1/widget/{id}"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_create_projects_to_variant() {
    let state = open_state();
    let (status, body) = send(
        &state,
        json_request("POST", "/v1/widget", json!({ "label": "g", "kind": "gauge" }), None),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["unit"], "mm");

    let id = body["id"].as_i64().unwrap();
    let (status, fetched) = send(&state, empty_request("GET", &format!("/v1/gauge/{id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["unit"], "mm");
}

#[tokio::test]
async fn test_invalid_payload_is_422_with_field_details() {
    let state = open_state();
    let (status, body) = send(
        &state,
        json_request("POST", "/v1/widget", json!({ "weight": "heavy" }), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["details"]["label"].is_array());
    assert!(body["error"]["details"]["weight"].is_array());
}

#[tokio::test]
async fn test_unparsable_body_is_400() {
    let state = open_state();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/widget")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_unknown_type_is_404() {
    let state = open_state();
    let (status, _) = send(&state, json_request("POST", "/v1/ghost", json!({}), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&state, empty_request("GET", "/v1/ghost/1", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_key_is_404() {
    let state = open_state();
    let (status, _) = send(&state, empty_request("GET", "/v1/widget/not-a-number", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_backend_failures_map_to_status() {
    let backend = Arc::new(MemoryBackend::new());
    let engine = Engine::new(Arc::new(registry()), backend.clone());
    let state = AppState::new(AppConfig::default(), engine);

    backend.fail_next_write(PersistenceError::Rejected("duplicate key".into()));
    let (status, body) = send(&state, json_request("POST", "/v1/widget", json!({ "label": "a" }), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    backend.fail_next_write(PersistenceError::Unavailable("pool exhausted".into()));
    let (status, _) = send(&state, json_request("POST", "/v1/widget", json!({ "label": "a" }), None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(backend.row_count("widgets"), 0);
}

// -- Authentication -----------------------------------------------------------

struct AuthFixture {
    state: AppState,
    key: SigningKey,
    _server: MockServer,
}

impl AuthFixture {
    async fn start(revoked: &[&str]) -> Self {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [{
                "kid": "k1",
                "kty": "OKP",
                "crv": "Ed25519",
                "x": URL_SAFE_NO_PAD.encode(key.verifying_key().as_bytes()),
            }]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/revoked"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "revoked": revoked })))
            .mount(&server)
            .await;

        let ttl = Duration::from_secs(60);
        let timeout = Duration::from_secs(5);
        let url = |p: &str| format!("{}{p}", server.uri()).parse().unwrap();
        let keys = KeySetCache::from_url(url("/keys"), ttl, timeout, FailurePolicy::ServeStale).unwrap();
        let revocation =
            RevocationCache::from_url(url("/revoked"), ttl, timeout, FailurePolicy::ServeStale).unwrap();

        let state = open_state().with_auth(Authenticator::new(keys, Some(revocation)));
        Self { state, key, _server: server }
    }

    fn token(&self, claims: Value) -> String {
        sign(&self.key, "k1", claims)
    }
}

fn sign(key: &SigningKey, kid: &str, claims: Value) -> String {
    let input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(json!({ "alg": "EdDSA", "kid": kid }).to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );
    let signature = key.sign(input.as_bytes());
    format!("{input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

#[tokio::test]
async fn test_health_is_public_with_auth_enabled() {
    let fixture = AuthFixture::start(&[]).await;
    let (status, body) = send(&fixture.state, empty_request("GET", "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["auth"], true);
}

#[tokio::test]
async fn test_missing_token_is_401() {
    let fixture = AuthFixture::start(&[]).await;
    let (status, body) = send(&fixture.state, empty_request("GET", "/v1/widget/1", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "MISSING_CREDENTIAL");
    assert_eq!(body["error"]["details"]["cause"], "missing_credential");
}

#[tokio::test]
async fn test_non_bearer_scheme_is_malformed() {
    let fixture = AuthFixture::start(&[]).await;
    let request = Request::builder()
        .uri("/v1/widget/1")
        .header("authorization", "Basic dXNlcjpwYXNz")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&fixture.state, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "MALFORMED_CREDENTIAL");
}

#[tokio::test]
async fn test_foreign_signature_is_401() {
    let fixture = AuthFixture::start(&[]).await;
    let other = SigningKey::generate(&mut rand::rngs::OsRng);
    let token = sign(&other, "k1", json!({ "perm": ["entities:read"] }));
    let (status, body) = send(&fixture.state, empty_request("GET", "/v1/widget/1", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_SIGNATURE");
}

#[tokio::test]
async fn test_unknown_kid_is_401() {
    let fixture = AuthFixture::start(&[]).await;
    let token = sign(&fixture.key, "k2", json!({}));
    let (status, body) = send(&fixture.state, empty_request("GET", "/v1/widget/1", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNKNOWN_KEY");
}

#[tokio::test]
async fn test_expired_token_is_401() {
    let fixture = AuthFixture::start(&[]).await;
    let token = fixture.token(json!({ "exp": 1, "perm": ["entities:read"] }));
    let (status, body) = send(&fixture.state, empty_request("GET", "/v1/widget/1", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "TOKEN_EXPIRED");
}

#[tokio::test]
async fn test_read_permission_does_not_grant_writes() {
    let fixture = AuthFixture::start(&[]).await;
    let token = fixture.token(json!({ "sub": "reader", "perm": ["entities:read"] }));
    let (status, body) = send(
        &fixture.state,
        json_request("POST", "/v1/widget", json!({ "label": "x" }), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
    assert_eq!(body["error"]["details"]["missing"], json!(["entities:write"]));
}

#[tokio::test]
async fn test_granted_token_reaches_handlers() {
    let fixture = AuthFixture::start(&[]).await;
    let token = fixture.token(json!({ "sub": "svc", "perm": "entities:read entities:write" }));

    let (status, created) = send(
        &fixture.state,
        json_request("POST", "/v1/widget", json!({ "label": "ok" }), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let uri = format!("/v1/widget/{}", created["id"]);
    let (status, fetched) = send(&fixture.state, empty_request("GET", &uri, Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["label"], "ok");
}

#[tokio::test]
async fn test_revoked_token_is_401() {
    let fixture = AuthFixture::start(&["t-1"]).await;
    let revoked = fixture.token(json!({ "jti": "t-1", "perm": ["entities:read"] }));
    let (status, body) = send(&fixture.state, empty_request("GET", "/v1/widget/1", Some(&revoked))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "TOKEN_REVOKED");

    let live = fixture.token(json!({ "jti": "t-2", "perm": ["entities:read"] }));
    let (status, _) = send(&fixture.state, empty_request("GET", "/v1/widget/1", Some(&live))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unreachable_key_set_is_503() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/keys"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let keys = KeySetCache::from_url(
        format!("{}/keys", server.uri()).parse().unwrap(),
        Duration::from_secs(60),
        Duration::from_secs(5),
        FailurePolicy::ServeStale,
    )
    .unwrap();
    let state = open_state().with_auth(Authenticator::new(keys, None));

    let token = sign(&SigningKey::generate(&mut rand::rngs::OsRng), "k1", json!({}));
    let (status, body) = send(&state, empty_request("GET", "/v1/widget/1", Some(&token))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "KEYS_UNAVAILABLE");
}
