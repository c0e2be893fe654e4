//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps engine, persistence, and authentication errors to HTTP status codes
//! and a JSON body of the form `{ "error": { code, message, details? } }`.
//! Internal error details are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chorizo_core::{AuthError, PersistenceError, ValidationError};
use chorizo_entity::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g. "NOT_FOUND", "VALIDATION_ERROR").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Field-level reasons for validation errors, the cause for auth errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource or entity type not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Payload failed schema validation (422).
    #[error("{0}")]
    Validation(ValidationError),

    /// Request could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Authentication or authorization refused (401, 403, or 503).
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Write conflicts with stored state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The configured backend lacks the operation (501).
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A dependency is unavailable (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Auth(e) => match e {
                AuthError::MissingCredential => (StatusCode::UNAUTHORIZED, "MISSING_CREDENTIAL"),
                AuthError::MalformedCredential(_) => (StatusCode::UNAUTHORIZED, "MALFORMED_CREDENTIAL"),
                AuthError::UnknownKey { .. } => (StatusCode::UNAUTHORIZED, "UNKNOWN_KEY"),
                AuthError::InvalidSignature => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE"),
                AuthError::Expired => (StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
                AuthError::Revoked => (StatusCode::UNAUTHORIZED, "TOKEN_REVOKED"),
                AuthError::KeysUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "KEYS_UNAVAILABLE"),
                AuthError::InsufficientPermission { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            },
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::NotImplemented(_) => (StatusCode::NOT_IMPLEMENTED, "NOT_IMPLEMENTED"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation(e) => serde_json::to_value(e).ok(),
            Self::Auth(AuthError::InsufficientPermission { missing }) => {
                Some(json!({ "cause": "insufficient_permission", "missing": missing }))
            }
            Self::Auth(e) => Some(json!({ "cause": e.cause() })),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::Validation(_) => "Invalid input".to_string(),
            // Upstream fetch errors name internal endpoints.
            Self::Auth(AuthError::KeysUnavailable(_)) => "verification keys unavailable".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<PersistenceError> for AppError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound { .. } => Self::NotFound(err.to_string()),
            PersistenceError::Rejected(_) => Self::Conflict(err.to_string()),
            PersistenceError::Unsupported { .. } => Self::NotImplemented(err.to_string()),
            PersistenceError::Unavailable(_) => Self::ServiceUnavailable(err.to_string()),
            PersistenceError::Backend(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(e) => Self::Validation(e),
            EngineError::Persistence(e) => e.into(),
            EngineError::UnknownType(name) => Self::NotFound(format!("unknown entity type '{name}'")),
            EngineError::NoPrimaryKey(name) => {
                Self::BadRequest(format!("entity type '{name}' has no primary key"))
            }
            EngineError::Registration(e) => Self::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorizo_core::CacheFetchError;
    use http_body_util::BodyExt;

    async fn response_parts(err: AppError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn test_validation_error_carries_field_details() {
        let mut err = ValidationError::new();
        err.add("b", "must be integer");
        err.add("name", "required field");
        let (status, body) = response_parts(AppError::Validation(err)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.error.code, "VALIDATION_ERROR");
        assert_eq!(
            body.error.details.unwrap(),
            json!({ "b": ["must be integer"], "name": ["required field"] })
        );
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let (status, body) = response_parts(AppError::Internal("pool exploded".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.code, "INTERNAL_ERROR");
        assert_eq!(body.error.message, "An internal error occurred");
        assert!(body.error.details.is_none());
    }

    #[tokio::test]
    async fn test_auth_errors_have_distinct_codes() {
        let cases = [
            (AuthError::MissingCredential, StatusCode::UNAUTHORIZED, "MISSING_CREDENTIAL"),
            (AuthError::InvalidSignature, StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE"),
            (AuthError::Expired, StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
            (AuthError::Revoked, StatusCode::UNAUTHORIZED, "TOKEN_REVOKED"),
            (
                AuthError::InsufficientPermission { missing: vec!["entities:write".into()] },
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
            ),
        ];
        for (err, expected_status, expected_code) in cases {
            let cause = err.cause();
            let (status, body) = response_parts(AppError::Auth(err)).await;
            assert_eq!(status, expected_status);
            assert_eq!(body.error.code, expected_code);
            assert_eq!(body.error.details.unwrap()["cause"], cause);
        }
    }

    #[tokio::test]
    async fn test_keys_unavailable_does_not_leak_upstream_url() {
        let err = AuthError::KeysUnavailable(CacheFetchError::Status {
            url: "http://10.0.0.7/keys".into(),
            status: 502,
        });
        let (status, body) = response_parts(AppError::Auth(err)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.error.message.contains("10.0.0.7"));
    }

    #[test]
    fn test_persistence_errors_map_to_statuses() {
        let not_found = AppError::from(PersistenceError::NotFound {
            table: "t".into(),
            key: "1".into(),
        });
        assert_eq!(not_found.status_and_code().0, StatusCode::NOT_FOUND);
        let rejected = AppError::from(PersistenceError::Rejected("duplicate".into()));
        assert_eq!(rejected.status_and_code().0, StatusCode::CONFLICT);
        let unsupported = AppError::from(PersistenceError::Unsupported { operation: "delete" });
        assert_eq!(unsupported.status_and_code().0, StatusCode::NOT_IMPLEMENTED);
        let backend = AppError::from(PersistenceError::Backend("driver".into()));
        assert_eq!(backend.status_and_code().0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_engine_errors_map_through() {
        let unknown = AppError::from(EngineError::UnknownType("ghost".into()));
        assert_eq!(unknown.status_and_code(), (StatusCode::NOT_FOUND, "NOT_FOUND"));
        let invalid = AppError::from(EngineError::Validation(ValidationError::single("a", "bad")));
        assert_eq!(invalid.status_and_code().1, "VALIDATION_ERROR");
    }

    #[test]
    fn test_error_body_omits_empty_details() {
        let body = ErrorBody {
            error: ErrorDetail {
                code: "NOT_FOUND".into(),
                message: "gone".into(),
                details: None,
            },
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("details"));
    }
}
