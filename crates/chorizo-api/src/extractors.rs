//! # Request Extractors
//!
//! JSON body handling shared by the entity routes. Axum's own rejection is
//! plain text; this maps it onto the structured [`AppError`] body.

use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde_json::Value;

use crate::error::AppError;

/// Unwrap a JSON body, turning parse failures into 400 responses.
pub fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
    }
}
