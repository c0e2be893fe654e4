//! # Entity Routes
//!
//! Generic CRUD over every registered entity type. The type comes from the
//! path; validation, projection, and persistence are the engine's job.
//!
//! ## Endpoints
//!
//! - `POST /v1/{entity_type}`: create (201, projected to the most specific type)
//! - `GET /v1/{entity_type}/{id}`: fetch by primary key
//! - `PATCH /v1/{entity_type}/{id}`: update changed fields
//! - `DELETE /v1/{entity_type}/{id}`: delete (204)
//!
//! `GET` requires the configured read permissions; the others require the
//! write permissions. Bodies are the entity's flat field mapping.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chorizo_core::FieldType;
use chorizo_entity::{Engine, EngineError, Entity};
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::extractors::json_body;
use crate::guard::RouteOptions;
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    let read = RouteOptions::new().restricted(state.read_permissions().iter().cloned());
    let write = RouteOptions::new().restricted(state.write_permissions().iter().cloned());

    Router::new()
        .route(
            "/v1/{entity_type}",
            write.clone().apply(state, post(create_entity)),
        )
        .route(
            "/v1/{entity_type}/{id}",
            read.apply(state, get(get_entity))
                .merge(write.apply(state, patch(update_entity).delete(delete_entity))),
        )
}

/// POST /v1/{entity_type}
async fn create_entity(
    State(state): State<AppState>,
    Path(entity_type): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Map<String, Value>>), AppError> {
    let payload = json_body(body)?;
    let entity = state.engine.create(&entity_type, &payload).await?;
    tracing::info!(
        entity = %entity.type_name(),
        key = ?entity.primary_key(),
        "entity created"
    );
    Ok((StatusCode::CREATED, Json(entity.as_dict())))
}

/// GET /v1/{entity_type}/{id}
async fn get_entity(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
) -> Result<Json<Map<String, Value>>, AppError> {
    let entity = load(&state.engine, &entity_type, &id).await?;
    Ok(Json(entity.as_dict()))
}

/// PATCH /v1/{entity_type}/{id}
async fn update_entity(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Map<String, Value>>, AppError> {
    let delta = json_body(body)?;
    let mut entity = load(&state.engine, &entity_type, &id).await?;
    let written = state.engine.update(&mut entity, &delta).await?;
    if !written.is_empty() {
        tracing::info!(entity = %entity.type_name(), key = %id, fields = ?written, "entity updated");
    }
    Ok(Json(entity.as_dict()))
}

/// DELETE /v1/{entity_type}/{id}
async fn delete_entity(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let entity = load(&state.engine, &entity_type, &id).await?;
    state.engine.delete(&entity).await?;
    tracing::info!(entity = %entity.type_name(), key = %id, "entity deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn load(engine: &Engine, entity_type: &str, id: &str) -> Result<Entity, AppError> {
    let key = primary_key_value(engine, entity_type, id)?;
    Ok(engine.find(entity_type, &key).await?)
}

/// Interpret a path segment as a value of the type's primary key.
///
/// A segment that cannot be a key of that type cannot name a row, so it is
/// reported as not found.
fn primary_key_value(engine: &Engine, entity_type: &str, raw: &str) -> Result<Value, AppError> {
    let validator = engine.registry().validator(entity_type)?;
    let pk = validator
        .schema()
        .primary_key()
        .ok_or_else(|| EngineError::NoPrimaryKey(entity_type.to_string()))?;
    let not_found = || AppError::NotFound(format!("{entity_type} with key {raw} not found"));

    let value = match pk.field_type {
        FieldType::Integer => Value::from(raw.parse::<i64>().map_err(|_| not_found())?),
        FieldType::Float => Value::from(raw.parse::<f64>().map_err(|_| not_found())?),
        FieldType::Boolean => Value::from(raw.parse::<bool>().map_err(|_| not_found())?),
        _ => Value::String(raw.to_string()),
    };
    match validator.normalize_field(pk.name.as_str(), &value) {
        Ok(Some(normalized)) => Ok(normalized),
        Ok(None) => Ok(value),
        Err(_) => Err(not_found()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorizo_entity::TypeRegistry;
    use serde_json::json;

    fn state() -> AppState {
        let mut registry = TypeRegistry::new().unwrap();
        registry
            .register(&json!({
                "name": "counter",
                "fields": { "n": { "type": "integer", "primary_key": true } }
            }))
            .unwrap();
        registry
            .register(&json!({
                "name": "event",
                "fields": { "at": { "type": "datetime", "primary_key": true } }
            }))
            .unwrap();
        registry
            .register(&json!({ "name": "loose", "fields": { "x": { "type": "string" } } }))
            .unwrap();
        AppState::in_memory(registry)
    }

    #[test]
    fn test_integer_keys_are_parsed() {
        let state = state();
        assert_eq!(primary_key_value(&state.engine, "counter", "42").unwrap(), json!(42));
        assert!(matches!(
            primary_key_value(&state.engine, "counter", "abc"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_datetime_keys_are_normalised() {
        let state = state();
        assert_eq!(
            primary_key_value(&state.engine, "event", "2026-10-16T12:00:00+00:00").unwrap(),
            json!("2026-10-16T12:00:00Z")
        );
    }

    #[test]
    fn test_unknown_type_and_keyless_type() {
        let state = state();
        assert!(matches!(
            primary_key_value(&state.engine, "ghost", "1"),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            primary_key_value(&state.engine, "loose", "1"),
            Err(AppError::BadRequest(_))
        ));
    }
}
