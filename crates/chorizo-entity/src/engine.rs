//! # Entity Engine — CRUD Lifecycle
//!
//! Orchestrates projection, validation, and persistence for entities.
//!
//! ## Create
//!
//! 1. Project the requested type to its most specific registered variant.
//! 2. Validate and normalise the payload (defaults applied).
//! 3. Insert through the backend; a `null` primary key is left out so the
//!    store can assign one.
//! 4. The returned row becomes both the committed snapshot and the live
//!    values.
//!
//! ## Update
//!
//! 1. Merge the delta onto the committed snapshot and validate the whole.
//! 2. Diff the merged record against the committed snapshot. No differences
//!    means no backend call.
//! 3. Send exactly the changed fields to the backend.
//! 4. Apply the backend's confirmed values.
//!
//! Any error leaves the entity untouched.

use std::sync::Arc;

use chorizo_core::{Record, ValidationError};
use chorizo_schema::{EntitySchema, Mode, PayloadValidator};
use serde_json::{Map, Value};

use crate::backend::PersistenceBackend;
use crate::entity::Entity;
use crate::error::EngineError;
use crate::registry::TypeRegistry;

/// Entity lifecycle operations over a registry and a backend.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<TypeRegistry>,
    backend: Arc<dyn PersistenceBackend>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(registry: Arc<TypeRegistry>, backend: Arc<dyn PersistenceBackend>) -> Self {
        Self { registry, backend }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Create and persist a new entity.
    pub async fn create(&self, type_name: &str, payload: &Value) -> Result<Entity, EngineError> {
        let concrete = self.registry.project(type_name, payload)?;
        let validator = self.registry.validator(concrete)?;
        let schema = validator.schema();

        let record = validator.validate(payload, Mode::Create)?;
        let mut fields = record.to_map();
        if let Some(pk) = schema.primary_key() {
            if fields.get(pk.name.as_str()).is_some_and(Value::is_null) {
                fields.remove(pk.name.as_str());
            }
        }

        let row = self
            .backend
            .insert(schema, &fields)
            .await
            .inspect_err(|e| {
                tracing::error!(entity = %concrete, table = %schema.table(), error = %e, "insert failed");
            })?;

        tracing::debug!(entity = %concrete, requested = %type_name, "created entity");
        Ok(Entity::from_committed(schema.clone(), confirmed_record(validator, row)))
    }

    /// Apply `delta` to `entity` and persist the changed fields.
    ///
    /// Returns the names of the fields that were written, empty when the
    /// delta changes nothing.
    pub async fn update(&self, entity: &mut Entity, delta: &Value) -> Result<Vec<String>, EngineError> {
        let validator = self.registry.validator(entity.type_name())?;
        let merged = validator.validate(delta, Mode::Update(entity.committed_record()))?;
        let changed = changed_fields(&merged, entity.committed_record());
        self.write(validator, entity, changed).await
    }

    /// Persist every live edit made with [`Entity::set`], then sync.
    ///
    /// Live edits are replaced by their normalised values first, so an edit
    /// that normalises back to the committed value is neither written nor
    /// left behind in the snapshot.
    pub async fn save(&self, entity: &mut Entity) -> Result<Vec<String>, EngineError> {
        let validator = self.registry.validator(entity.type_name())?;
        let dirty = entity.dirty();
        let merged = validator.validate(
            &Value::Object(dirty.clone()),
            Mode::Update(entity.committed_record()),
        )?;
        for name in dirty.keys() {
            if let Some(normalized) = merged.get(name) {
                let _ = entity.set(name, normalized.clone());
            }
        }
        let changed = changed_fields(&merged, entity.committed_record());
        let written = self.write(validator, entity, changed).await?;
        entity.sync();
        Ok(written)
    }

    /// Load a committed entity by primary key.
    pub async fn find(&self, type_name: &str, key: &Value) -> Result<Entity, EngineError> {
        let validator = self.registry.validator(type_name)?;
        let row = self.backend.fetch(validator.schema(), key).await?;
        Ok(Entity::from_committed(
            validator.schema().clone(),
            confirmed_record(validator, row),
        ))
    }

    /// Delete the entity's row.
    pub async fn delete(&self, entity: &Entity) -> Result<(), EngineError> {
        let key = entity
            .primary_key()
            .ok_or_else(|| EngineError::NoPrimaryKey(entity.type_name().to_string()))?;
        self.backend
            .delete(entity.schema(), key)
            .await
            .inspect_err(|e| {
                tracing::error!(entity = %entity.type_name(), error = %e, "delete failed");
            })?;
        tracing::debug!(entity = %entity.type_name(), key = %key, "deleted entity");
        Ok(())
    }

    async fn write(
        &self,
        validator: &PayloadValidator,
        entity: &mut Entity,
        changed: Map<String, Value>,
    ) -> Result<Vec<String>, EngineError> {
        if changed.is_empty() {
            return Ok(Vec::new());
        }
        let schema: &EntitySchema = validator.schema();
        if let Some(pk) = schema.primary_key() {
            if changed.contains_key(pk.name.as_str()) {
                return Err(ValidationError::single(pk.name.as_str(), "primary key cannot change").into());
            }
        }
        let key = entity
            .primary_key()
            .cloned()
            .ok_or_else(|| EngineError::NoPrimaryKey(entity.type_name().to_string()))?;

        let confirmed = self
            .backend
            .update_fields(schema, &key, &changed)
            .await
            .inspect_err(|e| {
                tracing::error!(entity = %schema.name(), key = %key, error = %e, "update failed");
            })?;

        entity.confirm(&changed, &normalize_row(validator, confirmed));

        let written: Vec<String> = changed.keys().cloned().collect();
        tracing::debug!(entity = %schema.name(), key = %key, fields = ?written, "updated entity");
        Ok(written)
    }
}

fn changed_fields(merged: &Record, committed: &Record) -> Map<String, Value> {
    merged
        .diff(committed)
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// Normalise the declared fields of a backend row where they fit their
/// type; undeclared columns are dropped.
fn normalize_row(validator: &PayloadValidator, row: Map<String, Value>) -> Map<String, Value> {
    row.into_iter()
        .filter_map(|(name, value)| match validator.normalize_field(&name, &value) {
            Ok(Some(normalized)) => Some((name, normalized)),
            Ok(None) => None,
            Err(_) => Some((name, value)),
        })
        .collect()
}

fn confirmed_record(validator: &PayloadValidator, row: Map<String, Value>) -> Record {
    Record::from_map(
        validator.schema().layout().clone(),
        &normalize_row(validator, row),
    )
}
