//! # Payload Validator
//!
//! Derived once per registered [`EntitySchema`]. Validates creation payloads
//! (defaults applied) and update payloads (merged onto the committed record)
//! and produces a normalised [`Record`].
//!
//! ## Pipeline
//!
//! 1. Shape the input into one value per declared field. Unknown keys are
//!    dropped.
//! 2. Required check: a required, non-primary-key field must not be null.
//! 3. Type check with a compiled JSON Schema (one `type` rule per field;
//!    every field is nullable at this stage).
//! 4. Normalisation per [`FieldType`]:
//!    `datetime` to RFC 3339 UTC, `date` to `YYYY-MM-DD`, `binary` to
//!    lowercase hex, `float` always stored as a float, `integer` always
//!    stored as an integer.
//!
//! Stages 2 and 3 report together; normalisation only runs on a payload
//! that passed them. Each stage collects every failing field.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use chorizo_core::{FieldType, Record, SchemaDefinitionError, ValidationError, Violation, Violations};
use jsonschema::Validator;
use serde_json::{Map, Number, Value};

use crate::definition::{malformed, EntitySchema};

/// How a payload relates to existing state.
#[derive(Debug, Clone, Copy)]
pub enum Mode<'a> {
    /// Full payload for a new entity. Defaults fill absent fields.
    Create,
    /// Partial payload, merged onto the given committed record.
    Update(&'a Record),
}

/// Validation rules derived from one entity schema.
pub struct PayloadValidator {
    schema: Arc<EntitySchema>,
    types: Validator,
}

impl std::fmt::Debug for PayloadValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadValidator")
            .field("schema", &self.schema.name())
            .finish_non_exhaustive()
    }
}

fn json_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String | FieldType::Binary | FieldType::Datetime | FieldType::Date => "string",
        FieldType::Integer => "integer",
        FieldType::Float => "number",
        FieldType::Boolean => "boolean",
        FieldType::Map => "object",
    }
}

impl PayloadValidator {
    /// Derive the validator for `schema`, checking every declared default.
    pub fn derive(schema: Arc<EntitySchema>) -> Result<Self, SchemaDefinitionError> {
        let mut properties = Map::new();
        for field in schema.fields() {
            properties.insert(
                field.name.to_string(),
                serde_json::json!({ "type": [json_type(field.field_type), "null"] }),
            );
        }
        let document = serde_json::json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "properties": properties,
        });

        let mut opts = jsonschema::options();
        opts.with_draft(jsonschema::Draft::Draft202012);
        let types = opts
            .build(&document)
            .map_err(|e| malformed(schema.name(), "", e.to_string()))?;

        let validator = Self { schema, types };
        validator.check_defaults()?;
        Ok(validator)
    }

    fn check_defaults(&self) -> Result<(), SchemaDefinitionError> {
        let mut violations = Vec::new();
        for field in self.schema.fields() {
            let Some(default) = &field.default else {
                continue;
            };
            let path = format!("/fields/{}/default", field.name);
            let instance = Value::Object(Map::from_iter([(field.name.to_string(), default.clone())]));
            for e in self.types.iter_errors(&instance) {
                violations.push(Violation {
                    path: path.clone(),
                    message: e.to_string(),
                });
            }
            if let Err(message) = normalize(field.field_type, default) {
                violations.push(Violation { path, message });
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaDefinitionError::Malformed {
                schema: self.schema.name().to_string(),
                violations: Violations::new(violations),
            })
        }
    }

    /// The schema these rules were derived from.
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// Validate and normalise `payload`.
    pub fn validate(&self, payload: &Value, mode: Mode<'_>) -> Result<Record, ValidationError> {
        let Value::Object(input) = payload else {
            return Err(ValidationError::single(
                ValidationError::ROOT,
                "payload must be a JSON object",
            ));
        };

        let mut errors = ValidationError::new();
        let mut record = match mode {
            Mode::Create => {
                let mut record = Record::empty(self.schema.layout().clone());
                for field in self.schema.fields() {
                    let value = match (input.get(field.name.as_str()), &field.default) {
                        (Some(v), _) => v.clone(),
                        (None, Some(default)) => default.clone(),
                        (None, None) => Value::Null,
                    };
                    // Layout and schema fields are built from the same list.
                    let _ = record.set(field.name.as_str(), value);
                }
                record
            }
            Mode::Update(committed) => {
                let mut record = committed.clone();
                record.apply(input);
                record
            }
        };

        for field in self.schema.fields() {
            let missing = record.get(field.name.as_str()).map_or(true, Value::is_null);
            if missing && field.required && !field.primary_key {
                errors.add(field.name.as_str(), "required field");
            }
        }

        let instance = Value::Object(record.to_map());
        for e in self.types.iter_errors(&instance) {
            errors.add(field_of(&e.instance_path.to_string()), e.to_string());
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        for field in self.schema.fields() {
            let name = field.name.as_str();
            let Some(value) = record.get(name) else {
                continue;
            };
            match normalize(field.field_type, value) {
                Ok(normalized) => {
                    let _ = record.set(name, normalized);
                }
                Err(reason) => errors.add(name, reason),
            }
        }
        errors.into_result().map(|()| record)
    }

    /// Normalise one field's value without running the full pipeline.
    ///
    /// Returns `Ok(None)` for a field the schema does not declare.
    pub fn normalize_field(&self, name: &str, value: &Value) -> Result<Option<Value>, ValidationError> {
        let Some(field) = self.schema.field(name) else {
            return Ok(None);
        };
        let instance = Value::Object(Map::from_iter([(name.to_string(), value.clone())]));
        let mut errors = ValidationError::new();
        for e in self.types.iter_errors(&instance) {
            errors.add(name, e.to_string());
        }
        errors.into_result()?;
        normalize(field.field_type, value)
            .map(Some)
            .map_err(|reason| ValidationError::single(name, reason))
    }
}

/// First segment of a JSON pointer, or the root marker.
fn field_of(instance_path: &str) -> String {
    instance_path
        .trim_start_matches('/')
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(ValidationError::ROOT)
        .to_string()
}

/// Canonical form of a type-checked value. `null` passes through.
fn normalize(field_type: FieldType, value: &Value) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match field_type {
        FieldType::Datetime => {
            let s = value.as_str().ok_or("must be a string")?;
            let parsed = DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc())
                })
                .map_err(|_| format!("'{s}' is not an RFC 3339 datetime"))?;
            Ok(Value::String(parsed.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
        }
        FieldType::Date => {
            let s = value.as_str().ok_or("must be a string")?;
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| format!("'{s}' is not a YYYY-MM-DD date"))?;
            Ok(Value::String(date.format("%Y-%m-%d").to_string()))
        }
        FieldType::Binary => {
            let s = value.as_str().ok_or("must be a string")?;
            let bytes = hex::decode(s).map_err(|_| "must be hex-encoded bytes".to_string())?;
            Ok(Value::String(hex::encode(bytes)))
        }
        FieldType::Float => {
            let f = value.as_f64().ok_or("must be a number")?;
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| "must be a finite number".to_string())
        }
        FieldType::Integer => match value.as_i64() {
            Some(_) => Ok(value.clone()),
            None => value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| Value::from(f as i64))
                .ok_or_else(|| "must be an integer".to_string()),
        },
        FieldType::String | FieldType::Boolean | FieldType::Map => Ok(value.clone()),
    }
}
