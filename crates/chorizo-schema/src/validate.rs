//! # Schema Validator
//!
//! Registry of entity schemas and their derived payload validators.
//!
//! ## Registration
//!
//! [`SchemaValidator::register`] runs once per entity type, before any
//! instance of that type exists. It meta-checks the definition, resolves the
//! base type, builds the [`EntitySchema`], and derives its
//! [`PayloadValidator`]. Any failure aborts registration; nothing is cached
//! for a rejected definition.
//!
//! ## Schema files
//!
//! Definitions may live on disk as `*.schema.json`, `*.schema.yaml`, or
//! `*.schema.yml`. [`SchemaValidator::load_dir`] registers a directory of
//! them, ordering subtypes after their bases.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chorizo_core::{Record, SchemaDefinitionError, ValidationError};
use serde_json::Value;

use crate::definition::{definition_name, EntitySchema};
use crate::meta::MetaSchema;
use crate::payload::{Mode, PayloadValidator};

/// File suffixes recognised by [`SchemaValidator::load_dir`].
const SCHEMA_SUFFIXES: [&str; 3] = [".schema.json", ".schema.yaml", ".schema.yml"];

/// Registered schemas and their payload validators.
#[derive(Debug)]
pub struct SchemaValidator {
    meta: MetaSchema,
    validators: HashMap<String, Arc<PayloadValidator>>,
}

impl SchemaValidator {
    /// Create an empty registry.
    pub fn new() -> Result<Self, SchemaDefinitionError> {
        Ok(Self {
            meta: MetaSchema::compile()?,
            validators: HashMap::new(),
        })
    }

    /// Register a schema definition and derive its payload validator.
    ///
    /// # Errors
    ///
    /// - [`SchemaDefinitionError::Malformed`] if the definition fails the
    ///   meta-schema or a default does not fit its field type.
    /// - [`SchemaDefinitionError::AlreadyRegistered`] for a repeated name.
    /// - [`SchemaDefinitionError::UnknownBase`] if `base` is not registered.
    /// - [`SchemaDefinitionError::MultiplePrimaryKeys`].
    pub fn register(&mut self, definition: &Value) -> Result<Arc<PayloadValidator>, SchemaDefinitionError> {
        let name = definition_name(definition);
        self.meta.check(name, definition)?;

        if self.validators.contains_key(name) {
            return Err(SchemaDefinitionError::AlreadyRegistered {
                schema: name.to_string(),
            });
        }

        let base = match definition.get("base").and_then(Value::as_str) {
            Some(base) => Some(self.validators.get(base).ok_or_else(|| {
                SchemaDefinitionError::UnknownBase {
                    schema: name.to_string(),
                    base: base.to_string(),
                }
            })?),
            None => None,
        };

        let schema = EntitySchema::from_definition(definition, base.map(|v| v.schema().as_ref()))?;
        let validator = Arc::new(PayloadValidator::derive(Arc::new(schema))?);

        tracing::info!(
            schema = %validator.schema().name(),
            table = %validator.schema().table(),
            fields = validator.schema().fields().len(),
            "registered entity schema"
        );
        self.validators
            .insert(validator.schema().name().to_string(), validator.clone());
        Ok(validator)
    }

    /// Payload validator for a registered schema.
    pub fn get(&self, name: &str) -> Option<&Arc<PayloadValidator>> {
        self.validators.get(name)
    }

    /// Whether a schema is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    /// Names of every registered schema, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Validate a payload against a registered schema.
    ///
    /// An unregistered schema name is reported under the root key.
    pub fn validate(&self, schema: &str, payload: &Value, mode: Mode<'_>) -> Result<Record, ValidationError> {
        match self.validators.get(schema) {
            Some(validator) => validator.validate(payload, mode),
            None => Err(ValidationError::single(
                ValidationError::ROOT,
                format!("unknown schema '{schema}'"),
            )),
        }
    }

    /// Register every schema file in `dir`, bases before subtypes.
    ///
    /// Returns the registered names in registration order.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<Vec<String>, SchemaDefinitionError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| SchemaDefinitionError::Load {
            schema: dir.display().to_string(),
            reason: format!("cannot read directory: {e}"),
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| SCHEMA_SUFFIXES.iter().any(|s| n.ends_with(s)))
            })
            .collect();
        paths.sort();

        let mut pending = paths
            .iter()
            .map(|path| load_file(path))
            .collect::<Result<Vec<Value>, _>>()?;

        let mut registered = Vec::new();
        while !pending.is_empty() {
            let ready = pending.iter().position(|def| {
                def.get("base")
                    .and_then(Value::as_str)
                    .map_or(true, |base| self.contains(base))
            });
            // With nothing ready, registering the first definition reports
            // its unknown base.
            let def = pending.remove(ready.unwrap_or(0));
            let validator = self.register(&def)?;
            registered.push(validator.schema().name().to_string());
        }

        tracing::debug!(dir = %dir.display(), count = registered.len(), "loaded schema directory");
        Ok(registered)
    }
}

/// Read a JSON or YAML schema definition file.
///
/// The format is chosen by extension: `.yaml`/`.yml` for YAML, anything
/// else as JSON.
pub fn load_file(path: &Path) -> Result<Value, SchemaDefinitionError> {
    let load_err = |reason: String| SchemaDefinitionError::Load {
        schema: path.display().to_string(),
        reason,
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| load_err(format!("cannot read file: {e}")))?;

    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| load_err(format!("invalid YAML: {e}"))),
        _ => serde_json::from_str(&content).map_err(|e| load_err(format!("invalid JSON: {e}"))),
    }
}
