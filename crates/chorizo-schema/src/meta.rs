//! # Schema Meta-Validation
//!
//! Entity schema definitions are themselves JSON documents. Before a
//! definition is registered it is validated against [`meta_schema`]
//! (Draft 2020-12): field names must match `^[A-Za-z0-9_]+$` and every field
//! type must come from the closed [`FieldType`](chorizo_core::FieldType) set.
//!
//! A definition that fails here fails type registration, never first use.

use chorizo_core::{SchemaDefinitionError, Violation, Violations};
use jsonschema::Validator;
use serde_json::Value;

/// Pattern shared by field, schema, and table names.
pub const NAME_PATTERN: &str = "^[A-Za-z0-9_]+$";

/// Build the meta-schema document.
///
/// `dict` is accepted as a legacy spelling of `map`.
pub fn meta_schema() -> Value {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["name", "fields"],
        "additionalProperties": false,
        "properties": {
            "name": { "type": "string", "pattern": NAME_PATTERN },
            "table": { "type": "string", "pattern": NAME_PATTERN },
            "base": { "type": ["string", "null"], "pattern": NAME_PATTERN },
            "fields": {
                "type": "object",
                "minProperties": 1,
                "propertyNames": { "pattern": NAME_PATTERN },
                "additionalProperties": {
                    "type": "object",
                    "required": ["type"],
                    "additionalProperties": false,
                    "properties": {
                        "type": {
                            "enum": [
                                "string", "integer", "float", "binary",
                                "datetime", "date", "boolean", "map", "dict"
                            ]
                        },
                        "primary_key": { "type": "boolean" },
                        "required": { "type": "boolean" },
                        "default": {}
                    }
                }
            }
        }
    })
}

/// Compiled meta-schema.
pub struct MetaSchema {
    validator: Validator,
}

impl std::fmt::Debug for MetaSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaSchema").finish_non_exhaustive()
    }
}

impl MetaSchema {
    /// Compile the meta-schema.
    pub fn compile() -> Result<Self, SchemaDefinitionError> {
        let mut opts = jsonschema::options();
        opts.with_draft(jsonschema::Draft::Draft202012);
        let validator = opts
            .build(&meta_schema())
            .map_err(|e| SchemaDefinitionError::Load {
                schema: "meta-schema".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { validator })
    }

    /// Check a definition document, collecting every violation.
    pub fn check(&self, schema_name: &str, definition: &Value) -> Result<(), SchemaDefinitionError> {
        let violations: Vec<Violation> = self
            .validator
            .iter_errors(definition)
            .map(|e| Violation {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaDefinitionError::Malformed {
                schema: schema_name.to_string(),
                violations: Violations::new(violations),
            })
        }
    }
}
