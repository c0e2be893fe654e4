//! # Entity Schema Definitions
//!
//! Typed form of a schema definition document, built only after the
//! document has passed [`MetaSchema::check`](crate::meta::MetaSchema::check).
//!
//! ## Inheritance
//!
//! A definition may name a `base` type. The resulting schema carries the
//! base's fields first, in the base's order, followed by its own. A subtype
//! field with the same name as a base field replaces it in place. The table
//! defaults to the base's table, then to the schema's own name.

use std::sync::Arc;

use chorizo_core::{FieldName, FieldType, Layout, SchemaDefinitionError, Violation, Violations};
use serde::Deserialize;
use serde_json::{Map, Value};

/// One declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Field name, unique within the schema.
    pub name: FieldName,
    /// Declared value type.
    pub field_type: FieldType,
    /// Whether this field is the row's primary key.
    pub primary_key: bool,
    /// Whether creation must supply a value (or have a default).
    pub required: bool,
    /// Value applied at creation when the field is absent.
    pub default: Option<Value>,
}

#[derive(Deserialize)]
struct RawField {
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default)]
    primary_key: bool,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: Option<Value>,
}

#[derive(Deserialize)]
struct RawDefinition {
    name: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    base: Option<String>,
    fields: Map<String, Value>,
}

/// A registered entity schema: ordered fields plus the derived record layout.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: String,
    table: String,
    base: Option<String>,
    fields: Vec<FieldSpec>,
    layout: Arc<Layout>,
    primary_key: Option<usize>,
}

impl EntitySchema {
    /// Build a schema from a meta-checked definition.
    ///
    /// `base` must be the already-registered schema named by the definition's
    /// `base` key, if any.
    pub fn from_definition(
        definition: &Value,
        base: Option<&EntitySchema>,
    ) -> Result<Self, SchemaDefinitionError> {
        let raw: RawDefinition =
            serde_json::from_value(definition.clone()).map_err(|e| malformed(
                definition_name(definition),
                "",
                e.to_string(),
            ))?;

        let mut fields: Vec<FieldSpec> = base.map(|b| b.fields.clone()).unwrap_or_default();
        for (name, spec) in &raw.fields {
            let field_name = FieldName::new(name.as_str())
                .map_err(|reason| malformed(&raw.name, &format!("/fields/{name}"), reason))?;
            let spec: RawField = serde_json::from_value(spec.clone()).map_err(|e| {
                malformed(&raw.name, &format!("/fields/{name}"), e.to_string())
            })?;
            let field = FieldSpec {
                name: field_name,
                field_type: spec.field_type,
                primary_key: spec.primary_key,
                required: spec.required,
                default: spec.default,
            };
            match fields.iter_mut().find(|f| f.name == field.name) {
                Some(existing) => *existing = field,
                None => fields.push(field),
            }
        }

        let keys: Vec<String> = fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.name.to_string())
            .collect();
        if keys.len() > 1 {
            return Err(SchemaDefinitionError::MultiplePrimaryKeys {
                schema: raw.name,
                fields: keys,
            });
        }

        let table = raw
            .table
            .or_else(|| base.map(|b| b.table.clone()))
            .unwrap_or_else(|| raw.name.clone());
        let layout = Layout::new(fields.iter().map(|f| f.name.clone()));
        let primary_key = fields.iter().position(|f| f.primary_key);

        Ok(Self {
            name: raw.name,
            table,
            base: raw.base,
            fields,
            layout,
            primary_key,
        })
    }

    /// Schema (entity type) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Base type this schema extends, if any.
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Fields in declaration order, base fields first.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.layout.slot(name).map(|slot| &self.fields[slot])
    }

    /// Record layout shared by every instance of this schema.
    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    /// The primary key field, if declared.
    pub fn primary_key(&self) -> Option<&FieldSpec> {
        self.primary_key.map(|slot| &self.fields[slot])
    }
}

/// Best-effort name of a definition for error context.
pub(crate) fn definition_name(definition: &Value) -> &str {
    definition
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
}

pub(crate) fn malformed(
    schema: &str,
    path: &str,
    message: impl Into<String>,
) -> SchemaDefinitionError {
    SchemaDefinitionError::Malformed {
        schema: schema.to_string(),
        violations: Violations::new(vec![Violation {
            path: path.to_string(),
            message: message.into(),
        }]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(schema: &EntitySchema) -> Vec<&str> {
        schema.fields().iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_fields_keep_declaration_order() {
        let def = json!({
            "name": "identity",
            "fields": {
                "zeta": { "type": "string", "primary_key": true },
                "alpha": { "type": "integer", "default": 3 },
                "mid": { "type": "dict" }
            }
        });
        let schema = EntitySchema::from_definition(&def, None).unwrap();
        assert_eq!(names(&schema), ["zeta", "alpha", "mid"]);
        assert_eq!(schema.table(), "identity");
        assert_eq!(schema.primary_key().unwrap().name.as_str(), "zeta");
        assert_eq!(schema.field("mid").unwrap().field_type, FieldType::Map);
        assert_eq!(schema.field("alpha").unwrap().default, Some(json!(3)));
    }

    #[test]
    fn test_subtype_inherits_and_overrides_base_fields() {
        let base = EntitySchema::from_definition(
            &json!({
                "name": "account",
                "table": "accounts",
                "fields": {
                    "id": { "type": "integer", "primary_key": true },
                    "kind": { "type": "string" },
                    "note": { "type": "string" }
                }
            }),
            None,
        )
        .unwrap();
        let sub = EntitySchema::from_definition(
            &json!({
                "name": "person",
                "base": "account",
                "fields": {
                    "note": { "type": "string", "required": true },
                    "born": { "type": "date" }
                }
            }),
            Some(&base),
        )
        .unwrap();

        assert_eq!(names(&sub), ["id", "kind", "note", "born"]);
        assert!(sub.field("note").unwrap().required);
        assert_eq!(sub.table(), "accounts");
        assert_eq!(sub.base(), Some("account"));
    }

    #[test]
    fn test_multiple_primary_keys_rejected() {
        let def = json!({
            "name": "t",
            "fields": {
                "a": { "type": "integer", "primary_key": true },
                "b": { "type": "integer", "primary_key": true }
            }
        });
        let err = EntitySchema::from_definition(&def, None).unwrap_err();
        assert!(matches!(
            err,
            SchemaDefinitionError::MultiplePrimaryKeys { ref fields, .. } if fields.len() == 2
        ));
    }

    #[test]
    fn test_schema_without_primary_key() {
        let def = json!({ "name": "log", "fields": { "line": { "type": "string" } } });
        let schema = EntitySchema::from_definition(&def, None).unwrap();
        assert!(schema.primary_key().is_none());
    }
}
