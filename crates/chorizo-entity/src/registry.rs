//! # Type Registry and Variant Projection
//!
//! Holds every registered entity schema together with the projection rules
//! that pick the most specific type for a creation payload.
//!
//! ## Projection
//!
//! A rule says: "when resolving from type `from` and the payload satisfies
//! the predicate, move to type `to`". Resolution starts at the requested
//! type and follows the first matching rule at each step until no rule
//! matches or a type would repeat. Each step visits a new type, so
//! resolution ends within as many steps as there are registered types, even
//! when the rules form a cycle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chorizo_core::SchemaDefinitionError;
use chorizo_schema::{PayloadValidator, SchemaValidator};
use serde_json::{Map, Value};

use crate::error::EngineError;

type Predicate = Box<dyn Fn(&Map<String, Value>) -> bool + Send + Sync>;

struct Rule {
    to: String,
    predicate: Predicate,
}

/// Registered entity types and their projection rules.
pub struct TypeRegistry {
    schemas: SchemaValidator,
    rules: HashMap<String, Vec<Rule>>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.schemas.names())
            .field("rules", &self.rules.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Result<Self, SchemaDefinitionError> {
        Ok(Self::with_schemas(SchemaValidator::new()?))
    }

    /// Wrap an already-populated schema validator.
    pub fn with_schemas(schemas: SchemaValidator) -> Self {
        Self {
            schemas,
            rules: HashMap::new(),
        }
    }

    /// Register an entity type from its schema definition.
    pub fn register(&mut self, definition: &Value) -> Result<Arc<PayloadValidator>, SchemaDefinitionError> {
        self.schemas.register(definition)
    }

    /// Add a projection rule from `from` to `to`.
    ///
    /// Rules for one source type are tried in the order they were added.
    pub fn add_projection<F>(&mut self, from: &str, to: &str, predicate: F) -> Result<(), EngineError>
    where
        F: Fn(&Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        for name in [from, to] {
            if !self.schemas.contains(name) {
                return Err(EngineError::UnknownType(name.to_string()));
            }
        }
        self.rules.entry(from.to_string()).or_default().push(Rule {
            to: to.to_string(),
            predicate: Box::new(predicate),
        });
        Ok(())
    }

    /// Add a rule that projects to `to` when `payload[field] == value`.
    pub fn add_discriminator(
        &mut self,
        from: &str,
        field: &str,
        value: Value,
        to: &str,
    ) -> Result<(), EngineError> {
        let field = field.to_string();
        self.add_projection(from, to, move |payload| payload.get(&field) == Some(&value))
    }

    /// Resolve the most specific registered type for `payload`.
    pub fn project<'a>(&'a self, type_name: &'a str, payload: &Value) -> Result<&'a str, EngineError> {
        if !self.schemas.contains(type_name) {
            return Err(EngineError::UnknownType(type_name.to_string()));
        }
        let Value::Object(payload) = payload else {
            return Ok(type_name);
        };

        let mut current = type_name;
        let mut visited = HashSet::from([current]);
        loop {
            let next = self
                .rules
                .get(current)
                .and_then(|rules| rules.iter().find(|rule| (rule.predicate)(payload)))
                .map(|rule| rule.to.as_str());
            match next {
                Some(next) if visited.insert(next) => current = next,
                Some(next) => {
                    if next != current {
                        tracing::warn!(from = %type_name, at = %current, repeat = %next, "projection rules form a cycle");
                    }
                    return Ok(current);
                }
                None => return Ok(current),
            }
        }
    }

    /// Payload validator for a registered type.
    pub fn validator(&self, type_name: &str) -> Result<&Arc<PayloadValidator>, EngineError> {
        self.schemas
            .get(type_name)
            .ok_or_else(|| EngineError::UnknownType(type_name.to_string()))
    }

    /// The underlying schema validator.
    pub fn schemas(&self) -> &SchemaValidator {
        &self.schemas
    }
}
