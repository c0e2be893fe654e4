//! # Ordered Record Container
//!
//! A [`Layout`] is computed once per entity schema: the declared field names
//! in order plus a name→slot index. A [`Record`] is a value vector shaped by
//! a shared layout. Entities keep two records (live and committed) over the
//! same `Arc<Layout>`, so comparing them is a slot-by-slot walk.
//!
//! Absent values are stored as `Value::Null`; every record always carries
//! exactly the layout's field set.

use std::collections::HashMap;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::field::FieldName;

/// A field name that is not part of a record's layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown field '{0}'")]
pub struct UnknownField(pub String);

/// Field order and slot index for one schema.
#[derive(Debug, PartialEq, Eq)]
pub struct Layout {
    names: Vec<FieldName>,
    index: HashMap<String, usize>,
}

impl Layout {
    /// Build a layout from field names in declaration order.
    ///
    /// Duplicate names keep their first slot.
    pub fn new(names: impl IntoIterator<Item = FieldName>) -> Arc<Self> {
        let mut ordered = Vec::new();
        let mut index = HashMap::new();
        for name in names {
            if !index.contains_key(name.as_str()) {
                index.insert(name.as_str().to_string(), ordered.len());
                ordered.push(name);
            }
        }
        Arc::new(Self {
            names: ordered,
            index,
        })
    }

    /// Field names in declaration order.
    pub fn names(&self) -> &[FieldName] {
        &self.names
    }

    /// Slot of a field, if declared.
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Whether a field is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the layout has no fields.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Field values laid out by a shared [`Layout`].
#[derive(Debug, Clone)]
pub struct Record {
    layout: Arc<Layout>,
    values: Vec<Value>,
}

impl Record {
    /// A record with every field `null`.
    pub fn empty(layout: Arc<Layout>) -> Self {
        let values = vec![Value::Null; layout.len()];
        Self { layout, values }
    }

    /// Build a record from a JSON object. Keys outside the layout are ignored;
    /// declared fields missing from `map` are `null`.
    pub fn from_map(layout: Arc<Layout>, map: &Map<String, Value>) -> Self {
        let values = layout
            .names()
            .iter()
            .map(|name| map.get(name.as_str()).cloned().unwrap_or(Value::Null))
            .collect();
        Self { layout, values }
    }

    /// The layout shared by this record.
    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    /// Value of a field, or `None` if the field is not declared.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.layout.slot(name).map(|slot| &self.values[slot])
    }

    /// Replace a field's value, returning the previous one.
    pub fn set(&mut self, name: &str, value: Value) -> Result<Value, UnknownField> {
        let slot = self
            .layout
            .slot(name)
            .ok_or_else(|| UnknownField(name.to_string()))?;
        Ok(std::mem::replace(&mut self.values[slot], value))
    }

    /// Copy every declared key of `map` into this record; other keys are ignored.
    pub fn apply(&mut self, map: &Map<String, Value>) {
        for (key, value) in map {
            if let Some(slot) = self.layout.slot(key) {
                self.values[slot] = value.clone();
            }
        }
    }

    /// `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.layout
            .names()
            .iter()
            .map(FieldName::as_str)
            .zip(self.values.iter())
    }

    /// Fields whose value differs from `other`, with this record's value.
    ///
    /// Both records must share a layout; fields are compared by value.
    pub fn diff<'a>(&'a self, other: &Record) -> Vec<(&'a str, &'a Value)> {
        self.iter()
            .filter(|(name, value)| other.get(name) != Some(*value))
            .collect()
    }

    /// Project to a flat JSON object containing exactly the declared fields.
    pub fn to_map(&self) -> Map<String, Value> {
        self.iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.layout.names() == other.layout.names() && self.values == other.values
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
