//! # Entity — Live Values and Committed Snapshot
//!
//! An [`Entity`] is one instance of a registered schema. It keeps two
//! records over the same layout:
//!
//! - **live**: current values, possibly edited locally;
//! - **committed**: the last values a backend confirmed as durable.
//!
//! `changed()` is true exactly when the two differ in at least one field.
//! Only the [`Engine`](crate::Engine) moves values into the committed
//! snapshot, and only after the backend confirms a write.

use std::sync::Arc;

use chorizo_core::{Record, UnknownField};
use chorizo_schema::EntitySchema;
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};

/// An instance of a registered entity schema.
#[derive(Debug, Clone)]
pub struct Entity {
    schema: Arc<EntitySchema>,
    live: Record,
    committed: Record,
}

impl Entity {
    /// An entity whose live values equal the confirmed row.
    pub(crate) fn from_committed(schema: Arc<EntitySchema>, committed: Record) -> Self {
        Self {
            schema,
            live: committed.clone(),
            committed,
        }
    }

    /// Concrete type name.
    pub fn type_name(&self) -> &str {
        self.schema.name()
    }

    /// Schema this entity was validated against.
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// Committed primary key value, if the schema declares one and it is set.
    pub fn primary_key(&self) -> Option<&Value> {
        let pk = self.schema.primary_key()?;
        self.committed
            .get(pk.name.as_str())
            .filter(|v| !v.is_null())
    }

    pub(crate) fn committed_record(&self) -> &Record {
        &self.committed
    }

    /// Live value of a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.live.get(field)
    }

    /// Committed value of a field.
    pub fn committed(&self, field: &str) -> Option<&Value> {
        self.committed.get(field)
    }

    /// Edit a live value. Nothing is validated or persisted until
    /// [`Engine::save`](crate::Engine::save).
    pub fn set(&mut self, field: &str, value: Value) -> Result<Value, UnknownField> {
        self.live.set(field, value)
    }

    /// Whether any live value differs from the committed snapshot.
    pub fn changed(&self) -> bool {
        !self.live.diff(&self.committed).is_empty()
    }

    /// Live fields that differ from the committed snapshot, with live values.
    pub fn dirty(&self) -> Map<String, Value> {
        self.live
            .diff(&self.committed)
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    /// Flat field→value projection of the live values, exactly the
    /// schema's declared field set.
    pub fn as_dict(&self) -> Map<String, Value> {
        self.live.to_map()
    }

    /// Discard live edits.
    pub fn revert(&mut self) {
        self.live = self.committed.clone();
    }

    /// committed := live. Called only once a backend has confirmed the
    /// live values as durable.
    pub(crate) fn sync(&mut self) {
        self.committed = self.live.clone();
    }

    /// Record backend-confirmed values.
    ///
    /// Every confirmed field updates the committed snapshot. Live values
    /// follow unless the field carries a live edit that was not part of
    /// `written`, so unrelated pending edits survive.
    pub(crate) fn confirm(&mut self, written: &Map<String, Value>, confirmed: &Map<String, Value>) {
        let pending = self.dirty();
        for (name, value) in written.iter().chain(confirmed) {
            let value = confirmed.get(name).unwrap_or(value);
            if written.contains_key(name) || !pending.contains_key(name) {
                let _ = self.live.set(name, value.clone());
            }
            let _ = self.committed.set(name, value.clone());
        }
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.live.serialize(serializer)
    }
}
