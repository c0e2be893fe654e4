//! # Persistence Backend Contract
//!
//! The engine never talks to storage directly. It hands validated field
//! values to a [`PersistenceBackend`], which must:
//!
//! - insert and return the complete stored row in one operation, including
//!   store-assigned defaults and the primary key;
//! - apply an update to the named fields all-or-nothing, leaving prior
//!   state durable on any failure;
//! - hold one pooled connection for the duration of one insert or update.
//!
//! `fetch` and `delete` are optional capabilities. Their default
//! implementations report [`PersistenceError::Unsupported`].
//!
//! [`MemoryBackend`] is the in-process implementation used when no database
//! is configured and throughout the tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chorizo_core::{FieldType, PersistenceError};
use chorizo_schema::EntitySchema;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Durable storage for entity rows.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Insert a row and return it as stored.
    async fn insert(
        &self,
        schema: &EntitySchema,
        fields: &Map<String, Value>,
    ) -> Result<Map<String, Value>, PersistenceError>;

    /// Update `changed` on the row identified by `key`, returning the
    /// confirmed values.
    async fn update_fields(
        &self,
        schema: &EntitySchema,
        key: &Value,
        changed: &Map<String, Value>,
    ) -> Result<Map<String, Value>, PersistenceError>;

    /// Load one row by primary key.
    async fn fetch(
        &self,
        _schema: &EntitySchema,
        _key: &Value,
    ) -> Result<Map<String, Value>, PersistenceError> {
        Err(PersistenceError::Unsupported { operation: "fetch" })
    }

    /// Delete one row by primary key.
    async fn delete(&self, _schema: &EntitySchema, _key: &Value) -> Result<(), PersistenceError> {
        Err(PersistenceError::Unsupported { operation: "delete" })
    }
}

// ─── In-Memory Backend ───────────────────────────────────────────────

/// One write the memory backend accepted or refused, in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    /// `"insert"` or `"update"`.
    pub operation: &'static str,
    /// Target table.
    pub table: String,
    /// Fields handed to the backend.
    pub fields: Map<String, Value>,
}

#[derive(Default)]
struct Table {
    rows: BTreeMap<String, Map<String, Value>>,
    next_id: i64,
}

/// Row store held in process memory.
///
/// Rows are keyed by the JSON rendering of their primary key. A missing
/// integer key is assigned sequentially per table; a missing string key
/// gets a UUID v4.
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, Table>>,
    connections: Arc<Semaphore>,
    latency: Mutex<Option<Duration>>,
    fail_next: Mutex<Option<PersistenceError>>,
    calls: Mutex<Vec<WriteCall>>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("tables", &self.tables.read().len())
            .field("available_connections", &self.connections.available_permits())
            .finish()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Default connection bound, matching the PostgreSQL pool default.
    pub const DEFAULT_MAX_CONNECTIONS: usize = 20;

    /// An empty store.
    pub fn new() -> Self {
        Self::with_max_connections(Self::DEFAULT_MAX_CONNECTIONS)
    }

    /// An empty store allowing at most `max` concurrent operations.
    pub fn with_max_connections(max: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            connections: Arc::new(Semaphore::new(max.max(1))),
            latency: Mutex::new(None),
            fail_next: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Hold each operation's connection for `latency` before completing.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Make the next insert or update fail with `error` without touching
    /// stored rows.
    pub fn fail_next_write(&self, error: PersistenceError) {
        *self.fail_next.lock() = Some(error);
    }

    /// Every write call received so far.
    pub fn calls(&self) -> Vec<WriteCall> {
        self.calls.lock().clone()
    }

    /// Connections not currently held by an operation.
    pub fn available_connections(&self) -> usize {
        self.connections.available_permits()
    }

    /// Number of rows stored in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }

    async fn checkout(&self) -> Result<OwnedSemaphorePermit, PersistenceError> {
        let permit = self
            .connections
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PersistenceError::Unavailable("connection pool closed".into()))?;
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(permit)
    }

    fn record_call(&self, operation: &'static str, schema: &EntitySchema, fields: &Map<String, Value>) {
        self.calls.lock().push(WriteCall {
            operation,
            table: schema.table().to_string(),
            fields: fields.clone(),
        });
    }

    fn take_failure(&self) -> Result<(), PersistenceError> {
        match self.fail_next.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn row_key(key: &Value) -> String {
    key.to_string()
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn insert(
        &self,
        schema: &EntitySchema,
        fields: &Map<String, Value>,
    ) -> Result<Map<String, Value>, PersistenceError> {
        let _conn = self.checkout().await?;
        self.record_call("insert", schema, fields);
        self.take_failure()?;

        let mut tables = self.tables.write();
        let table = tables.entry(schema.table().to_string()).or_default();

        let mut row: Map<String, Value> = schema
            .fields()
            .iter()
            .map(|f| {
                let value = fields.get(f.name.as_str()).cloned().unwrap_or(Value::Null);
                (f.name.to_string(), value)
            })
            .collect();

        let key = match schema.primary_key() {
            Some(pk) => {
                let name = pk.name.as_str();
                if row.get(name).map_or(true, Value::is_null) {
                    let assigned = match pk.field_type {
                        FieldType::Integer => {
                            table.next_id += 1;
                            Value::from(table.next_id)
                        }
                        FieldType::String => Value::String(uuid::Uuid::new_v4().to_string()),
                        other => {
                            return Err(PersistenceError::Rejected(format!(
                                "cannot assign a {other} primary key for {name}"
                            )))
                        }
                    };
                    row.insert(name.to_string(), assigned);
                } else if let Some(Value::Number(n)) = row.get(name) {
                    if let Some(n) = n.as_i64() {
                        table.next_id = table.next_id.max(n);
                    }
                }
                row.get(name).map(row_key).unwrap_or_default()
            }
            None => {
                table.next_id += 1;
                format!("#{}", table.next_id)
            }
        };

        if table.rows.contains_key(&key) {
            return Err(PersistenceError::Rejected(format!(
                "duplicate key {key} in {}",
                schema.table()
            )));
        }
        table.rows.insert(key, row.clone());
        Ok(row)
    }

    async fn update_fields(
        &self,
        schema: &EntitySchema,
        key: &Value,
        changed: &Map<String, Value>,
    ) -> Result<Map<String, Value>, PersistenceError> {
        let _conn = self.checkout().await?;
        self.record_call("update", schema, changed);
        self.take_failure()?;

        let mut tables = self.tables.write();
        let row = tables
            .get_mut(schema.table())
            .and_then(|t| t.rows.get_mut(&row_key(key)))
            .ok_or_else(|| PersistenceError::NotFound {
                table: schema.table().to_string(),
                key: row_key(key),
            })?;

        if let Some(unknown) = changed.keys().find(|k| schema.field(k).is_none()) {
            return Err(PersistenceError::Rejected(format!(
                "column {unknown} does not exist in {}",
                schema.table()
            )));
        }
        for (name, value) in changed {
            row.insert(name.clone(), value.clone());
        }
        Ok(row.clone())
    }

    async fn fetch(
        &self,
        schema: &EntitySchema,
        key: &Value,
    ) -> Result<Map<String, Value>, PersistenceError> {
        let _conn = self.checkout().await?;
        self.tables
            .read()
            .get(schema.table())
            .and_then(|t| t.rows.get(&row_key(key)))
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound {
                table: schema.table().to_string(),
                key: row_key(key),
            })
    }

    async fn delete(&self, schema: &EntitySchema, key: &Value) -> Result<(), PersistenceError> {
        let _conn = self.checkout().await?;
        self.tables
            .write()
            .get_mut(schema.table())
            .and_then(|t| t.rows.remove(&row_key(key)))
            .map(|_| ())
            .ok_or_else(|| PersistenceError::NotFound {
                table: schema.table().to_string(),
                key: row_key(key),
            })
    }
}
