//! Entity row persistence.
//!
//! Every statement returns the affected row as `to_jsonb(r.*)`, so one
//! query shape serves every schema and no per-table row type is needed.
//!
//! - insert: one `INSERT … RETURNING` statement. Null fields are left out
//!   so column defaults apply.
//! - update: `UPDATE … RETURNING` inside a transaction. A missing row or any
//!   error rolls back; nothing is partially applied.
//!
//! Identifiers come from validated schema names and are quoted regardless.

use async_trait::async_trait;
use chorizo_core::{FieldType, PersistenceError};
use chorizo_entity::PersistenceBackend;
use chorizo_schema::{EntitySchema, FieldSpec};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgArguments;
use sqlx::{Arguments, PgPool, Postgres};

/// [`PersistenceBackend`] over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceBackend for PgBackend {
    async fn insert(
        &self,
        schema: &EntitySchema,
        fields: &Map<String, Value>,
    ) -> Result<Map<String, Value>, PersistenceError> {
        let mut columns = Vec::new();
        let mut args = PgArguments::default();
        for spec in schema.fields() {
            match fields.get(spec.name.as_str()) {
                Some(value) if !value.is_null() => {
                    SqlValue::from_json(spec, value)?.bind(&mut args)?;
                    columns.push(spec.name.as_str());
                }
                _ => {}
            }
        }

        let sql = insert_sql(schema.table(), &columns);
        let row: Value = sqlx::query_scalar_with::<Postgres, Value, _>(&sql, args)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        from_row(schema, row)
    }

    async fn update_fields(
        &self,
        schema: &EntitySchema,
        key: &Value,
        changed: &Map<String, Value>,
    ) -> Result<Map<String, Value>, PersistenceError> {
        let pk = primary_key(schema)?;
        let mut columns = Vec::with_capacity(changed.len());
        let mut args = PgArguments::default();
        for (name, value) in changed {
            let spec = schema.field(name).ok_or_else(|| {
                PersistenceError::Rejected(format!("column {name} does not exist in {}", schema.table()))
            })?;
            SqlValue::from_json(spec, value)?.bind(&mut args)?;
            columns.push(spec.name.as_str());
        }
        SqlValue::from_json(pk, key)?.bind(&mut args)?;

        let sql = update_sql(schema.table(), &columns, pk.name.as_str());
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let row: Option<Value> = sqlx::query_scalar_with::<Postgres, Value, _>(&sql, args)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let Some(row) = row else {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(not_found(schema, key));
        };
        tx.commit().await.map_err(map_sqlx_error)?;
        from_row(schema, row)
    }

    async fn fetch(
        &self,
        schema: &EntitySchema,
        key: &Value,
    ) -> Result<Map<String, Value>, PersistenceError> {
        let pk = primary_key(schema)?;
        let mut args = PgArguments::default();
        SqlValue::from_json(pk, key)?.bind(&mut args)?;

        let sql = select_sql(schema.table(), pk.name.as_str());
        let row: Option<Value> = sqlx::query_scalar_with::<Postgres, Value, _>(&sql, args)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        from_row(schema, row.ok_or_else(|| not_found(schema, key))?)
    }

    async fn delete(&self, schema: &EntitySchema, key: &Value) -> Result<(), PersistenceError> {
        let pk = primary_key(schema)?;
        let mut args = PgArguments::default();
        SqlValue::from_json(pk, key)?.bind(&mut args)?;

        let sql = delete_sql(schema.table(), pk.name.as_str());
        let result = sqlx::query_with::<Postgres, _>(&sql, args)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(not_found(schema, key));
        }
        Ok(())
    }
}

fn primary_key(schema: &EntitySchema) -> Result<&FieldSpec, PersistenceError> {
    schema
        .primary_key()
        .ok_or_else(|| PersistenceError::Rejected(format!("{} has no primary key", schema.name())))
}

fn not_found(schema: &EntitySchema, key: &Value) -> PersistenceError {
    PersistenceError::NotFound {
        table: schema.table().to_string(),
        key: key.to_string(),
    }
}

// ─── SQL ─────────────────────────────────────────────────────────────

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn params(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|i| format!("${i}")).collect()
}

fn insert_sql(table: &str, columns: &[&str]) -> String {
    let table = quote_ident(table);
    if columns.is_empty() {
        return format!("INSERT INTO {table} AS r DEFAULT VALUES RETURNING to_jsonb(r.*)");
    }
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "INSERT INTO {table} AS r ({}) VALUES ({}) RETURNING to_jsonb(r.*)",
        cols.join(", "),
        params(1..=columns.len()).join(", ")
    )
}

fn update_sql(table: &str, columns: &[&str], key: &str) -> String {
    let assignments: Vec<String> = columns
        .iter()
        .zip(params(1..=columns.len()))
        .map(|(c, p)| format!("{} = {p}", quote_ident(c)))
        .collect();
    format!(
        "UPDATE {} AS r SET {} WHERE r.{} = ${} RETURNING to_jsonb(r.*)",
        quote_ident(table),
        assignments.join(", "),
        quote_ident(key),
        columns.len() + 1
    )
}

fn select_sql(table: &str, key: &str) -> String {
    format!(
        "SELECT to_jsonb(r.*) FROM {} AS r WHERE r.{} = $1",
        quote_ident(table),
        quote_ident(key)
    )
}

fn delete_sql(table: &str, key: &str) -> String {
    format!("DELETE FROM {} WHERE {} = $1", quote_ident(table), quote_ident(key))
}

// ─── Values ──────────────────────────────────────────────────────────

/// A field value in its PostgreSQL bind type.
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Text(Option<String>),
    Integer(Option<i64>),
    Float(Option<f64>),
    Boolean(Option<bool>),
    Json(Option<Value>),
    Timestamp(Option<DateTime<Utc>>),
    Date(Option<NaiveDate>),
    Bytes(Option<Vec<u8>>),
}

impl SqlValue {
    /// Convert a normalised field value.
    fn from_json(spec: &FieldSpec, value: &Value) -> Result<Self, PersistenceError> {
        let field_type = spec.field_type;
        let invalid = || {
            PersistenceError::Rejected(format!("value for {} is not a valid {field_type}", spec.name))
        };
        if value.is_null() {
            return Ok(Self::null(field_type));
        }
        Ok(match field_type {
            FieldType::String => Self::Text(Some(value.as_str().ok_or_else(invalid)?.to_string())),
            FieldType::Integer => Self::Integer(Some(value.as_i64().ok_or_else(invalid)?)),
            FieldType::Float => Self::Float(Some(value.as_f64().ok_or_else(invalid)?)),
            FieldType::Boolean => Self::Boolean(Some(value.as_bool().ok_or_else(invalid)?)),
            FieldType::Map => Self::Json(Some(value.clone())),
            FieldType::Datetime => Self::Timestamp(Some(
                value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(invalid)?,
            )),
            FieldType::Date => Self::Date(Some(
                value
                    .as_str()
                    .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                    .ok_or_else(invalid)?,
            )),
            FieldType::Binary => Self::Bytes(Some(
                value.as_str().and_then(|s| hex::decode(s).ok()).ok_or_else(invalid)?,
            )),
        })
    }

    fn null(field_type: FieldType) -> Self {
        match field_type {
            FieldType::String => Self::Text(None),
            FieldType::Integer => Self::Integer(None),
            FieldType::Float => Self::Float(None),
            FieldType::Boolean => Self::Boolean(None),
            FieldType::Map => Self::Json(None),
            FieldType::Datetime => Self::Timestamp(None),
            FieldType::Date => Self::Date(None),
            FieldType::Binary => Self::Bytes(None),
        }
    }

    fn bind(self, args: &mut PgArguments) -> Result<(), PersistenceError> {
        let bound = match self {
            Self::Text(v) => args.add(v),
            Self::Integer(v) => args.add(v),
            Self::Float(v) => args.add(v),
            Self::Boolean(v) => args.add(v),
            Self::Json(v) => args.add(v.map(sqlx::types::Json)),
            Self::Timestamp(v) => args.add(v),
            Self::Date(v) => args.add(v),
            Self::Bytes(v) => args.add(v),
        };
        bound.map_err(|e| PersistenceError::Rejected(format!("cannot encode value: {e}")))
    }
}

/// Turn a `to_jsonb` row into field values.
///
/// `bytea` renders as `"\x…"` in JSON; it is reduced to plain hex to match
/// the field's normalised form.
fn from_row(schema: &EntitySchema, row: Value) -> Result<Map<String, Value>, PersistenceError> {
    let Value::Object(mut row) = row else {
        return Err(PersistenceError::Backend(format!(
            "{} returned a non-object row",
            schema.table()
        )));
    };
    for spec in schema.fields() {
        if spec.field_type != FieldType::Binary {
            continue;
        }
        if let Some(Value::String(s)) = row.get_mut(spec.name.as_str()) {
            if let Some(hex) = s.strip_prefix("\\x") {
                *s = hex.to_string();
            }
        }
    }
    Ok(row)
}

/// Map driver errors at the backend boundary.
fn map_sqlx_error(err: sqlx::Error) -> PersistenceError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            PersistenceError::Unavailable(err.to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => PersistenceError::Unavailable(err.to_string()),
        sqlx::Error::Database(db) => {
            let rejected = db
                .code()
                .is_some_and(|code| code.starts_with("22") || code.starts_with("23") || code == "42703");
            if rejected {
                PersistenceError::Rejected(db.message().to_string())
            } else {
                tracing::error!(error = %db, "database error");
                PersistenceError::Backend(db.message().to_string())
            }
        }
        other => PersistenceError::Backend(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> EntitySchema {
        EntitySchema::from_definition(
            &json!({
                "name": "document",
                "table": "documents",
                "fields": {
                    "id": { "type": "integer", "primary_key": true },
                    "title": { "type": "string" },
                    "body": { "type": "binary" },
                    "published": { "type": "date" },
                    "meta": { "type": "map" }
                }
            }),
            None,
        )
        .unwrap()
    }

    fn spec(name: &str) -> FieldSpec {
        schema().field(name).unwrap().clone()
    }

    #[test]
    fn test_insert_returns_row_in_one_statement() {
        assert_eq!(
            insert_sql("documents", &["title", "body"]),
            r#"INSERT INTO "documents" AS r ("title", "body") VALUES ($1, $2) RETURNING to_jsonb(r.*)"#
        );
        assert_eq!(
            insert_sql("documents", &[]),
            r#"INSERT INTO "documents" AS r DEFAULT VALUES RETURNING to_jsonb(r.*)"#
        );
    }

    #[test]
    fn test_update_binds_key_after_changed_columns() {
        assert_eq!(
            update_sql("documents", &["title"], "id"),
            r#"UPDATE "documents" AS r SET "title" = $1 WHERE r."id" = $2 RETURNING to_jsonb(r.*)"#
        );
    }

    #[test]
    fn test_select_and_delete_by_key() {
        assert_eq!(
            select_sql("documents", "id"),
            r#"SELECT to_jsonb(r.*) FROM "documents" AS r WHERE r."id" = $1"#
        );
        assert_eq!(delete_sql("documents", "id"), r#"DELETE FROM "documents" WHERE "id" = $1"#);
    }

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }

    #[test]
    fn test_values_convert_to_bind_types() {
        assert_eq!(
            SqlValue::from_json(&spec("body"), &json!("0aff")).unwrap(),
            SqlValue::Bytes(Some(vec![0x0a, 0xff]))
        );
        assert_eq!(
            SqlValue::from_json(&spec("published"), &json!("2026-03-01")).unwrap(),
            SqlValue::Date(NaiveDate::from_ymd_opt(2026, 3, 1))
        );
        assert_eq!(
            SqlValue::from_json(&spec("title"), &Value::Null).unwrap(),
            SqlValue::Text(None)
        );
        assert_eq!(
            SqlValue::from_json(&spec("meta"), &json!({"a": 1})).unwrap(),
            SqlValue::Json(Some(json!({"a": 1})))
        );
    }

    #[test]
    fn test_mistyped_value_is_rejected() {
        assert!(matches!(
            SqlValue::from_json(&spec("id"), &json!("seven")),
            Err(PersistenceError::Rejected(_))
        ));
    }

    #[test]
    fn test_bytea_rows_become_plain_hex() {
        let row = from_row(&schema(), json!({ "id": 1, "body": "\\x0aff", "title": "\\xnot-binary" })).unwrap();
        assert_eq!(row["body"], "0aff");
        assert_eq!(row["title"], "\\xnot-binary");
        assert!(from_row(&schema(), json!([1])).is_err());
    }

    #[test]
    fn test_pool_errors_are_unavailable() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            PersistenceError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            PersistenceError::Backend(_)
        ));
    }
}
