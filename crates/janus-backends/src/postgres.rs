//! PostgreSQL implementation of the relational store capability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map as JsonMap, Value as JsonValue};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Pool, Postgres, Row, TypeInfo};
use tracing::{debug, instrument};

use janus_core::{Error, RelationalStore, Result, SqlRow};

/// Relational engine adapter over a PostgreSQL connection pool.
pub struct PgRelationalStore {
    pool: Pool<Postgres>,
}

impl PgRelationalStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

/// Reject identifiers that cannot be safely interpolated into SQL.
///
/// Table/column names arrive from mapping rules, not end users, but the
/// check keeps a misconfigured rule from becoming an injection vector.
pub fn validate_identifier(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().unwrap_or('0').is_ascii_digit();
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Invalid identifier: {}", name)))
    }
}

/// Bind JSON-typed parameters onto a query in positional order.
fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [JsonValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            JsonValue::Null => query.bind(None::<String>),
            JsonValue::Bool(b) => query.bind(*b),
            JsonValue::Number(n) if n.is_i64() => query.bind(n.as_i64().unwrap_or_default()),
            JsonValue::Number(n) => query.bind(n.as_f64().unwrap_or_default()),
            JsonValue::String(s) => query.bind(s.as_str()),
            other => query.bind(other.clone()),
        };
    }
    query
}

/// Decode a single column into a JSON value based on its Postgres type.
fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
    match type_name {
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::from(v as i64))
            .unwrap_or(JsonValue::Null),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::from(v as i64))
            .unwrap_or(JsonValue::Null),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .ok()
            .flatten()
            .and_then(|v| serde_json::Number::from_f64(v as f64))
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::String(v.to_string()))
            .unwrap_or(JsonValue::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::String(v.to_rfc3339()))
            .unwrap_or(JsonValue::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<JsonValue>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null),
        _ => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
    }
}

/// Decode a full Postgres row into the opaque column map.
pub fn decode_row(row: &PgRow) -> SqlRow {
    let mut columns = JsonMap::new();
    for col in row.columns() {
        let value = decode_column(row, col.ordinal(), col.type_info().name());
        columns.insert(col.name().to_string(), value);
    }
    SqlRow::new(columns)
}

#[async_trait]
impl RelationalStore for PgRelationalStore {
    #[instrument(skip(self, params), fields(subsystem = "backends", component = "postgres", op = "execute"))]
    async fn execute(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<SqlRow>> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::RelationalBackend(e.to_string()))?;

        debug!(result_count = rows.len(), "Relational query complete");
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn execute_command(&self, sql: &str, params: &[JsonValue]) -> Result<u64> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::RelationalBackend(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn changed_rows(
        &self,
        table: &str,
        pk_column: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SqlRow>> {
        validate_identifier(table)?;
        validate_identifier(pk_column)?;

        let sql = format!(
            "SELECT * FROM {table} WHERE updated_at > $1 ORDER BY updated_at ASC, {pk_column} ASC LIMIT $2",
        );
        let rows = sqlx::query(&sql)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::RelationalBackend(e.to_string()))?;

        Ok(rows.iter().map(decode_row).collect())
    }

    async fn fetch_row(
        &self,
        table: &str,
        pk_column: &str,
        pk: &JsonValue,
    ) -> Result<Option<SqlRow>> {
        validate_identifier(table)?;
        validate_identifier(pk_column)?;

        let sql = format!("SELECT * FROM {table} WHERE {pk_column}::text = $1 LIMIT 1");
        let pk_text = match pk {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        let row = sqlx::query(&sql)
            .bind(pk_text)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::RelationalBackend(e.to_string()))?;

        Ok(row.as_ref().map(decode_row))
    }

    async fn write_back(
        &self,
        table: &str,
        pk_column: &str,
        pk: &JsonValue,
        assignments: &[(String, JsonValue)],
    ) -> Result<u64> {
        if assignments.is_empty() {
            return Ok(0);
        }
        validate_identifier(table)?;
        validate_identifier(pk_column)?;
        for (column, _) in assignments {
            validate_identifier(column)?;
        }

        let set_clauses: Vec<String> = assignments
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} = ${}", column, i + 1))
            .collect();
        let sql = format!(
            "UPDATE {table} SET {}, updated_at = NOW() WHERE {pk_column}::text = ${}",
            set_clauses.join(", "),
            assignments.len() + 1,
        );

        let mut params: Vec<JsonValue> = assignments.iter().map(|(_, v)| v.clone()).collect();
        params.push(JsonValue::String(match pk {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        }));

        let result = bind_params(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::RelationalBackend(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn now(&self) -> Result<DateTime<Utc>> {
        let now: DateTime<Utc> = sqlx::query_scalar("SELECT NOW()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::RelationalBackend(e.to_string()))?;
        Ok(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_accepts_plain_names() {
        assert!(validate_identifier("customers").is_ok());
        assert!(validate_identifier("order_items_2").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_injection() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("users; DROP TABLE users").is_err());
        assert!(validate_identifier("users--").is_err());
        assert!(validate_identifier("1users").is_err());
        assert!(validate_identifier("a".repeat(64).as_str()).is_err());
    }
}
