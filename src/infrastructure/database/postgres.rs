//! PostgreSQL record store and execution sink backed by a connection pool

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::domain::reasoning::{
    ExecutionRecord, ExecutionSink, RecordStore, SelectQuery, SessionConcurrency,
};
use crate::domain::DomainError;

static IDENTIFIER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex"));

/// PostgreSQL connection configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/labflow".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }
}

/// LabFlow tables (`files`, `conclusions`, `annotations`) and execution
/// history over a pooled connection
///
/// Every call checks out its own connection, so concurrent nodes are safe.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &PostgresConfig) -> Result<Self, DomainError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to connect to PostgreSQL: {}", e)))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the execution history table
    pub async fn ensure_tables(&self) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reasoning_executions (
                id UUID PRIMARY KEY,
                chain_id VARCHAR(64),
                status VARCHAR(50) NOT NULL,
                input_data JSONB,
                results JSONB,
                execution_order JSONB,
                error_log TEXT,
                started_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                execution_time_ms BIGINT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to create table: {}", e)))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reasoning_executions_chain_status \
             ON reasoning_executions (chain_id, status)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to create index: {}", e)))?;

        Ok(())
    }
}

fn identifier(name: &str) -> Result<String, DomainError> {
    if IDENTIFIER_REGEX.is_match(name) {
        Ok(format!("\"{}\"", name))
    } else {
        Err(DomainError::validation(format!("Invalid identifier: {}", name)))
    }
}

fn parse_file_id(file_id: &str) -> Result<i64, DomainError> {
    file_id
        .trim()
        .parse()
        .map_err(|_| DomainError::validation(format!("Invalid file id: {}", file_id)))
}

/// `SELECT row_to_json(t) FROM (SELECT ... ) t` with every filter value bound
fn build_select(query: &SelectQuery) -> Result<QueryBuilder<'static, Postgres>, DomainError> {
    let columns = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query
            .columns
            .iter()
            .map(|c| identifier(c))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ")
    };

    let mut builder = QueryBuilder::new("SELECT row_to_json(t) AS row FROM (SELECT ");
    builder.push(columns);
    builder.push(" FROM ");
    builder.push(identifier(&query.table)?);

    for (i, (column, value)) in query.filters.iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        builder.push(identifier(column)?);

        match value {
            Value::Null => {
                builder.push(" IS NULL");
            }
            Value::Bool(b) => {
                builder.push(" = ").push_bind(*b);
            }
            Value::Number(n) => match n.as_i64() {
                Some(i) => {
                    builder.push(" = ").push_bind(i);
                }
                None => {
                    builder.push(" = ").push_bind(n.as_f64().unwrap_or_default());
                }
            },
            Value::String(s) => {
                builder.push(" = ").push_bind(s.clone());
            }
            other => {
                builder.push(" = ").push_bind(other.clone());
            }
        }
    }

    if let Some((column, descending)) = &query.order_by {
        builder.push(" ORDER BY ");
        builder.push(identifier(column)?);
        builder.push(if *descending { " DESC" } else { " ASC" });
    }

    builder.push(" LIMIT ").push_bind(i64::from(query.limit));
    builder.push(") t");

    Ok(builder)
}

#[async_trait]
impl RecordStore for PgRecordStore {
    fn concurrency(&self) -> SessionConcurrency {
        SessionConcurrency::PerTask
    }

    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, DomainError> {
        let mut builder = build_select(query)?;

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to query {}: {}", query.table, e)))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Value, _>("row")
                    .map_err(|e| DomainError::storage(format!("Failed to decode row: {}", e)))
            })
            .collect()
    }

    async fn file_storage_key(&self, file_id: &str) -> Result<Option<String>, DomainError> {
        let row = sqlx::query("SELECT storage_key FROM files WHERE id = $1")
            .bind(parse_file_id(file_id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to get file: {}", e)))?;

        Ok(row.map(|row| row.get("storage_key")))
    }

    async fn insert_conclusion(&self, file_id: &str, content: &str) -> Result<Value, DomainError> {
        let row = sqlx::query(
            "INSERT INTO conclusions (file_id, content, created_at) VALUES ($1, $2, NOW()) RETURNING id",
        )
        .bind(parse_file_id(file_id)?)
        .bind(content.trim())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to store conclusion: {}", e)))?;

        let id: i32 = row.get("id");
        Ok(Value::from(id))
    }

    async fn insert_annotation(
        &self,
        file_id: &str,
        data: &Value,
        source: &str,
    ) -> Result<Value, DomainError> {
        let row = sqlx::query(
            "INSERT INTO annotations (file_id, data, source, created_at) VALUES ($1, $2, $3, NOW()) RETURNING id",
        )
        .bind(parse_file_id(file_id)?)
        .bind(data)
        .bind(source)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to store annotation: {}", e)))?;

        let id: i32 = row.get("id");
        Ok(Value::from(id))
    }
}

#[async_trait]
impl ExecutionSink for PgRecordStore {
    async fn append(&self, record: ExecutionRecord) -> Result<Uuid, DomainError> {
        let results = serde_json::to_value(&record.results)
            .map_err(|e| DomainError::storage(format!("Failed to serialize results: {}", e)))?;
        let error_log = record.error_log();
        let error_log = (!error_log.is_empty()).then(|| error_log.join("\n"));

        sqlx::query(
            r#"
            INSERT INTO reasoning_executions
                (id, chain_id, status, input_data, results, execution_order, error_log,
                 started_at, completed_at, execution_time_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.chain_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(record.status.as_str())
        .bind(&record.input)
        .bind(results)
        .bind(Value::from(record.execution_order.clone()))
        .bind(error_log)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.duration_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to store execution: {}", e)))?;

        Ok(record.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_binds_filter_values() {
        let query = SelectQuery::new("samples")
            .with_columns(vec!["id".into(), "ph".into()])
            .with_filter("batch", json!(7))
            .with_filter("site", json!("north"))
            .with_filter("archived", Value::Null)
            .with_order_by("id", true)
            .with_limit(10);

        let builder = build_select(&query).unwrap();

        assert_eq!(
            builder.sql(),
            "SELECT row_to_json(t) AS row FROM (SELECT \"id\", \"ph\" FROM \"samples\" \
             WHERE \"batch\" = $1 AND \"site\" = $2 AND \"archived\" IS NULL \
             ORDER BY \"id\" DESC LIMIT $3) t"
        );
    }

    #[test]
    fn test_select_all_columns() {
        let builder = build_select(&SelectQuery::new("files")).unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT row_to_json(t) AS row FROM (SELECT * FROM \"files\" LIMIT $1) t"
        );
    }

    #[test]
    fn test_rejects_injected_identifiers() {
        let query = SelectQuery::new("samples; DROP TABLE files");
        assert!(build_select(&query).is_err());

        let query = SelectQuery::new("samples").with_filter("ph = 1 OR 1", json!(1));
        assert!(build_select(&query).is_err());

        let query = SelectQuery::new("samples").with_columns(vec!["*".into()]);
        assert!(build_select(&query).is_err());
    }

    #[test]
    fn test_parse_file_id() {
        assert_eq!(parse_file_id(" 42 ").unwrap(), 42);
        assert!(parse_file_id("abc").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = PostgresConfig::new("postgres://db/labflow").with_max_connections(4);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.min_connections, 1);
    }
}
