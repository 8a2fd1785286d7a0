//! In-memory record store for tests and local runs

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use crate::domain::reasoning::value::{compare_values, values_equal};
use crate::domain::reasoning::{RecordStore, SelectQuery, SessionConcurrency};
use crate::domain::DomainError;

/// A stored conclusion or annotation
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub file_id: String,
    pub body: Value,
}

/// Tables of JSON rows plus the LabFlow file, conclusion and annotation tables
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<HashMap<String, Vec<Map<String, Value>>>>,
    files: RwLock<HashMap<String, String>>,
    conclusions: RwLock<Vec<StoredRecord>>,
    annotations: RwLock<Vec<StoredRecord>>,
    next_id: AtomicI64,
    concurrency: SessionConcurrency,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a single shared session, as a non-pooled store would
    pub fn shared_session(mut self) -> Self {
        self.concurrency = SessionConcurrency::Shared;
        self
    }

    pub async fn insert_row(&self, table: impl Into<String>, row: Value) -> Result<(), DomainError> {
        let Value::Object(row) = row else {
            return Err(DomainError::validation("Rows must be JSON objects"));
        };

        self.tables
            .write()
            .await
            .entry(table.into())
            .or_default()
            .push(row);

        Ok(())
    }

    pub async fn register_file(&self, file_id: impl Into<String>, storage_key: impl Into<String>) {
        self.files
            .write()
            .await
            .insert(file_id.into(), storage_key.into());
    }

    pub async fn conclusions(&self) -> Vec<StoredRecord> {
        self.conclusions.read().await.clone()
    }

    pub async fn annotations(&self) -> Vec<StoredRecord> {
        self.annotations.read().await.clone()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn concurrency(&self) -> SessionConcurrency {
        self.concurrency
    }

    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, DomainError> {
        let tables = self.tables.read().await;
        let rows = tables
            .get(&query.table)
            .ok_or_else(|| DomainError::not_found(format!("Table not found: {}", query.table)))?;

        let mut matching: Vec<&Map<String, Value>> = rows
            .iter()
            .filter(|row| {
                query.filters.iter().all(|(column, expected)| {
                    values_equal(row.get(column).unwrap_or(&Value::Null), expected)
                })
            })
            .collect();

        if let Some((column, descending)) = &query.order_by {
            matching.sort_by(|a, b| {
                let ordering = match (a.get(column), b.get(column)) {
                    (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                if *descending { ordering.reverse() } else { ordering }
            });
        }

        Ok(matching
            .into_iter()
            .take(query.limit as usize)
            .map(|row| {
                if query.columns.is_empty() {
                    Value::Object(row.clone())
                } else {
                    Value::Object(
                        query
                            .columns
                            .iter()
                            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                            .collect(),
                    )
                }
            })
            .collect())
    }

    async fn file_storage_key(&self, file_id: &str) -> Result<Option<String>, DomainError> {
        Ok(self.files.read().await.get(file_id).cloned())
    }

    async fn insert_conclusion(&self, file_id: &str, content: &str) -> Result<Value, DomainError> {
        if content.trim().is_empty() {
            return Err(DomainError::validation("Conclusion content cannot be empty"));
        }

        let id = self.next_id();
        self.conclusions.write().await.push(StoredRecord {
            id,
            file_id: file_id.to_string(),
            body: json!(content.trim()),
        });

        Ok(Value::from(id))
    }

    async fn insert_annotation(
        &self,
        file_id: &str,
        data: &Value,
        source: &str,
    ) -> Result<Value, DomainError> {
        let id = self.next_id();
        self.annotations.write().await.push(StoredRecord {
            id,
            file_id: file_id.to_string(),
            body: json!({"data": data, "source": source}),
        });

        Ok(Value::from(id))
    }
}
