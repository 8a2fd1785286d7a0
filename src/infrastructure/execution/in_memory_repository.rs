//! In-memory execution history

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::reasoning::{
    ChainId, ExecutionQuery, ExecutionRecord, ExecutionSink, ExecutionSummary,
};
use crate::domain::DomainError;

/// Execution sink that keeps records in insertion order
#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionStore {
    records: Arc<RwLock<Vec<ExecutionRecord>>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<ExecutionRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Matching records, most recent first
    pub async fn list(&self, query: &ExecutionQuery) -> Vec<ExecutionRecord> {
        let records = self.records.read().await;

        let matching = records
            .iter()
            .rev()
            .filter(|r| query.matches(r))
            .skip(query.offset)
            .cloned();

        match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    pub async fn count(&self, query: &ExecutionQuery) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| query.matches(r))
            .count()
    }

    /// Statistics over the runs of `chain_id` started in the last `days` days
    pub async fn summary(&self, chain_id: &ChainId, days: u32) -> ExecutionSummary {
        let since = Utc::now() - Duration::days(i64::from(days));
        let records = self.records.read().await;

        ExecutionSummary::from_records(
            chain_id.clone(),
            days,
            records
                .iter()
                .filter(|r| r.chain_id.as_ref() == Some(chain_id) && r.started_at >= since),
        )
    }
}

#[async_trait]
impl ExecutionSink for InMemoryExecutionStore {
    async fn append(&self, record: ExecutionRecord) -> Result<Uuid, DomainError> {
        let id = record.id;
        self.records.write().await.push(record);
        Ok(id)
    }
}
