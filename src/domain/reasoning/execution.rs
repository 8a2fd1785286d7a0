//! Persisted execution records and history summaries

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::chain::ChainId;
use super::result::{ChainError, ChainRunResult, ChainStatus, NodeResult};

/// One run of a chain, handed to the execution sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<ChainId>,
    pub status: ChainStatus,
    pub input: Value,
    pub results: BTreeMap<String, NodeResult>,
    pub errors: Vec<ChainError>,
    pub execution_order: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionRecord {
    pub fn from_run(
        chain_id: Option<ChainId>,
        input: Value,
        run: &ChainRunResult,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_id,
            status: run.status,
            input,
            results: run.results.clone(),
            errors: run.errors.clone(),
            execution_order: run.execution_order.clone(),
            started_at,
            completed_at: Utc::now(),
            duration_ms: run.duration_ms,
        }
    }

    /// Error lines in the `node: message` form used by the error log column
    pub fn error_log(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| match &e.node_id {
                Some(node) => format!("{}: {}", node, e.error),
                None => e.error.clone(),
            })
            .collect()
    }
}

/// Filter for listing execution records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionQuery {
    pub chain_id: Option<ChainId>,
    pub status: Option<ChainStatus>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ExecutionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_chain(mut self, chain_id: ChainId) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_status(mut self, status: ChainStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn paginate(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &ExecutionRecord) -> bool {
        if let Some(chain_id) = &self.chain_id {
            if record.chain_id.as_ref() != Some(chain_id) {
                return false;
            }
        }

        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }

        true
    }
}

/// Success statistics for one chain over a look-back window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub chain_id: ChainId,
    pub period_days: u32,
    pub total_executions: usize,
    pub completed: usize,
    pub failed: usize,
    /// Percentage of completed runs, 0 when there are none
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

impl ExecutionSummary {
    pub fn from_records<'a, I>(chain_id: ChainId, period_days: u32, records: I) -> Self
    where
        I: IntoIterator<Item = &'a ExecutionRecord>,
    {
        let mut total = 0usize;
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut duration_sum = 0u64;

        for record in records {
            total += 1;
            duration_sum += record.duration_ms;

            match record.status {
                ChainStatus::Completed => completed += 1,
                ChainStatus::Failed => failed += 1,
            }
        }

        let (success_rate, avg_duration_ms) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                completed as f64 / total as f64 * 100.0,
                duration_sum as f64 / total as f64,
            )
        };

        Self {
            chain_id,
            period_days,
            total_executions: total,
            completed,
            failed,
            success_rate,
            avg_duration_ms,
        }
    }
}
