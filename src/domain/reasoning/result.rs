//! Node and chain execution results

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Outcome of executing one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: String,
    pub status: NodeStatus,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Number of handler invocations, zero for cache hits and skipped nodes
    pub attempts: u32,
    #[serde(default)]
    pub cached: bool,
}

impl NodeResult {
    pub fn completed(node_id: impl Into<String>, output: Value, started_at: DateTime<Utc>) -> Self {
        Self::finish(node_id, NodeStatus::Completed, output, None, started_at)
    }

    pub fn failed(
        node_id: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::finish(
            node_id,
            NodeStatus::Failed,
            Value::Null,
            Some(error.into()),
            started_at,
        )
    }

    pub fn skipped(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::finish(
            node_id,
            NodeStatus::Skipped,
            Value::Null,
            Some(reason.into()),
            Utc::now(),
        )
    }

    fn finish(
        node_id: impl Into<String>,
        status: NodeStatus,
        output: Value,
        error: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        Self {
            node_id: node_id.into(),
            status,
            output,
            error,
            started_at,
            completed_at,
            duration_ms,
            attempts: 0,
            cached: false,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == NodeStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == NodeStatus::Failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Completed,
    Failed,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// An error reported at chain level, optionally tied to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub error: String,
}

impl ChainError {
    pub fn node(node_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            error: error.into(),
        }
    }

    pub fn chain(error: impl Into<String>) -> Self {
        Self {
            node_id: None,
            error: error.into(),
        }
    }
}

/// The envelope returned for every chain run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRunResult {
    pub status: ChainStatus,
    pub results: BTreeMap<String, NodeResult>,
    pub errors: Vec<ChainError>,
    pub execution_order: Vec<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
}

impl ChainRunResult {
    /// A run rejected before any node executed
    pub fn rejected(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: ChainStatus::Failed,
            results: BTreeMap::new(),
            errors: vec![ChainError::chain(error)],
            execution_order: Vec::new(),
            duration_ms,
            timed_out: false,
            execution_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ChainStatus::Completed
    }

    pub fn result(&self, node_id: &str) -> Option<&NodeResult> {
        self.results.get(node_id)
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.results.get(node_id).map(|r| &r.output)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.results.values().filter(|r| r.status == status).count()
    }
}
