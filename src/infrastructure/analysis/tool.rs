//! Analysis tool contract

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::DomainError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

/// Static description of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    /// File extensions the tool accepts
    pub input_types: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// The file and parameters of one tool run
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub file_id: String,
    pub storage_key: String,
    pub data: Bytes,
    pub parameters: Map<String, Value>,
}

impl ToolContext {
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Completed,
    Failed,
}

/// What a tool produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub status: ToolStatus,
    #[serde(default)]
    pub output: Map<String, Value>,
    /// Stored as annotations when the run completes
    #[serde(default)]
    pub annotations: Vec<Value>,
    /// Stored as a conclusion when the run completes
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub metrics: Map<String, Value>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn completed(output: Map<String, Value>) -> Self {
        Self {
            status: ToolStatus::Completed,
            output,
            annotations: Vec::new(),
            conclusion: None,
            metrics: Map::new(),
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Failed,
            error: Some(error.into()),
            ..Self::completed(Map::new())
        }
    }

    pub fn with_conclusion(mut self, conclusion: impl Into<String>) -> Self {
        self.conclusion = Some(conclusion.into());
        self
    }

    pub fn with_annotation(mut self, annotation: Value) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

#[async_trait]
pub trait AnalysisTool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn run(&self, ctx: &ToolContext) -> Result<ToolOutcome, DomainError>;
}
