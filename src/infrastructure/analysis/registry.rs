//! Analysis tools by id, runnable from calculate nodes

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::tool::{AnalysisTool, ToolContext, ToolOutcome, ToolSpec, ToolStatus};
use crate::domain::reasoning::{AnalysisRunner, BlobStore, RecordStore, SessionConcurrency};
use crate::domain::DomainError;

/// Resolves files through the record and blob stores and hands them to the
/// registered tool
///
/// Completed runs store the tool's conclusion and annotations against the
/// file unless storing is disabled.
pub struct AnalysisToolRegistry {
    tools: BTreeMap<String, Arc<dyn AnalysisTool>>,
    blob_store: Arc<dyn BlobStore>,
    record_store: Option<Arc<dyn RecordStore>>,
    store_outputs: bool,
}

impl std::fmt::Debug for AnalysisToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("store_outputs", &self.store_outputs)
            .finish()
    }
}

impl AnalysisToolRegistry {
    pub fn new(blob_store: Arc<dyn BlobStore>) -> Self {
        Self {
            tools: BTreeMap::new(),
            blob_store,
            record_store: None,
            store_outputs: true,
        }
    }

    pub fn with_record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.record_store = Some(store);
        self
    }

    pub fn with_store_outputs(mut self, store_outputs: bool) -> Self {
        self.store_outputs = store_outputs;
        self
    }

    pub fn register(&mut self, tool: Arc<dyn AnalysisTool>) -> Result<(), DomainError> {
        let id = tool.spec().id;

        if self.tools.contains_key(&id) {
            return Err(DomainError::validation(format!(
                "Analysis tool already registered: {}",
                id
            )));
        }

        self.tools.insert(id, tool);
        Ok(())
    }

    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    async fn storage_key(&self, file_id: &str) -> Result<String, DomainError> {
        let Some(records) = &self.record_store else {
            return Ok(file_id.to_string());
        };

        records
            .file_storage_key(file_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("File not found: {}", file_id)))
    }

    async fn store(&self, file_id: &str, tool_id: &str, outcome: &ToolOutcome) -> Value {
        let mut stored = json!({"conclusion_id": null, "annotation_ids": []});

        let Some(records) = self.record_store.as_ref().filter(|_| self.store_outputs) else {
            return stored;
        };

        if let Some(conclusion) = outcome.conclusion.as_deref().filter(|c| !c.trim().is_empty()) {
            match records.insert_conclusion(file_id, conclusion).await {
                Ok(id) => stored["conclusion_id"] = id,
                Err(e) => warn!(tool_id = %tool_id, error = %e, "Failed to store tool conclusion"),
            }
        }

        let mut annotation_ids = Vec::new();

        for annotation in &outcome.annotations {
            let mut payload = match annotation {
                Value::Object(map) => map.clone(),
                other => Map::from_iter([("value".to_string(), other.clone())]),
            };
            payload
                .entry("tool_id")
                .or_insert_with(|| Value::String(tool_id.to_string()));

            match records
                .insert_annotation(file_id, &Value::Object(payload), "auto")
                .await
            {
                Ok(id) => annotation_ids.push(id),
                Err(e) => warn!(tool_id = %tool_id, error = %e, "Failed to store tool annotation"),
            }
        }

        stored["annotation_ids"] = Value::Array(annotation_ids);
        stored
    }
}

#[async_trait]
impl AnalysisRunner for AnalysisToolRegistry {
    fn concurrency(&self) -> SessionConcurrency {
        let records = self.record_store.as_ref().map(|store| store.concurrency());

        if self.blob_store.concurrency() == SessionConcurrency::Shared
            || records == Some(SessionConcurrency::Shared)
        {
            SessionConcurrency::Shared
        } else {
            SessionConcurrency::PerTask
        }
    }

    async fn run_tool(
        &self,
        tool_id: &str,
        file_id: &str,
        parameters: &Map<String, Value>,
    ) -> Result<Value, DomainError> {
        let tool = self
            .tools
            .get(tool_id)
            .ok_or_else(|| DomainError::analysis(tool_id, "Unknown tool_id"))?;

        let storage_key = self.storage_key(file_id).await?;
        let data = self.blob_store.load(&storage_key).await?;

        let ctx = ToolContext {
            file_id: file_id.to_string(),
            storage_key,
            data,
            parameters: parameters.clone(),
        };

        info!(tool_id = %tool_id, file_id = %file_id, "Running analysis tool");
        let outcome = tool.run(&ctx).await?;

        let stored = if outcome.status == ToolStatus::Completed {
            self.store(file_id, tool_id, &outcome).await
        } else {
            json!({"conclusion_id": null, "annotation_ids": []})
        };

        Ok(json!({
            "status": outcome.status,
            "output": outcome.output,
            "metrics": outcome.metrics,
            "warnings": outcome.warnings,
            "error": outcome.error,
            "stored": stored,
        }))
    }
}
