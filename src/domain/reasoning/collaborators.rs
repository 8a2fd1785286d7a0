//! Traits for the external systems reasoning nodes talk to

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::execution::ExecutionRecord;
use crate::domain::error::DomainError;

#[cfg(test)]
use mockall::automock;

/// Whether a collaborator can be used from several tasks at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionConcurrency {
    /// Each task gets its own connection (pooled stores)
    #[default]
    PerTask,
    /// A single session that must not be shared across concurrent tasks
    Shared,
}

/// Raw file storage keyed by storage key
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn concurrency(&self) -> SessionConcurrency {
        SessionConcurrency::PerTask
    }

    async fn load(&self, key: &str) -> Result<Bytes, DomainError>;

    /// Returns whether anything was deleted
    async fn delete(&self, key: &str) -> Result<bool, DomainError>;
}

/// Parameterized read against a single table
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    /// Empty selects every column
    pub columns: Vec<String>,
    /// Equality filters, ANDed together
    pub filters: Vec<(String, Value)>,
    /// Column and whether the order is descending
    pub order_by: Option<(String, bool)>,
    pub limit: u32,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: None,
            limit: 100,
        }
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_filter(mut self, column: impl Into<String>, value: Value) -> Self {
        self.filters.push((column.into(), value));
        self
    }

    pub fn with_order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some((column.into(), descending));
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// Relational store backing database sources and store outputs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn concurrency(&self) -> SessionConcurrency;

    /// Rows as JSON objects keyed by column name
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, DomainError>;

    /// Storage key of a LabFlow file, `None` when the file does not exist
    async fn file_storage_key(&self, file_id: &str) -> Result<Option<String>, DomainError>;

    /// Returns the id of the new conclusion
    async fn insert_conclusion(&self, file_id: &str, content: &str) -> Result<Value, DomainError>;

    /// Returns the id of the new annotation
    async fn insert_annotation(
        &self,
        file_id: &str,
        data: &Value,
        source: &str,
    ) -> Result<Value, DomainError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            url: url.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, DomainError> {
        serde_json::from_str(&self.body)
            .map_err(|e| DomainError::http(format!("Invalid JSON response: {}", e)))
    }
}

/// Outbound HTTP used by api sources and send outputs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, DomainError>;
}

/// Destination for execution records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// Returns the id under which the record was stored
    async fn append(&self, record: ExecutionRecord) -> Result<Uuid, DomainError>;
}

/// Runs a named analysis tool against a file
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AnalysisRunner: Send + Sync {
    fn concurrency(&self) -> SessionConcurrency {
        SessionConcurrency::PerTask
    }

    async fn run_tool(
        &self,
        tool_id: &str,
        file_id: &str,
        parameters: &Map<String, Value>,
    ) -> Result<Value, DomainError>;
}

/// The collaborators available to node handlers during a run
#[derive(Clone, Default)]
pub struct Collaborators {
    pub blob_store: Option<Arc<dyn BlobStore>>,
    pub record_store: Option<Arc<dyn RecordStore>>,
    pub http_client: Option<Arc<dyn HttpClient>>,
    pub analysis: Option<Arc<dyn AnalysisRunner>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    pub fn with_record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.record_store = Some(store);
        self
    }

    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_analysis(mut self, runner: Arc<dyn AnalysisRunner>) -> Self {
        self.analysis = Some(runner);
        self
    }

    /// `Shared` when the record store, blob store or analysis runner holds a
    /// single non-shareable session
    ///
    /// HTTP clients are always pooled and never force sequential execution.
    pub fn session_concurrency(&self) -> SessionConcurrency {
        let declared = [
            self.record_store.as_ref().map(|store| store.concurrency()),
            self.blob_store.as_ref().map(|store| store.concurrency()),
            self.analysis.as_ref().map(|runner| runner.concurrency()),
        ];

        if declared.contains(&Some(SessionConcurrency::Shared)) {
            SessionConcurrency::Shared
        } else {
            SessionConcurrency::PerTask
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("blob_store", &self.blob_store.is_some())
            .field("record_store", &self.record_store.is_some())
            .field("http_client", &self.http_client.is_some())
            .field("analysis", &self.analysis.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_concurrency_defaults_to_per_task() {
        assert_eq!(
            Collaborators::new().session_concurrency(),
            SessionConcurrency::PerTask
        );
    }

    #[test]
    fn test_shared_record_store_is_reported() {
        let mut store = MockRecordStore::new();
        store
            .expect_concurrency()
            .return_const(SessionConcurrency::Shared);

        let collaborators = Collaborators::new().with_record_store(Arc::new(store));
        assert_eq!(
            collaborators.session_concurrency(),
            SessionConcurrency::Shared
        );
    }

    #[test]
    fn test_shared_blob_store_or_analysis_is_reported() {
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_concurrency()
            .return_const(SessionConcurrency::Shared);

        let mut records = MockRecordStore::new();
        records
            .expect_concurrency()
            .return_const(SessionConcurrency::PerTask);

        let collaborators = Collaborators::new()
            .with_record_store(Arc::new(records))
            .with_blob_store(Arc::new(blobs));
        assert_eq!(
            collaborators.session_concurrency(),
            SessionConcurrency::Shared
        );

        let mut runner = MockAnalysisRunner::new();
        runner
            .expect_concurrency()
            .return_const(SessionConcurrency::Shared);
        assert_eq!(
            Collaborators::new()
                .with_analysis(Arc::new(runner))
                .session_concurrency(),
            SessionConcurrency::Shared
        );

        let mut pooled = MockBlobStore::new();
        pooled
            .expect_concurrency()
            .return_const(SessionConcurrency::PerTask);
        assert_eq!(
            Collaborators::new()
                .with_blob_store(Arc::new(pooled))
                .session_concurrency(),
            SessionConcurrency::PerTask
        );
    }

    #[test]
    fn test_http_response_helpers() {
        let response = HttpResponse {
            status: 201,
            body: r#"{"ok": true}"#.to_string(),
        };
        assert!(response.is_success());
        assert_eq!(response.json().unwrap()["ok"], serde_json::json!(true));

        let response = HttpResponse {
            status: 404,
            body: "missing".to_string(),
        };
        assert!(!response.is_success());
        assert!(response.json().is_err());
    }

    #[test]
    fn test_select_query_builder() {
        let query = SelectQuery::new("samples")
            .with_columns(vec!["id".into()])
            .with_filter("batch", serde_json::json!(3))
            .with_order_by("id", true)
            .with_limit(5);

        assert_eq!(query.limit, 5);
        assert_eq!(query.order_by, Some(("id".to_string(), true)));
        assert_eq!(query.filters.len(), 1);
    }
}
