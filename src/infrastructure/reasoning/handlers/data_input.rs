//! Data input handler: brings values into the chain

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use tracing::debug;

use super::{HandlerContext, HandlerError, HandlerResult};
use crate::domain::reasoning::node_types::{
    file_id_string, parse_order_by, ConstantType, DataInputSpec, ResponseFormat,
};
use crate::domain::reasoning::value::display_value;
use crate::domain::reasoning::{HttpRequest, SelectQuery};

pub async fn execute(spec: &DataInputSpec, ctx: &HandlerContext) -> HandlerResult {
    match spec {
        DataInputSpec::Global { key_path } => {
            let key_path = key_path
                .as_deref()
                .unwrap_or_else(|| ctx.node.config().name());
            from_global(key_path, &ctx.global_input)
        }
        DataInputSpec::Constant { value, data_type } => coerce_constant(value, *data_type),
        DataInputSpec::LabflowFile { file_id, encoding } => {
            from_labflow_file(ctx, file_id, encoding.as_deref()).await
        }
        DataInputSpec::Environment { env_var } => std::env::var(env_var)
            .map(Value::String)
            .map_err(|_| HandlerError::failed(format!("Environment variable not found: {}", env_var))),
        DataInputSpec::File {
            file_path,
            mode,
            encoding,
        } => from_file(file_path, mode, encoding.as_deref()).await,
        DataInputSpec::Database {
            table_name,
            select_columns,
            filters,
            order_by,
            limit,
        } => {
            let store = ctx
                .collaborators
                .record_store
                .as_ref()
                .ok_or(HandlerError::MissingCollaborator("record store"))?;

            let mut query = SelectQuery::new(table_name)
                .with_columns(select_columns.clone())
                .with_limit(*limit);

            for (column, value) in filters {
                query = query.with_filter(column, value.clone());
            }

            if let Some(order_by) = order_by {
                let (column, descending) =
                    parse_order_by(order_by).map_err(HandlerError::Failed)?;
                query = query.with_order_by(column, descending);
            }

            let rows = store.select(&query).await?;
            debug!(node_id = %ctx.node_id(), table = %table_name, rows = rows.len(), "Database source loaded");

            Ok(Value::Array(rows))
        }
        DataInputSpec::Api {
            url,
            method,
            headers,
            params,
            json,
            timeout,
            response,
        } => {
            let client = ctx
                .collaborators
                .http_client
                .as_ref()
                .ok_or(HandlerError::MissingCollaborator("HTTP client"))?;

            let mut request = HttpRequest::new(method, url)
                .with_headers(headers.clone())
                .with_query(
                    params
                        .iter()
                        .map(|(k, v)| (k.clone(), display_value(v)))
                        .collect(),
                )
                .with_timeout(
                    Duration::try_from_secs_f64(*timeout).unwrap_or(Duration::from_secs(10)),
                );

            if let Some(body) = json {
                request = request.with_body(body.clone());
            }

            let reply = client
                .send(request)
                .await
                .map_err(|e| HandlerError::failed(format!("API request failed: {}", e)))?;

            if !reply.is_success() {
                return Err(HandlerError::failed(format!(
                    "API request failed: HTTP {} from {}",
                    reply.status, url
                )));
            }

            match response {
                ResponseFormat::Text => Ok(Value::String(reply.body)),
                ResponseFormat::Json => Ok(reply.json()?),
            }
        }
    }
}

/// Dot-path traversal through objects of the initial input
fn from_global(key_path: &str, global_input: &Value) -> HandlerResult {
    let mut current = global_input;

    for key in key_path.split('.') {
        match current {
            Value::Object(map) => match map.get(key) {
                Some(next) => current = next,
                None => {
                    return Err(HandlerError::failed(format!(
                        "Key not found in global input: {}",
                        key_path
                    )));
                }
            },
            _ => {
                return Err(HandlerError::failed(format!(
                    "Cannot traverse {} in non-dict value",
                    key
                )));
            }
        }
    }

    if current.is_null() {
        return Err(HandlerError::failed(format!(
            "Key not found in global input: {}",
            key_path
        )));
    }

    Ok(current.clone())
}

fn coerce_constant(value: &Value, data_type: ConstantType) -> HandlerResult {
    let invalid = || {
        HandlerError::failed(format!(
            "Cannot convert {} to {:?}",
            value,
            data_type
        ))
    };

    match data_type {
        ConstantType::String => Ok(value.clone()),
        ConstantType::Integer => match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::from(i)),
                None => n
                    .as_f64()
                    .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                    .map(|f| Value::from(f.trunc() as i64))
                    .ok_or_else(invalid),
            },
            Value::Bool(b) => Ok(Value::from(*b as i64)),
            Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        ConstantType::Float => {
            let f = match value {
                Value::Number(n) => n.as_f64(),
                Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            f.and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(invalid)
        }
        ConstantType::Boolean => Ok(Value::Bool(match value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            other => matches!(
                display_value(other).to_lowercase().as_str(),
                "true" | "1" | "yes"
            ),
        })),
        ConstantType::List | ConstantType::Dict => match value {
            Value::String(s) => serde_json::from_str(s)
                .map_err(|e| HandlerError::failed(format!("Invalid JSON constant: {}", e))),
            other => Ok(other.clone()),
        },
    }
}

async fn from_labflow_file(
    ctx: &HandlerContext,
    file_id: &Value,
    encoding: Option<&str>,
) -> HandlerResult {
    let file_id = file_id_string(file_id)
        .ok_or_else(|| HandlerError::failed("'file_id' not specified for labflow_file source"))?;

    let storage_key = match &ctx.collaborators.record_store {
        Some(store) => store
            .file_storage_key(&file_id)
            .await?
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                HandlerError::failed(format!("File with id {} not found or has no storage key", file_id))
            })?,
        None => file_id.clone(),
    };

    let blobs = ctx
        .collaborators
        .blob_store
        .as_ref()
        .ok_or(HandlerError::MissingCollaborator("blob store"))?;

    let content = blobs.load(&storage_key).await?;
    debug!(node_id = %ctx.node_id(), file_id = %file_id, bytes = content.len(), "LabFlow file loaded");

    match encoding {
        Some(encoding) => decode(&content, encoding).map(Value::String),
        None => Ok(Value::String(BASE64.encode(&content))),
    }
}

async fn from_file(file_path: &str, mode: &str, encoding: Option<&str>) -> HandlerResult {
    let content = tokio::fs::read(file_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            HandlerError::failed(format!("File not found: {}", file_path))
        } else {
            HandlerError::failed(format!("Failed to read file {}: {}", file_path, e))
        }
    })?;

    if mode.contains('b') {
        return Ok(Value::String(BASE64.encode(&content)));
    }

    decode(&content, encoding.unwrap_or("utf-8")).map(Value::String)
}

/// Decode bytes as utf-8, ascii or latin-1
pub fn decode(content: &[u8], encoding: &str) -> Result<String, HandlerError> {
    let normalized: String = encoding
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .collect::<String>()
        .to_lowercase();

    let failed = |reason: String| {
        HandlerError::failed(format!(
            "Failed to decode file content with encoding '{}': {}",
            encoding, reason
        ))
    };

    match normalized.as_str() {
        "utf8" => String::from_utf8(content.to_vec()).map_err(|e| failed(e.to_string())),
        "ascii" | "usascii" => {
            if content.is_ascii() {
                Ok(content.iter().map(|b| *b as char).collect())
            } else {
                Err(failed("non-ascii byte".to_string()))
            }
        }
        "latin1" | "iso88591" => Ok(content.iter().map(|b| *b as char).collect()),
        _ => Err(failed("unsupported encoding".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    use bytes::Bytes;
    use mockall::predicate::eq;
    use serde_json::json;

    use crate::domain::reasoning::collaborators::{MockBlobStore, MockHttpClient, MockRecordStore};
    use crate::domain::reasoning::{
        Collaborators, CompiledNode, HttpResponse, NodeConfig, NodeInputs, NodeKind, NodeType,
        SessionConcurrency,
    };
    use crate::domain::DomainError;

    fn context(node: NodeConfig, global: Value, collaborators: Collaborators) -> HandlerContext {
        HandlerContext::new(
            Arc::new(CompiledNode::compile(node).unwrap()),
            Arc::new(NodeInputs::new()),
            Arc::new(global),
            collaborators,
        )
    }

    async fn run(node: NodeConfig, global: Value, collaborators: Collaborators) -> HandlerResult {
        let ctx = context(node, global, collaborators);
        match ctx.node.kind().clone() {
            NodeKind::DataInput(spec) => execute(&spec, &ctx).await,
            other => panic!("not a data input: {:?}", other),
        }
    }

    fn data_input(name: &str, config: Value) -> NodeConfig {
        NodeConfig::new(name, NodeType::DataInput).with_config(config)
    }

    #[tokio::test]
    async fn test_global_defaults_to_node_name() {
        let result = run(
            data_input("temperature", json!({})),
            json!({"temperature": 21.5}),
            Collaborators::new(),
        )
        .await
        .unwrap();

        assert_eq!(result, json!(21.5));
    }

    #[tokio::test]
    async fn test_global_dot_path_and_missing_key() {
        let global = json!({"sample": {"ph": 6.8, "empty": null}});

        let result = run(
            data_input("ph", json!({"key_path": "sample.ph"})),
            global.clone(),
            Collaborators::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, json!(6.8));

        let err = run(
            data_input("x", json!({"key_path": "sample.empty"})),
            global.clone(),
            Collaborators::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Key not found in global input: sample.empty");

        let err = run(
            data_input("x", json!({"key_path": "sample.ph.deeper"})),
            global,
            Collaborators::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("non-dict"));
    }

    #[test]
    fn test_constant_coercion() {
        assert_eq!(coerce_constant(&json!("42"), ConstantType::Integer).unwrap(), json!(42));
        assert_eq!(coerce_constant(&json!(3.9), ConstantType::Integer).unwrap(), json!(3));
        assert_eq!(coerce_constant(&json!("2.5"), ConstantType::Float).unwrap(), json!(2.5));
        assert_eq!(coerce_constant(&json!("yes"), ConstantType::Boolean).unwrap(), json!(true));
        assert_eq!(coerce_constant(&json!(0), ConstantType::Boolean).unwrap(), json!(false));
        assert_eq!(
            coerce_constant(&json!("[1, 2]"), ConstantType::List).unwrap(),
            json!([1, 2])
        );
        assert_eq!(
            coerce_constant(&json!({"a": 1}), ConstantType::Dict).unwrap(),
            json!({"a": 1})
        );
        assert!(coerce_constant(&json!("abc"), ConstantType::Integer).is_err());
    }

    #[tokio::test]
    async fn test_environment_source() {
        // SAFETY: the variable name is unique to this test
        unsafe {
            std::env::set_var("LABFLOW_TEST_DATA_INPUT_ENV", "on");
        }

        let result = run(
            data_input("env", json!({"source_type": "environment", "env_var": "LABFLOW_TEST_DATA_INPUT_ENV"})),
            json!({}),
            Collaborators::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, json!("on"));

        let err = run(
            data_input("env", json!({"source_type": "environment", "env_var": "LABFLOW_TEST_UNSET_VAR"})),
            json!({}),
            Collaborators::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("LABFLOW_TEST_UNSET_VAR"));
    }

    #[tokio::test]
    async fn test_file_source_text_and_binary() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "sample,ph\nA,7.1\n").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let text = run(
            data_input("f", json!({"source_type": "file", "file_path": path, "mode": "r"})),
            json!({}),
            Collaborators::new(),
        )
        .await
        .unwrap();
        assert_eq!(text, json!("sample,ph\nA,7.1\n"));

        let binary = run(
            data_input("f", json!({"source_type": "file", "file_path": path})),
            json!({}),
            Collaborators::new(),
        )
        .await
        .unwrap();
        assert_eq!(binary, json!(BASE64.encode("sample,ph\nA,7.1\n")));

        let err = run(
            data_input("f", json!({"source_type": "file", "file_path": "/nonexistent/labflow.csv"})),
            json!({}),
            Collaborators::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "File not found: /nonexistent/labflow.csv");
    }

    #[tokio::test]
    async fn test_labflow_file_resolves_storage_key() {
        let mut records = MockRecordStore::new();
        records
            .expect_concurrency()
            .return_const(SessionConcurrency::PerTask);
        records
            .expect_file_storage_key()
            .with(eq("17"))
            .times(1)
            .returning(|_| Ok(Some("uploads/17.csv".to_string())));

        let mut blobs = MockBlobStore::new();
        blobs
            .expect_load()
            .with(eq("uploads/17.csv"))
            .times(1)
            .returning(|_| Ok(Bytes::from_static(b"ph=7")));

        let collaborators = Collaborators::new()
            .with_record_store(Arc::new(records))
            .with_blob_store(Arc::new(blobs));

        let result = run(
            data_input("f", json!({"source_type": "labflow_file", "file_id": 17, "encoding": "utf-8"})),
            json!({}),
            collaborators,
        )
        .await
        .unwrap();

        assert_eq!(result, json!("ph=7"));
    }

    #[tokio::test]
    async fn test_labflow_file_missing_record() {
        let mut records = MockRecordStore::new();
        records.expect_file_storage_key().returning(|_| Ok(None));

        let collaborators = Collaborators::new()
            .with_record_store(Arc::new(records))
            .with_blob_store(Arc::new(MockBlobStore::new()));

        let err = run(
            data_input("f", json!({"source_type": "labflow_file", "file_id": "9"})),
            json!({}),
            collaborators,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("File with id 9"));
    }

    #[tokio::test]
    async fn test_database_source_builds_query() {
        let mut records = MockRecordStore::new();
        records
            .expect_select()
            .withf(|query| {
                query.table == "samples"
                    && query.columns == vec!["id".to_string(), "ph".to_string()]
                    && query.filters == vec![("batch".to_string(), json!(4))]
                    && query.order_by == Some(("ph".to_string(), true))
                    && query.limit == 10
            })
            .times(1)
            .returning(|_| Ok(vec![json!({"id": 1, "ph": 7.2})]));

        let result = run(
            data_input(
                "rows",
                json!({
                    "source_type": "database",
                    "table_name": "samples",
                    "select_columns": ["id", "ph"],
                    "filters": {"batch": 4},
                    "order_by": "ph desc",
                    "limit": 10
                }),
            ),
            json!({}),
            Collaborators::new().with_record_store(Arc::new(records)),
        )
        .await
        .unwrap();

        assert_eq!(result, json!([{"id": 1, "ph": 7.2}]));
    }

    #[tokio::test]
    async fn test_database_source_requires_store() {
        let err = run(
            data_input("rows", json!({"source_type": "database", "table_name": "samples"})),
            json!({}),
            Collaborators::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HandlerError::MissingCollaborator(_)));
    }

    #[tokio::test]
    async fn test_blob_store_error_propagates() {
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_load()
            .returning(|_| Err(DomainError::storage("disk offline")));

        let err = run(
            data_input("f", json!({"source_type": "labflow_file", "file_id": "raw/1.bin"})),
            json!({}),
            Collaborators::new().with_blob_store(Arc::new(blobs)),
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "Storage error: disk offline");
    }

    fn http_replying(status: u16, body: &'static str) -> Collaborators {
        let mut http = MockHttpClient::new();
        http.expect_send().times(1).returning(move |_| {
            Ok(HttpResponse {
                status,
                body: body.to_string(),
            })
        });
        Collaborators::new().with_http_client(Arc::new(http))
    }

    #[tokio::test]
    async fn test_api_source_builds_request() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|request| {
                request.method == "POST"
                    && request.url == "https://lims.example/api/samples"
                    && request.headers.get("X-Lab").map(String::as_str) == Some("north")
                    && request.query
                        == vec![
                            ("batch".to_string(), "4".to_string()),
                            ("site".to_string(), "north".to_string()),
                            ("strict".to_string(), "true".to_string()),
                        ]
                    && request.body == Some(json!({"ids": [1, 2]}))
                    && request.timeout == Duration::from_millis(2500)
            })
            .times(1)
            .returning(|_| {
                Ok(HttpResponse {
                    status: 200,
                    body: r#"{"ph": [7.1, 6.9]}"#.to_string(),
                })
            });

        let result = run(
            data_input(
                "lims",
                json!({
                    "source_type": "api",
                    "url": "https://lims.example/api/samples",
                    "method": "post",
                    "headers": {"X-Lab": "north"},
                    "params": {"batch": 4, "site": "north", "strict": true},
                    "json": {"ids": [1, 2]},
                    "timeout": 2.5
                }),
            ),
            json!({}),
            Collaborators::new().with_http_client(Arc::new(http)),
        )
        .await
        .unwrap();

        assert_eq!(result, json!({"ph": [7.1, 6.9]}));
    }

    #[tokio::test]
    async fn test_api_source_text_response() {
        let result = run(
            data_input(
                "lims",
                json!({"source_type": "api", "url": "https://lims.example/status", "response": "text"}),
            ),
            json!({}),
            http_replying(200, "ready"),
        )
        .await
        .unwrap();

        assert_eq!(result, json!("ready"));
    }

    #[tokio::test]
    async fn test_api_source_error_status_fails() {
        let err = run(
            data_input("lims", json!({"source_type": "api", "url": "https://lims.example/down"})),
            json!({}),
            http_replying(503, "unavailable"),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "API request failed: HTTP 503 from https://lims.example/down"
        );
    }

    #[tokio::test]
    async fn test_api_source_invalid_json_fails() {
        let err = run(
            data_input("lims", json!({"source_type": "api", "url": "https://lims.example/raw"})),
            json!({}),
            http_replying(200, "not json"),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("Invalid JSON response"));
    }

    #[tokio::test]
    async fn test_api_source_requires_http_client() {
        let err = run(
            data_input("lims", json!({"source_type": "api", "url": "https://lims.example/api"})),
            json!({}),
            Collaborators::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HandlerError::MissingCollaborator("HTTP client")));
        assert_eq!(err.to_string(), "No HTTP client configured");
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode(b"abc", "UTF-8").unwrap(), "abc");
        assert_eq!(decode(&[0xE9], "latin-1").unwrap(), "é");
        assert!(decode(&[0xE9], "ascii").is_err());
        assert!(decode(&[0xFF, 0xFE], "utf8").is_err());
        assert!(decode(b"abc", "ebcdic").is_err());
    }
}
