//! Output handler: returns, stores, sends or logs chain results

use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::info;

use super::{HandlerContext, HandlerError, HandlerResult};
use crate::domain::reasoning::node_types::{file_id_string, OutputSpec, ReturnFormat, StoreTarget};
use crate::domain::reasoning::value::display_value;
use crate::domain::reasoning::{HttpRequest, NodeInputs};

pub async fn execute(spec: &OutputSpec, ctx: &HandlerContext) -> HandlerResult {
    match spec {
        OutputSpec::Return {
            output_format,
            fields,
        } => Ok(shape(&ctx.inputs, *output_format, fields)),
        OutputSpec::Store { .. } => store(spec, ctx).await,
        OutputSpec::Send {
            url,
            method,
            headers,
            timeout,
            payload,
        } => {
            let Some(url) = url else {
                return Ok(json!({
                    "status": "sent",
                    "message": "Output sending skipped: no url configured",
                }));
            };

            let client = ctx
                .collaborators
                .http_client
                .as_ref()
                .ok_or(HandlerError::MissingCollaborator("HTTP client"))?;

            let body = payload.clone().unwrap_or_else(|| ctx.inputs.to_json());
            let request = HttpRequest::new(method, url)
                .with_headers(headers.clone())
                .with_body(body)
                .with_timeout(
                    Duration::try_from_secs_f64(*timeout).unwrap_or(Duration::from_secs(10)),
                );

            let reply = client
                .send(request)
                .await
                .map_err(|e| HandlerError::failed(format!("Sending output failed: {}", e)))?;

            if !reply.is_success() {
                return Err(HandlerError::failed(format!(
                    "Sending output failed: HTTP {} from {}",
                    reply.status, url
                )));
            }

            Ok(json!({"status": "sent", "http_status": reply.status}))
        }
        OutputSpec::Log { message } => {
            let message = message
                .clone()
                .unwrap_or_else(|| "Output logged successfully".to_string());

            info!(
                node_id = %ctx.node_id(),
                output = %ctx.inputs.to_json(),
                "{}",
                message
            );

            Ok(json!({"status": "logged", "message": message}))
        }
    }
}

fn shape(inputs: &NodeInputs, format: ReturnFormat, fields: &[String]) -> Value {
    match format {
        ReturnFormat::Raw => inputs.to_json(),
        ReturnFormat::Selected => Value::Object(
            inputs
                .iter()
                .filter(|(key, _)| fields.iter().any(|f| f == *key))
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        ),
        ReturnFormat::Merged => {
            let mut merged = Map::new();

            for value in inputs.values() {
                match value {
                    Value::Object(map) => {
                        merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    other => {
                        merged.insert("value".to_string(), other.clone());
                    }
                }
            }

            Value::Object(merged)
        }
    }
}

fn skipped(reason: &str) -> Value {
    json!({
        "status": "stored",
        "message": format!("Output storage skipped: {}", reason),
    })
}

/// Value at `key` among the inputs, else the literal fallback, else the only input
fn resolve_input_value(
    inputs: &NodeInputs,
    key: Option<&str>,
    fallback: Option<&Value>,
) -> Option<Value> {
    let value = match (key, fallback) {
        (Some(key), _) => inputs.get(key).cloned(),
        (None, Some(fallback)) => Some(fallback.clone()),
        (None, None) if inputs.len() == 1 => inputs.first().cloned(),
        _ => None,
    };

    value.filter(|v| !v.is_null())
}

async fn store(spec: &OutputSpec, ctx: &HandlerContext) -> HandlerResult {
    let OutputSpec::Store {
        store_target,
        file_id,
        file_id_key,
        content_key,
        content,
        data_key,
        data,
        source,
    } = spec
    else {
        return Err(HandlerError::failed("not a store output"));
    };

    let Some(records) = ctx.collaborators.record_store.as_ref() else {
        return Ok(skipped("no database session"));
    };

    let file_id = file_id
        .as_ref()
        .and_then(file_id_string)
        .or_else(|| {
            file_id_key
                .as_deref()
                .and_then(|key| ctx.input_or_global(key))
                .and_then(|id| file_id_string(&id))
        });

    let Some(file_id) = file_id else {
        return Ok(skipped("missing file_id"));
    };

    match store_target {
        StoreTarget::Conclusion => {
            let Some(content) =
                resolve_input_value(&ctx.inputs, content_key.as_deref(), content.as_ref())
            else {
                return Ok(skipped("missing content"));
            };

            let id = records
                .insert_conclusion(&file_id, &display_value(&content))
                .await?;

            Ok(json!({"status": "stored", "target": "conclusion", "id": id}))
        }
        StoreTarget::Annotation => {
            let Some(data) = resolve_input_value(&ctx.inputs, data_key.as_deref(), data.as_ref())
            else {
                return Ok(skipped("missing data"));
            };

            let data = match data {
                Value::Object(_) => data,
                other => json!({"value": other}),
            };

            let id = records.insert_annotation(&file_id, &data, source).await?;

            Ok(json!({"status": "stored", "target": "annotation", "id": id}))
        }
    }
}
