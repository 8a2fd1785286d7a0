//! Transform handler: reshapes upstream data

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

use super::{HandlerError, HandlerResult};
use crate::domain::reasoning::node_types::{
    Aggregation, FilterOperator, FormatKind, MapOperation, TransformSpec,
};
use crate::domain::reasoning::value::{
    compare_values, display_value, kind_of, numeric_elements, values_equal, Num,
};
use crate::domain::reasoning::NodeInputs;

pub fn execute(spec: &TransformSpec, inputs: &NodeInputs) -> HandlerResult {
    let data = inputs
        .first()
        .filter(|value| !value.is_null())
        .ok_or_else(|| HandlerError::failed("No input data provided"))?;

    match spec {
        TransformSpec::Map { operation, factor } => map(data, *operation, factor),
        TransformSpec::Filter {
            operator,
            threshold,
            condition,
        } => filter(data, *operator, threshold, condition.as_deref()),
        TransformSpec::Extract { fields } => extract(data, fields),
        TransformSpec::Merge { merge_keys } => Ok(merge(inputs, merge_keys.as_deref())),
        TransformSpec::Flatten {} => {
            let mut flat = Vec::new();
            flatten_into(data, &mut flat);
            Ok(Value::Array(flat))
        }
        TransformSpec::Aggregate { aggregation } => aggregate(data, *aggregation),
        TransformSpec::Format { format, precision } => Ok(Value::String(render(data, *format, *precision))),
    }
}

fn as_list<'a>(data: &'a Value, what: &str) -> Result<&'a Vec<Value>, HandlerError> {
    data.as_array()
        .ok_or_else(|| HandlerError::failed(format!("{} requires list input", what)))
}

pub(crate) fn finite(num: Num) -> HandlerResult {
    num.to_value()
        .ok_or_else(|| HandlerError::failed("Result is not a finite number"))
}

fn map(data: &Value, operation: MapOperation, factor: &Number) -> HandlerResult {
    let items = as_list(data, "Map")?;
    let factor = Num::from_number(factor);

    let mapped = match operation {
        MapOperation::Uppercase => items
            .iter()
            .map(|x| Value::String(display_value(x).to_uppercase()))
            .collect(),
        MapOperation::Lowercase => items
            .iter()
            .map(|x| Value::String(display_value(x).to_lowercase()))
            .collect(),
        MapOperation::Multiply | MapOperation::Square | MapOperation::Absolute => {
            numeric_elements(items)
                .into_iter()
                .map(|n| match operation {
                    MapOperation::Multiply => finite(n.mul(factor)),
                    MapOperation::Square => finite(n.mul(n)),
                    _ => finite(n.abs()),
                })
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(Value::Array(mapped))
}

fn filter(
    data: &Value,
    operator: FilterOperator,
    threshold: &Value,
    field: Option<&str>,
) -> HandlerResult {
    let items = as_list(data, "Filter")?;
    let mut kept = Vec::new();

    for item in items {
        let subject = match (field, item) {
            (Some(field), Value::Object(map)) => match map.get(field) {
                Some(value) => value,
                None => continue,
            },
            _ => item,
        };

        let keep = if operator == FilterOperator::Eq {
            values_equal(subject, threshold)
        } else {
            let ordering = compare_values(subject, threshold).ok_or_else(|| {
                HandlerError::failed(format!(
                    "Cannot compare {} with {}",
                    kind_of(subject),
                    kind_of(threshold)
                ))
            })?;

            match operator {
                FilterOperator::Gt => ordering == Ordering::Greater,
                FilterOperator::Lt => ordering == Ordering::Less,
                FilterOperator::Gte => ordering != Ordering::Less,
                FilterOperator::Lte => ordering != Ordering::Greater,
                FilterOperator::Eq => ordering == Ordering::Equal,
            }
        };

        if keep {
            kept.push(item.clone());
        }
    }

    Ok(Value::Array(kept))
}

fn pick(map: &Map<String, Value>, fields: &[String]) -> Value {
    Value::Object(
        map.iter()
            .filter(|(key, _)| fields.contains(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}

fn extract(data: &Value, fields: &[String]) -> HandlerResult {
    match data {
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .filter_map(|item| item.as_object().map(|map| pick(map, fields)))
                .collect(),
        )),
        Value::Object(map) => Ok(pick(map, fields)),
        _ => Err(HandlerError::failed("Extract requires dict or list of dicts")),
    }
}

/// Objects are merged key by key, other values land under `value`; later inputs win
fn merge(inputs: &NodeInputs, merge_keys: Option<&[String]>) -> Value {
    let keys: Vec<&str> = match merge_keys {
        Some(keys) => keys.iter().map(String::as_str).collect(),
        None => inputs.iter().map(|(key, _)| key).collect(),
    };

    let mut merged = Map::new();

    for key in keys {
        match inputs.get(key) {
            Some(Value::Object(map)) => {
                merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(other) => {
                merged.insert("value".to_string(), other.clone());
            }
            None => {}
        }
    }

    Value::Object(merged)
}

fn flatten_into(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| flatten_into(item, out)),
        Value::Object(map) => map.values().for_each(|item| flatten_into(item, out)),
        other => out.push(other.clone()),
    }
}

/// Sample standard deviation, 0 for fewer than two values
pub(crate) fn sample_variance(values: &[Num]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let n = values.len() as f64;
    let mean = values.iter().map(|v| v.as_f64()).sum::<f64>() / n;
    values
        .iter()
        .map(|v| (v.as_f64() - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0)
}

fn aggregate(data: &Value, aggregation: Aggregation) -> HandlerResult {
    let items = as_list(data, "Aggregate")?;
    let numbers = numeric_elements(items);

    match aggregation {
        Aggregation::Sum => finite(numbers.iter().fold(Num::Int(0), |acc, n| acc.add(*n))),
        Aggregation::Average => {
            if numbers.is_empty() {
                return Ok(Value::from(0));
            }
            let sum = numbers.iter().fold(Num::Int(0), |acc, n| acc.add(*n));
            finite(Num::Float(sum.as_f64() / numbers.len() as f64))
        }
        Aggregation::Min => extreme(&numbers, Ordering::Less),
        Aggregation::Max => extreme(&numbers, Ordering::Greater),
        Aggregation::Count => Ok(Value::from(items.len())),
        Aggregation::Stdev => finite(Num::Float(sample_variance(&numbers).sqrt())),
    }
}

fn extreme(numbers: &[Num], wanted: Ordering) -> HandlerResult {
    let best = numbers.iter().copied().reduce(|best, n| {
        if n.cmp_num(best) == Some(wanted) {
            n
        } else {
            best
        }
    });

    match best {
        Some(n) => finite(n),
        None => Ok(Value::Null),
    }
}

fn render(data: &Value, format: FormatKind, precision: usize) -> String {
    match format {
        FormatKind::String => display_value(data),
        FormatKind::Json => data.to_string(),
        FormatKind::Csv => match data {
            Value::Array(items) => items
                .iter()
                .map(display_value)
                .collect::<Vec<_>>()
                .join(","),
            other => display_value(other),
        },
        FormatKind::Percent => match data.as_f64() {
            Some(f) if data.is_number() => format!("{:.*}%", precision, f * 100.0),
            _ => display_value(data),
        },
    }
}
