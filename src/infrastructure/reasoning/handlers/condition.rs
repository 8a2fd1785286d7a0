//! Condition handler: evaluates branch conditions
//!
//! Branch outputs name the path that would be taken; the engine runs every
//! node of the chain regardless.

use serde_json::{json, Value};

use super::{HandlerContext, HandlerError, HandlerResult};
use crate::domain::reasoning::node_types::ConditionSpec;
use crate::domain::reasoning::value::display_value;

pub fn execute(spec: &ConditionSpec, ctx: &HandlerContext) -> HandlerResult {
    let resolve = |name: &str| ctx.resolve_path(name);

    match spec {
        ConditionSpec::If {
            condition,
            true_path,
            false_path,
        } => {
            let result = condition.evaluate_bool(resolve)?;
            let (next_node, path_taken) = if result {
                (true_path, "true")
            } else {
                (false_path, "false")
            };

            Ok(json!({
                "result": result,
                "next_node": next_node,
                "path_taken": path_taken,
            }))
        }
        ConditionSpec::Switch {
            variable,
            cases,
            default_path,
        } => {
            let value = resolve(variable.as_str())
                .ok_or_else(|| HandlerError::failed(format!("Variable not found: {}", variable)))?;
            let next_node = cases
                .get(&display_value(&value))
                .unwrap_or(default_path);

            Ok(json!({
                "variable": variable,
                "value": value,
                "next_node": next_node,
            }))
        }
        ConditionSpec::Filter { condition } => Ok(Value::Bool(condition.evaluate_bool(resolve)?)),
    }
}
