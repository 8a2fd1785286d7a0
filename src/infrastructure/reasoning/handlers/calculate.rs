//! Calculate handler: arithmetic, comparisons, logic, math, statistics and analysis tools

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use super::transform::{finite, sample_variance};
use super::{HandlerContext, HandlerError, HandlerResult};
use crate::domain::reasoning::node_types::{
    file_id_string, ArithmeticOp, CalculateSpec, ComparisonOp, LogicalOp, MathOp, StatOp,
};
use crate::domain::reasoning::value::{
    compare_values, is_truthy, kind_of, numeric_elements, values_equal, Num,
};

pub async fn execute(spec: &CalculateSpec, ctx: &HandlerContext) -> HandlerResult {
    match spec {
        CalculateSpec::Arithmetic {
            operation,
            operands,
        } => arithmetic(ctx, *operation, operands),
        CalculateSpec::Comparison {
            operation,
            left,
            right,
        } => {
            let left = operand(ctx, left);
            let right = operand(ctx, right);
            comparison(*operation, &left, &right).map(Value::Bool)
        }
        CalculateSpec::Logical {
            operation,
            operands,
        } => {
            let values: Vec<Value> = operands.iter().map(|o| operand(ctx, o)).collect();
            Ok(Value::Bool(match operation {
                LogicalOp::And => values.iter().all(is_truthy),
                LogicalOp::Or => values.iter().any(is_truthy),
                LogicalOp::Not => values.first().is_some_and(|v| !is_truthy(v)),
            }))
        }
        CalculateSpec::Mathematical {
            operation,
            value,
            base,
        } => {
            let value = operand(ctx, value);
            let number = Num::from_value(&value).ok_or_else(|| {
                HandlerError::failed(format!(
                    "Mathematical operations require a number, got {}",
                    kind_of(&value)
                ))
            })?;
            mathematical(*operation, number, base.unwrap_or(10.0))
        }
        CalculateSpec::Statistical { operation, data } => {
            let data = operand(ctx, data);
            let items = data
                .as_array()
                .ok_or_else(|| HandlerError::failed("Statistical operations require list input"))?;
            statistical(*operation, &numeric_elements(items))
        }
        CalculateSpec::Analysis {
            tool_id,
            operation,
            file_id,
            file_id_key,
            parameters,
            parameters_key,
        } => {
            let tool = tool_id
                .as_deref()
                .or(operation.as_deref())
                .ok_or_else(|| HandlerError::failed("tool_id is required for analysis operation"))?;

            let file_id = match file_id {
                Some(id) => file_id_string(id),
                None => file_id_key
                    .as_deref()
                    .and_then(|key| ctx.input_or_global(key))
                    .and_then(|id| file_id_string(&id)),
            }
            .ok_or_else(|| HandlerError::failed("file_id is required for analysis operation"))?;

            let runner = ctx
                .collaborators
                .analysis
                .as_ref()
                .ok_or(HandlerError::MissingCollaborator("analysis runner"))?;

            let mut params = parameters.clone();
            if let Some(Value::Object(extra)) =
                parameters_key.as_deref().and_then(|key| ctx.input_or_global(key))
            {
                params.extend(extra);
            }

            debug!(node_id = %ctx.node_id(), tool = %tool, file_id = %file_id, "Running analysis tool");
            Ok(runner.run_tool(tool, &file_id, &params).await?)
        }
    }
}

/// A string naming a node input resolves to that input's output; anything else is a literal
fn operand(ctx: &HandlerContext, value: &Value) -> Value {
    match value {
        Value::String(name) => ctx.inputs.get(name).cloned().unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

fn arithmetic(ctx: &HandlerContext, operation: ArithmeticOp, operands: &[String]) -> HandlerResult {
    let mut values = Vec::with_capacity(operands.len());

    for name in operands {
        let value = ctx
            .inputs
            .get(name)
            .ok_or_else(|| HandlerError::failed(format!("Operand not found: {}", name)))?;
        let number = Num::from_value(value).ok_or_else(|| {
            HandlerError::failed(format!(
                "Operand '{}' is not a number ({})",
                name,
                kind_of(value)
            ))
        })?;
        values.push(number);
    }

    apply_arithmetic(operation, &values)
}

pub(crate) fn apply_arithmetic(operation: ArithmeticOp, values: &[Num]) -> HandlerResult {
    let (first, rest) = values
        .split_first()
        .ok_or_else(|| HandlerError::failed("operands not specified"))?;

    let second = || {
        rest.first()
            .copied()
            .ok_or_else(|| HandlerError::failed(format!("{:?} requires two operands", operation)))
    };

    let result = match operation {
        ArithmeticOp::Add => rest.iter().fold(*first, |acc, n| acc.add(*n)),
        ArithmeticOp::Subtract => {
            let tail = rest.iter().fold(Num::Int(0), |acc, n| acc.add(*n));
            first.sub(tail)
        }
        ArithmeticOp::Multiply => rest.iter().fold(*first, |acc, n| acc.mul(*n)),
        ArithmeticOp::Divide => {
            let divisor = second()?;
            if divisor.is_zero() {
                return Err(HandlerError::failed("Division by zero"));
            }
            first.div(divisor)
        }
        ArithmeticOp::Modulo => {
            let divisor = second()?;
            if divisor.is_zero() {
                return Err(HandlerError::failed("Modulo by zero"));
            }
            first.rem(divisor)
        }
        ArithmeticOp::Power => first.pow(second()?),
    };

    finite(result)
}

fn comparison(operation: ComparisonOp, left: &Value, right: &Value) -> Result<bool, HandlerError> {
    match operation {
        ComparisonOp::Eq => return Ok(values_equal(left, right)),
        ComparisonOp::Neq => return Ok(!values_equal(left, right)),
        _ => {}
    }

    let ordering = compare_values(left, right).ok_or_else(|| {
        HandlerError::failed(format!(
            "Cannot compare {} with {}",
            kind_of(left),
            kind_of(right)
        ))
    })?;

    Ok(match operation {
        ComparisonOp::Gt => ordering == Ordering::Greater,
        ComparisonOp::Lt => ordering == Ordering::Less,
        ComparisonOp::Gte => ordering != Ordering::Less,
        ComparisonOp::Lte => ordering != Ordering::Greater,
        ComparisonOp::Eq | ComparisonOp::Neq => false,
    })
}

fn mathematical(operation: MathOp, number: Num, base: f64) -> HandlerResult {
    let x = number.as_f64();
    let domain_error = || HandlerError::failed(format!("math domain error in {:?}", operation));

    let result = match operation {
        MathOp::Sqrt => {
            if x < 0.0 {
                return Err(domain_error());
            }
            Num::Float(x.sqrt())
        }
        MathOp::Log => {
            if x <= 0.0 || base <= 0.0 || base == 1.0 {
                return Err(domain_error());
            }
            Num::Float(x.ln() / base.ln())
        }
        MathOp::Exp => Num::Float(x.exp()),
        MathOp::Sin => Num::Float(x.sin()),
        MathOp::Cos => Num::Float(x.cos()),
        MathOp::Tan => Num::Float(x.tan()),
        MathOp::Abs => number.abs(),
        MathOp::Ceil => integral(x.ceil())?,
        MathOp::Floor => integral(x.floor())?,
    };

    finite(result)
}

fn integral(f: f64) -> Result<Num, HandlerError> {
    if f.is_finite() && f.abs() < i64::MAX as f64 {
        Ok(Num::Int(f as i64))
    } else {
        Err(HandlerError::failed("Result is not a finite number"))
    }
}

fn statistical(operation: StatOp, numbers: &[Num]) -> HandlerResult {
    if numbers.is_empty() {
        return Ok(Value::from(0));
    }

    match operation {
        StatOp::Mean => {
            let sum: f64 = numbers.iter().map(|n| n.as_f64()).sum();
            finite(Num::Float(sum / numbers.len() as f64))
        }
        StatOp::Median => {
            let mut sorted = numbers.to_vec();
            sorted.sort_by(|a, b| a.cmp_num(*b).unwrap_or(Ordering::Equal));
            let mid = sorted.len() / 2;

            if sorted.len() % 2 == 1 {
                finite(sorted[mid])
            } else {
                finite(Num::Float((sorted[mid - 1].as_f64() + sorted[mid].as_f64()) / 2.0))
            }
        }
        StatOp::Mode => {
            let mut counts: HashMap<u64, usize> = HashMap::new();
            for n in numbers {
                *counts.entry(mode_key(*n)).or_default() += 1;
            }

            let top = counts.values().copied().max().unwrap_or(0);
            match numbers.iter().find(|n| counts.get(&mode_key(**n)) == Some(&top)) {
                Some(n) => finite(*n),
                None => Ok(Value::from(0)),
            }
        }
        StatOp::Stdev => finite(Num::Float(sample_variance(numbers).sqrt())),
        StatOp::Variance => finite(Num::Float(sample_variance(numbers))),
    }
}

/// Equal numbers share a key, so `2` and `2.0` count together
fn mode_key(n: Num) -> u64 {
    let f = n.as_f64();
    if f == 0.0 { 0.0f64.to_bits() } else { f.to_bits() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mockall::predicate::eq;
    use serde_json::json;

    use crate::domain::reasoning::collaborators::MockAnalysisRunner;
    use crate::domain::reasoning::{
        Collaborators, CompiledNode, NodeConfig, NodeInputs, NodeKind, NodeType,
    };

    fn context(
        config: Value,
        inputs: Vec<(&str, Value)>,
        global: Value,
        collaborators: Collaborators,
    ) -> HandlerContext {
        let ids: Vec<&str> = inputs.iter().map(|(id, _)| *id).collect();
        let node = NodeConfig::new("calc", NodeType::Calculate)
            .with_inputs(ids)
            .with_config(config);

        HandlerContext::new(
            Arc::new(CompiledNode::compile(node).unwrap()),
            Arc::new(NodeInputs::from_iter(inputs)),
            Arc::new(global),
            collaborators,
        )
    }

    async fn run(ctx: &HandlerContext) -> HandlerResult {
        match ctx.node.kind() {
            NodeKind::Calculate(spec) => execute(spec, ctx).await,
            other => panic!("not a calculate node: {:?}", other),
        }
    }

    async fn calc(config: Value, inputs: Vec<(&str, Value)>) -> HandlerResult {
        run(&context(config, inputs, json!({}), Collaborators::new())).await
    }

    #[tokio::test]
    async fn test_arithmetic() {
        let inputs = || vec![("a", json!(7)), ("b", json!(2))];
        let op = |name: &str| json!({"operation": name, "operands": ["a", "b"]});

        assert_eq!(calc(op("add"), inputs()).await.unwrap(), json!(9));
        assert_eq!(calc(op("subtract"), inputs()).await.unwrap(), json!(5));
        assert_eq!(calc(op("multiply"), inputs()).await.unwrap(), json!(14));
        assert_eq!(calc(op("divide"), inputs()).await.unwrap(), json!(3.5));
        assert_eq!(calc(op("modulo"), inputs()).await.unwrap(), json!(1));
        assert_eq!(calc(op("power"), inputs()).await.unwrap(), json!(49));
    }

    #[tokio::test]
    async fn test_division_and_modulo_by_zero() {
        let inputs = || vec![("a", json!(5)), ("zero", json!(0))];

        let err = calc(json!({"operation": "divide", "operands": ["a", "zero"]}), inputs())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Division by zero");

        let err = calc(json!({"operation": "modulo", "operands": ["a", "zero"]}), inputs())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Modulo by zero");
    }

    #[tokio::test]
    async fn test_arithmetic_rejects_non_numbers() {
        let err = calc(
            json!({"operation": "add", "operands": ["a", "b"]}),
            vec![("a", json!(1)), ("b", json!("two"))],
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }

    #[tokio::test]
    async fn test_comparison_resolves_inputs_and_literals() {
        let result = calc(
            json!({"operation_type": "comparison", "operation": "gte", "left": "ph", "right": 7}),
            vec![("ph", json!(7.0))],
        )
        .await
        .unwrap();
        assert_eq!(result, json!(true));

        let result = calc(
            json!({"operation_type": "comparison", "operation": "not_equal", "left": "label", "right": "control"}),
            vec![("label", json!("treated"))],
        )
        .await
        .unwrap();
        assert_eq!(result, json!(true));

        assert!(calc(
            json!({"operation_type": "comparison", "operation": "lt", "left": "label", "right": 3}),
            vec![("label", json!("x"))],
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_logical() {
        let inputs = || vec![("yes", json!(true)), ("no", json!(0))];

        assert_eq!(
            calc(json!({"operation_type": "logical", "operation": "and", "operands": ["yes", "no"]}), inputs())
                .await
                .unwrap(),
            json!(false)
        );
        assert_eq!(
            calc(json!({"operation_type": "logical", "operation": "or", "operands": ["yes", "no"]}), inputs())
                .await
                .unwrap(),
            json!(true)
        );
        assert_eq!(
            calc(json!({"operation_type": "logical", "operation": "not", "operands": ["no"]}), inputs())
                .await
                .unwrap(),
            json!(true)
        );
    }

    #[tokio::test]
    async fn test_mathematical() {
        let math = |op: &str| json!({"operation_type": "mathematical", "operation": op, "value": "x"});

        assert_eq!(calc(math("sqrt"), vec![("x", json!(16))]).await.unwrap(), json!(4.0));
        assert_eq!(calc(math("log"), vec![("x", json!(1000))]).await.unwrap().as_f64().map(|f| f.round()), Some(3.0));
        assert_eq!(calc(math("ceil"), vec![("x", json!(2.1))]).await.unwrap(), json!(3));
        assert_eq!(calc(math("floor"), vec![("x", json!(-2.1))]).await.unwrap(), json!(-3));
        assert_eq!(calc(math("abs"), vec![("x", json!(-4))]).await.unwrap(), json!(4));
        assert!(calc(math("sqrt"), vec![("x", json!(-1))]).await.is_err());
        assert!(calc(math("log"), vec![("x", json!(0))]).await.is_err());

        let base2 = json!({"operation_type": "mathematical", "operation": "log", "value": 8, "base": 2});
        assert_eq!(calc(base2, vec![]).await.unwrap().as_f64().map(|f| f.round()), Some(3.0));
    }

    #[tokio::test]
    async fn test_statistical() {
        let stat = |op: &str| json!({"operation_type": "statistical", "operation": op, "data": "readings"});
        let inputs = || vec![("readings", json!([2, 4, 4, 4, 5, 5, 7, 9]))];

        assert_eq!(calc(stat("mean"), inputs()).await.unwrap(), json!(5.0));
        assert_eq!(calc(stat("median"), inputs()).await.unwrap(), json!(4.5));
        assert_eq!(calc(stat("mode"), inputs()).await.unwrap(), json!(4));
        assert_eq!(calc(stat("variance"), inputs()).await.unwrap(), json!(32.0 / 7.0));
        assert_eq!(
            calc(stat("stdev"), vec![("readings", json!([1]))]).await.unwrap(),
            json!(0.0)
        );
        assert_eq!(
            calc(stat("mean"), vec![("readings", json!([]))]).await.unwrap(),
            json!(0)
        );
        assert!(calc(stat("mean"), vec![("readings", json!(3))]).await.is_err());
    }

    #[tokio::test]
    async fn test_mode_ties_keep_first_seen() {
        let mode = json!({"operation_type": "statistical", "operation": "mode", "data": "readings"});

        let tied = vec![("readings", json!([3, 1.0, 1, 3, 8]))];
        assert_eq!(calc(mode.clone(), tied).await.unwrap(), json!(3));

        let mixed = vec![("readings", json!([2.0, 5, 2]))];
        assert_eq!(calc(mode.clone(), mixed).await.unwrap(), json!(2.0));

        let large: Vec<Value> = (0..20_000).map(|i| json!(i % 1000)).chain([json!(999)]).collect();
        assert_eq!(
            calc(mode, vec![("readings", Value::Array(large))]).await.unwrap(),
            json!(999)
        );
    }

    #[tokio::test]
    async fn test_analysis_delegates_to_runner() {
        let mut runner = MockAnalysisRunner::new();
        runner
            .expect_run_tool()
            .withf(|tool, file, params| {
                tool == "ph-curve" && file == "12" && params.get("window") == Some(&json!(5))
                    && params.get("smooth") == Some(&json!(true))
            })
            .times(1)
            .returning(|_, _, _| Ok(json!({"slope": 0.4})));

        let ctx = context(
            json!({
                "operation_type": "analysis",
                "tool_id": "ph-curve",
                "file_id_key": "file",
                "parameters": {"window": 5},
                "parameters_key": "options"
            }),
            vec![("file", json!(12))],
            json!({"options": {"smooth": true}}),
            Collaborators::new().with_analysis(Arc::new(runner)),
        );

        assert_eq!(run(&ctx).await.unwrap(), json!({"slope": 0.4}));
    }

    #[tokio::test]
    async fn test_analysis_requires_file_id() {
        let mut runner = MockAnalysisRunner::new();
        runner.expect_run_tool().with(eq("t"), eq("1"), mockall::predicate::always()).never();

        let ctx = context(
            json!({"operation_type": "analysis", "operation": "t"}),
            vec![],
            json!({}),
            Collaborators::new().with_analysis(Arc::new(runner)),
        );

        let err = run(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "file_id is required for analysis operation");
    }
}
