//! Typed node configurations
//!
//! Every node's free-form `config` map is compiled into one of these closed
//! unions before the chain runs, so unknown operations and missing keys are
//! rejected up front instead of failing mid-run.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::error::ReasoningError;
use super::expression::Expression;
use super::node::{NodeConfig, NodeType};

/// Compiled, typed configuration of a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    DataInput(DataInputSpec),
    Transform(TransformSpec),
    Calculate(CalculateSpec),
    Condition(ConditionSpec),
    Output(OutputSpec),
}

impl NodeKind {
    /// Compile a node's config map, inserting the default sub-type when absent
    pub fn compile(node: &NodeConfig) -> Result<Self, ReasoningError> {
        let kind = match node.node_type() {
            NodeType::DataInput => Self::DataInput(decode(node, "source_type", "global")?),
            NodeType::Transform => Self::Transform(decode(node, "transform_type", "map")?),
            NodeType::Calculate => Self::Calculate(decode(node, "operation_type", "arithmetic")?),
            NodeType::Condition => Self::Condition(decode(node, "condition_type", "if")?),
            NodeType::Output => Self::Output(decode(node, "output_type", "return")?),
        };

        kind.check(node)?;
        Ok(kind)
    }

    /// Name of the sub-type, used for logs and metrics
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::DataInput(spec) => match spec {
                DataInputSpec::Global { .. } => "global",
                DataInputSpec::Constant { .. } => "constant",
                DataInputSpec::LabflowFile { .. } => "labflow_file",
                DataInputSpec::Environment { .. } => "environment",
                DataInputSpec::File { .. } => "file",
                DataInputSpec::Database { .. } => "database",
                DataInputSpec::Api { .. } => "api",
            },
            Self::Transform(spec) => match spec {
                TransformSpec::Map { .. } => "map",
                TransformSpec::Filter { .. } => "filter",
                TransformSpec::Extract { .. } => "extract",
                TransformSpec::Merge { .. } => "merge",
                TransformSpec::Flatten {} => "flatten",
                TransformSpec::Aggregate { .. } => "aggregate",
                TransformSpec::Format { .. } => "format",
            },
            Self::Calculate(spec) => match spec {
                CalculateSpec::Arithmetic { .. } => "arithmetic",
                CalculateSpec::Comparison { .. } => "comparison",
                CalculateSpec::Logical { .. } => "logical",
                CalculateSpec::Mathematical { .. } => "mathematical",
                CalculateSpec::Statistical { .. } => "statistical",
                CalculateSpec::Analysis { .. } => "analysis",
            },
            Self::Condition(spec) => match spec {
                ConditionSpec::If { .. } => "if",
                ConditionSpec::Switch { .. } => "switch",
                ConditionSpec::Filter { .. } => "filter",
            },
            Self::Output(spec) => match spec {
                OutputSpec::Return { .. } => "return",
                OutputSpec::Store { .. } => "store",
                OutputSpec::Send { .. } => "send",
                OutputSpec::Log { .. } => "log",
            },
        }
    }

    /// Cross-field checks serde cannot express
    fn check(&self, node: &NodeConfig) -> Result<(), ReasoningError> {
        let invalid = |message: String| ReasoningError::invalid_node(node.id(), message);

        match self {
            Self::DataInput(DataInputSpec::LabflowFile { file_id, .. }) => {
                if file_id_string(file_id).is_none() {
                    return Err(invalid("file_id must be a non-empty string or number".into()));
                }
            }
            Self::DataInput(DataInputSpec::Database { order_by, .. }) => {
                if let Some(order_by) = order_by {
                    parse_order_by(order_by).map_err(invalid)?;
                }
            }
            Self::Calculate(CalculateSpec::Arithmetic {
                operation,
                operands,
            }) => {
                if operands.is_empty() {
                    return Err(invalid("operands not specified".into()));
                }

                if operation.is_binary() && operands.len() < 2 {
                    return Err(invalid(format!(
                        "{:?} requires two operands",
                        operation
                    )));
                }

                if let Some(missing) = operands
                    .iter()
                    .find(|operand| !node.inputs().iter().any(|input| input == *operand))
                {
                    return Err(invalid(format!(
                        "operand '{}' is not one of the node inputs",
                        missing
                    )));
                }
            }
            Self::Calculate(CalculateSpec::Analysis {
                tool_id, operation, ..
            }) => {
                if tool_id.is_none() && operation.is_none() {
                    return Err(invalid("tool_id is required for analysis operation".into()));
                }
            }
            Self::Condition(ConditionSpec::Switch { variable, cases, .. }) => {
                if variable.is_empty() {
                    return Err(invalid("switch variable cannot be empty".into()));
                }
                if cases.is_empty() {
                    return Err(invalid("switch requires at least one case".into()));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// A node together with its compiled configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledNode {
    config: NodeConfig,
    kind: NodeKind,
}

impl CompiledNode {
    /// Validate the node's own fields and compile its config
    pub fn compile(config: NodeConfig) -> Result<Self, ReasoningError> {
        config.validate()?;
        let kind = NodeKind::compile(&config)?;

        Ok(Self { config, kind })
    }

    pub fn id(&self) -> &str {
        self.config.id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }
}

fn decode<T: DeserializeOwned>(
    node: &NodeConfig,
    tag: &str,
    default_tag: &str,
) -> Result<T, ReasoningError> {
    let mut map: Map<String, Value> = node.config().clone();

    if !map.contains_key(tag) {
        map.insert(tag.to_string(), Value::String(default_tag.to_string()));
    }

    serde_json::from_value(Value::Object(map)).map_err(|e| {
        ReasoningError::invalid_node(
            node.id(),
            format!("invalid {} config: {}", node.node_type(), e),
        )
    })
}

/// Render a file id given as a string or number
pub fn file_id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse `column [asc|desc]`
pub fn parse_order_by(order_by: &str) -> Result<(String, bool), String> {
    let mut parts = order_by.split_whitespace();
    let column = parts
        .next()
        .ok_or_else(|| "order_by cannot be empty".to_string())?;
    let descending = match parts.next().map(|d| d.to_ascii_lowercase()) {
        None => false,
        Some(d) if d == "asc" => false,
        Some(d) if d == "desc" => true,
        Some(d) => return Err(format!("invalid order_by direction '{}'", d)),
    };

    if parts.next().is_some() {
        return Err(format!("invalid order_by '{}'", order_by));
    }

    Ok((column.to_string(), descending))
}

fn default_file_mode() -> String {
    "rb".to_string()
}

fn default_limit() -> u32 {
    100
}

fn default_get() -> String {
    "GET".to_string()
}

fn default_post() -> String {
    "POST".to_string()
}

fn default_http_timeout() -> f64 {
    10.0
}

fn default_factor() -> Number {
    Number::from(1)
}

fn default_precision() -> usize {
    2
}

fn default_true_path() -> String {
    "true".to_string()
}

fn default_false_path() -> String {
    "false".to_string()
}

fn default_switch_path() -> String {
    "default".to_string()
}

fn default_annotation_source() -> String {
    "auto".to_string()
}

/// Where a data input node reads from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum DataInputSpec {
    /// Dot-path into the chain's initial input; defaults to the node name
    Global {
        #[serde(default)]
        key_path: Option<String>,
    },
    Constant {
        value: Value,
        #[serde(default)]
        data_type: ConstantType,
    },
    /// A file managed by LabFlow, resolved through the record and blob stores
    #[serde(alias = "labflowFile")]
    LabflowFile {
        file_id: Value,
        #[serde(default)]
        encoding: Option<String>,
    },
    Environment {
        env_var: String,
    },
    File {
        file_path: String,
        #[serde(default = "default_file_mode")]
        mode: String,
        #[serde(default)]
        encoding: Option<String>,
    },
    Database {
        table_name: String,
        #[serde(default)]
        select_columns: Vec<String>,
        #[serde(default)]
        filters: Map<String, Value>,
        #[serde(default)]
        order_by: Option<String>,
        #[serde(default = "default_limit")]
        limit: u32,
    },
    Api {
        url: String,
        #[serde(default = "default_get")]
        method: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        params: BTreeMap<String, Value>,
        #[serde(default)]
        json: Option<Value>,
        #[serde(default = "default_http_timeout")]
        timeout: f64,
        #[serde(default)]
        response: ResponseFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    List,
    Dict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
}

/// Reshaping of upstream data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transform_type", rename_all = "snake_case")]
pub enum TransformSpec {
    Map {
        operation: MapOperation,
        #[serde(default = "default_factor")]
        factor: Number,
    },
    /// Keep list elements passing `operator` against `threshold`; `condition`
    /// names the field compared when elements are objects
    Filter {
        operator: FilterOperator,
        threshold: Value,
        #[serde(default)]
        condition: Option<String>,
    },
    Extract {
        #[serde(default)]
        fields: Vec<String>,
    },
    /// Union of the named inputs, all inputs when `merge_keys` is absent
    Merge {
        #[serde(default)]
        merge_keys: Option<Vec<String>>,
    },
    Flatten {},
    Aggregate {
        #[serde(default)]
        aggregation: Aggregation,
    },
    Format {
        #[serde(default)]
        format: FormatKind,
        #[serde(default = "default_precision")]
        precision: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapOperation {
    Multiply,
    Uppercase,
    Lowercase,
    Square,
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Sum,
    Average,
    Min,
    Max,
    Count,
    Stdev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    #[default]
    String,
    Json,
    Csv,
    Percent,
}

/// Numeric, logical and analytical computations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation_type", rename_all = "snake_case")]
pub enum CalculateSpec {
    /// `operands` name node inputs
    Arithmetic {
        operation: ArithmeticOp,
        operands: Vec<String>,
    },
    /// `left` and `right` name node inputs or are literals
    Comparison {
        operation: ComparisonOp,
        left: Value,
        right: Value,
    },
    Logical {
        operation: LogicalOp,
        #[serde(default)]
        operands: Vec<Value>,
    },
    Mathematical {
        operation: MathOp,
        value: Value,
        #[serde(default)]
        base: Option<f64>,
    },
    Statistical {
        operation: StatOp,
        data: Value,
    },
    /// Delegates to a registered analysis tool
    Analysis {
        #[serde(default)]
        tool_id: Option<String>,
        #[serde(default)]
        operation: Option<String>,
        #[serde(default)]
        file_id: Option<Value>,
        #[serde(default)]
        file_id_key: Option<String>,
        #[serde(default)]
        parameters: Map<String, Value>,
        #[serde(default)]
        parameters_key: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

impl ArithmeticOp {
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Divide | Self::Modulo | Self::Power)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = "gt", alias = "greater_than")]
    Gt,
    #[serde(rename = "lt", alias = "less_than")]
    Lt,
    #[serde(rename = "gte", alias = "greater_equal")]
    Gte,
    #[serde(rename = "lte", alias = "less_equal")]
    Lte,
    #[serde(rename = "eq", alias = "equal")]
    Eq,
    #[serde(rename = "neq", alias = "not_equal")]
    Neq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathOp {
    Sqrt,
    Log,
    Exp,
    Sin,
    Cos,
    Tan,
    Abs,
    Ceil,
    Floor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatOp {
    Mean,
    Median,
    Mode,
    Stdev,
    Variance,
}

/// Branch evaluation; outputs are informational and do not prune the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition_type", rename_all = "snake_case")]
pub enum ConditionSpec {
    If {
        condition: Expression,
        #[serde(default = "default_true_path")]
        true_path: String,
        #[serde(default = "default_false_path")]
        false_path: String,
    },
    Switch {
        variable: String,
        cases: BTreeMap<String, String>,
        #[serde(default = "default_switch_path")]
        default_path: String,
    },
    Filter {
        condition: Expression,
    },
}

/// Final shaping or side effects of a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum OutputSpec {
    Return {
        #[serde(default)]
        output_format: ReturnFormat,
        #[serde(default)]
        fields: Vec<String>,
    },
    Store {
        #[serde(default)]
        store_target: StoreTarget,
        #[serde(default)]
        file_id: Option<Value>,
        #[serde(default)]
        file_id_key: Option<String>,
        #[serde(default)]
        content_key: Option<String>,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        data_key: Option<String>,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default = "default_annotation_source")]
        source: String,
    },
    Send {
        #[serde(default)]
        url: Option<String>,
        #[serde(default = "default_post")]
        method: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default = "default_http_timeout")]
        timeout: f64,
        #[serde(default)]
        payload: Option<Value>,
    },
    Log {
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnFormat {
    #[default]
    Raw,
    Selected,
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreTarget {
    #[default]
    Conclusion,
    Annotation,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(node_type: NodeType, config: Value) -> NodeConfig {
        NodeConfig::new("n", node_type).with_config(config)
    }

    #[test]
    fn test_default_sub_types() {
        let kind = NodeKind::compile(&node(NodeType::DataInput, json!({}))).unwrap();
        assert_eq!(
            kind,
            NodeKind::DataInput(DataInputSpec::Global { key_path: None })
        );

        let kind = NodeKind::compile(&node(
            NodeType::Output,
            json!({"description": "extra keys are ignored"}),
        ))
        .unwrap();
        assert_eq!(kind.variant_name(), "return");
    }

    #[test]
    fn test_constant_and_labflow_file() {
        let kind = NodeKind::compile(&node(
            NodeType::DataInput,
            json!({"source_type": "constant", "value": "3", "data_type": "integer"}),
        ))
        .unwrap();
        assert!(matches!(
            kind,
            NodeKind::DataInput(DataInputSpec::Constant {
                data_type: ConstantType::Integer,
                ..
            })
        ));

        let kind = NodeKind::compile(&node(
            NodeType::DataInput,
            json!({"source_type": "labflowFile", "file_id": 42}),
        ))
        .unwrap();
        assert_eq!(kind.variant_name(), "labflow_file");
    }

    #[test]
    fn test_missing_required_keys_are_rejected() {
        let cases = vec![
            (NodeType::DataInput, json!({"source_type": "constant"})),
            (NodeType::DataInput, json!({"source_type": "environment"})),
            (NodeType::DataInput, json!({"source_type": "database"})),
            (NodeType::DataInput, json!({"source_type": "api"})),
            (NodeType::Transform, json!({"transform_type": "map"})),
            (NodeType::Calculate, json!({"operation_type": "statistical", "operation": "mean"})),
            (NodeType::Condition, json!({"condition_type": "if"})),
            (NodeType::Condition, json!({"condition_type": "switch", "variable": "x", "cases": {}})),
        ];

        for (node_type, config) in cases {
            let result = NodeKind::compile(&node(node_type, config.clone()));
            assert!(
                matches!(result, Err(ReasoningError::InvalidNode { .. })),
                "expected rejection for {}",
                config
            );
        }
    }

    #[test]
    fn test_unknown_operations_are_rejected() {
        let result = NodeKind::compile(&node(
            NodeType::Transform,
            json!({"transform_type": "explode"}),
        ));
        assert!(result.is_err());

        let result = NodeKind::compile(&node(
            NodeType::Calculate,
            json!({"operation": "cube_root", "operands": ["a"]}),
        ));
        assert!(result.is_err());

        let result = NodeKind::compile(&node(
            NodeType::Output,
            json!({"output_type": "email"}),
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_arithmetic_operands_must_be_inputs() {
        let base = NodeConfig::new("sum", NodeType::Calculate)
            .with_inputs(["a", "b"])
            .with_config(json!({"operation": "add", "operands": ["a", "c"]}));
        assert!(NodeKind::compile(&base).is_err());

        let ok = NodeConfig::new("sum", NodeType::Calculate)
            .with_inputs(["a", "b"])
            .with_config(json!({"operation": "add", "operands": ["a", "b"]}));
        assert!(NodeKind::compile(&ok).is_ok());

        let unary_divide = NodeConfig::new("div", NodeType::Calculate)
            .with_inputs(["a"])
            .with_config(json!({"operation": "divide", "operands": ["a"]}));
        assert!(NodeKind::compile(&unary_divide).is_err());
    }

    #[test]
    fn test_comparison_aliases() {
        let kind = NodeKind::compile(&node(
            NodeType::Calculate,
            json!({
                "operation_type": "comparison",
                "operation": "greater_than",
                "left": "a",
                "right": 3
            }),
        ))
        .unwrap();

        assert!(matches!(
            kind,
            NodeKind::Calculate(CalculateSpec::Comparison {
                operation: ComparisonOp::Gt,
                ..
            })
        ));
    }

    #[test]
    fn test_condition_expression_is_parsed_at_compile_time() {
        let result = NodeKind::compile(&node(
            NodeType::Condition,
            json!({"condition": "exec('rm -rf /')"}),
        ));
        assert!(result.is_err());

        let kind = NodeKind::compile(&node(
            NodeType::Condition,
            json!({"condition": "score > 0.5", "true_path": "approve"}),
        ))
        .unwrap();
        match kind {
            NodeKind::Condition(ConditionSpec::If {
                true_path,
                false_path,
                ..
            }) => {
                assert_eq!(true_path, "approve");
                assert_eq!(false_path, "false");
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_parse_order_by() {
        assert_eq!(parse_order_by("created_at"), Ok(("created_at".into(), false)));
        assert_eq!(parse_order_by("created_at DESC"), Ok(("created_at".into(), true)));
        assert!(parse_order_by("created_at sideways").is_err());
        assert!(parse_order_by("a b c").is_err());
    }
}
