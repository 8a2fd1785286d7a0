//! Node configuration and node inputs

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ReasoningError;

/// Default per-node timeout in seconds
pub const DEFAULT_NODE_TIMEOUT_SECS: f64 = 300.0;

/// Kind of processing a node performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    DataInput,
    Transform,
    Calculate,
    Condition,
    Output,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataInput => "data_input",
            Self::Transform => "transform",
            Self::Calculate => "calculate",
            Self::Condition => "condition",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_timeout() -> f64 {
    DEFAULT_NODE_TIMEOUT_SECS
}

fn default_backoff() -> f64 {
    1.0
}

/// A single node of a reasoning chain
///
/// `config` is interpreted by the handler for `node_type` and is compiled into a
/// typed [`NodeKind`](super::node_types::NodeKind) before the chain runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    #[serde(alias = "node_id")]
    id: String,

    #[serde(rename = "type", alias = "node_type")]
    node_type: NodeType,

    #[serde(default)]
    name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,

    #[serde(default)]
    config: Map<String, Value>,

    #[serde(default)]
    inputs: Vec<String>,

    /// Seconds allowed for a single attempt
    #[serde(default = "default_timeout")]
    timeout: f64,

    #[serde(default)]
    retry_count: u32,

    #[serde(default)]
    retry_delay_seconds: f64,

    #[serde(default = "default_backoff")]
    retry_backoff_factor: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    cache_key: Option<String>,
}

impl NodeConfig {
    /// Create a node whose display name defaults to its id
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        let id = id.into();

        Self {
            name: id.clone(),
            id,
            node_type,
            description: None,
            config: Map::new(),
            inputs: Vec::new(),
            timeout: DEFAULT_NODE_TIMEOUT_SECS,
            retry_count: 0,
            retry_delay_seconds: 0.0,
            retry_backoff_factor: 1.0,
            cache_key: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replace the whole config map; non-object values yield an empty map
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self
    }

    pub fn with_config_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout_secs(mut self, secs: f64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn with_retry(mut self, retry_count: u32, delay_secs: f64, backoff_factor: f64) -> Self {
        self.retry_count = retry_count;
        self.retry_delay_seconds = delay_secs;
        self.retry_backoff_factor = backoff_factor;
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn timeout_secs(&self) -> f64 {
        self.timeout
    }

    /// Per-attempt timeout, falling back to the default for unrepresentable values
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_NODE_TIMEOUT_SECS))
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn retry_delay_secs(&self) -> f64 {
        self.retry_delay_seconds
    }

    pub fn retry_backoff_factor(&self) -> f64 {
        self.retry_backoff_factor
    }

    /// Delay before the retry that follows the given 0-indexed failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.retry_delay_seconds * self.retry_backoff_factor.powi(attempt as i32);
        Duration::try_from_secs_f64(delay).unwrap_or(Duration::ZERO)
    }

    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    /// Check the node-level fields that do not depend on the rest of the chain
    pub fn validate(&self) -> Result<(), ReasoningError> {
        if self.id.trim().is_empty() {
            return Err(ReasoningError::invalid_node(&self.id, "Node id cannot be empty"));
        }

        if self.name.trim().is_empty() {
            return Err(ReasoningError::invalid_node(&self.id, "Node name cannot be empty"));
        }

        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(ReasoningError::invalid_node(
                &self.id,
                format!("timeout must be positive, got {}", self.timeout),
            ));
        }

        if !self.retry_delay_seconds.is_finite() || self.retry_delay_seconds < 0.0 {
            return Err(ReasoningError::invalid_node(
                &self.id,
                format!(
                    "retry_delay_seconds must not be negative, got {}",
                    self.retry_delay_seconds
                ),
            ));
        }

        if !self.retry_backoff_factor.is_finite() || self.retry_backoff_factor < 1.0 {
            return Err(ReasoningError::invalid_node(
                &self.id,
                format!(
                    "retry_backoff_factor must be at least 1, got {}",
                    self.retry_backoff_factor
                ),
            ));
        }

        if self.cache_key.as_deref().is_some_and(|k| k.is_empty()) {
            return Err(ReasoningError::invalid_node(&self.id, "cache_key cannot be empty"));
        }

        Ok(())
    }
}

/// Outputs of a node's declared inputs, keyed by node id in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInputs {
    entries: Vec<(String, Value)>,
}

impl NodeInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the output recorded for `id`
    pub fn insert(&mut self, id: impl Into<String>, value: Value) {
        let id = id.into();

        match self.entries.iter_mut().find(|(key, _)| *key == id) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((id, value)),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn first(&self) -> Option<&Value> {
        self.entries.first().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for NodeInputs {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        let mut inputs = Self::new();

        for (key, value) in iter {
            inputs.insert(key, value);
        }

        inputs
    }
}
