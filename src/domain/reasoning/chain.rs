//! Reasoning chain entity

use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::dag::validate_dag;
use super::error::ReasoningError;
use super::node::NodeConfig;
use super::node_types::NodeKind;

/// Maximum length for chain IDs
pub const MAX_ID_LENGTH: usize = 64;

/// Alphanumeric with hyphens or underscores, starting and ending alphanumeric
static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*[a-zA-Z0-9]$|^[a-zA-Z0-9]$").expect("Invalid regex")
});

/// Validated chain identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Result<Self, ReasoningError> {
        let id = id.into();
        validate_chain_id(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChainId {
    type Error = ReasoningError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChainId> for String {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ChainId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn validate_chain_id(id: &str) -> Result<(), ReasoningError> {
    if id.is_empty() {
        return Err(ReasoningError::invalid_chain_id("Chain ID cannot be empty"));
    }

    if id.len() > MAX_ID_LENGTH {
        return Err(ReasoningError::invalid_chain_id(format!(
            "Chain ID exceeds maximum length of {} characters",
            MAX_ID_LENGTH
        )));
    }

    if !ID_PATTERN.is_match(id) {
        return Err(ReasoningError::invalid_chain_id(format!(
            "Invalid chain ID '{}': must be alphanumeric with hyphens or underscores",
            id
        )));
    }

    Ok(())
}

fn default_version() -> u32 {
    1
}

/// A named, versioned reasoning chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    id: ChainId,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default = "default_version")]
    version: u32,
    nodes: Vec<NodeConfig>,
    #[serde(default)]
    is_template: bool,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

impl Chain {
    pub fn new(id: ChainId, name: impl Into<String>) -> Self {
        let now = Utc::now();

        Self {
            id,
            name: name.into(),
            description: None,
            version: 1,
            nodes: Vec::new(),
            is_template: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<NodeConfig>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn as_template(mut self) -> Self {
        self.is_template = true;
        self
    }

    pub fn id(&self) -> &ChainId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn nodes(&self) -> &[NodeConfig] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    pub fn is_template(&self) -> bool {
        self.is_template
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
        self.touch();
    }

    /// Replace the node set, bumping the version
    pub fn set_nodes(&mut self, nodes: Vec<NodeConfig>) {
        self.nodes = nodes;
        self.increment_version();
    }

    /// Full structural validation: graph shape, node fields and node configs
    pub fn validate(&self) -> Result<(), ReasoningError> {
        if self.name.trim().is_empty() {
            return Err(ReasoningError::invalid_chain("Chain name cannot be empty"));
        }

        validate_dag(&self.nodes)?;

        for node in &self.nodes {
            node.validate()?;
            NodeKind::compile(node)?;
        }

        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn increment_version(&mut self) {
        self.version += 1;
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reasoning::node::NodeType;
    use serde_json::json;

    #[test]
    fn test_valid_chain_ids() {
        assert!(ChainId::new("ph-analysis").is_ok());
        assert!(ChainId::new("chain_42").is_ok());
        assert!(ChainId::new("a").is_ok());
    }

    #[test]
    fn test_invalid_chain_ids() {
        assert!(ChainId::new("").is_err());
        assert!(ChainId::new("-leading").is_err());
        assert!(ChainId::new("has space").is_err());
        assert!(ChainId::new("a".repeat(MAX_ID_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_set_nodes_bumps_version() {
        let id = ChainId::new("c1").unwrap();
        let mut chain = Chain::new(id, "Chain");
        let created = chain.updated_at();
        assert_eq!(chain.version(), 1);

        chain.set_nodes(vec![NodeConfig::new("a", NodeType::DataInput)]);

        assert_eq!(chain.version(), 2);
        assert!(chain.updated_at() >= created);
        assert!(chain.node("a").is_some());
    }

    #[test]
    fn test_validate_compiles_nodes() {
        let id = ChainId::new("c1").unwrap();
        let chain = Chain::new(id.clone(), "Chain").with_node(
            NodeConfig::new("t", NodeType::Transform)
                .with_config(json!({"transform_type": "unknown"})),
        );
        assert!(matches!(
            chain.validate(),
            Err(ReasoningError::InvalidNode { .. })
        ));

        let chain = Chain::new(id, "Chain").with_node(
            NodeConfig::new("c", NodeType::DataInput)
                .with_config(json!({"source_type": "constant", "value": 1})),
        );
        assert!(chain.validate().is_ok());
    }

    #[test]
    fn test_deserialize_chain_document() {
        let chain: Chain = serde_json::from_value(json!({
            "id": "ph-check",
            "name": "pH check",
            "nodes": [
                {"id": "ph", "type": "data_input", "name": "ph"},
                {"id": "ok", "type": "condition", "name": "ok", "inputs": ["ph"],
                 "config": {"condition": "ph > 7"}}
            ]
        }))
        .unwrap();

        assert_eq!(chain.id().as_str(), "ph-check");
        assert_eq!(chain.version(), 1);
        assert_eq!(chain.nodes().len(), 2);
        assert!(chain.validate().is_ok());
    }
}
