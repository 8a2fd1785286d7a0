//! Reasoning chain error types

use thiserror::Error;

/// Structural errors that reject a chain before any node executes
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReasoningError {
    #[error("Chain has no nodes")]
    EmptyChain,

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("Node '{node}' references unknown input '{input}'")]
    UnknownInput { node: String, input: String },

    #[error("Cycle detected: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("Invalid node '{node}': {message}")]
    InvalidNode { node: String, message: String },

    #[error("Invalid chain id: {0}")]
    InvalidChainId(String),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),
}

impl ReasoningError {
    pub fn duplicate_node_id(id: impl Into<String>) -> Self {
        Self::DuplicateNodeId(id.into())
    }

    pub fn unknown_input(node: impl Into<String>, input: impl Into<String>) -> Self {
        Self::UnknownInput {
            node: node.into(),
            input: input.into(),
        }
    }

    pub fn cycle(path: Vec<String>) -> Self {
        Self::CycleDetected { path }
    }

    pub fn invalid_node(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidNode {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn invalid_chain_id(message: impl Into<String>) -> Self {
        Self::InvalidChainId(message.into())
    }

    pub fn invalid_chain(message: impl Into<String>) -> Self {
        Self::InvalidChain(message.into())
    }
}
