//! Built-in node handlers, one module per node type

pub mod calculate;
pub mod condition;
pub mod data_input;
pub mod output;
pub mod transform;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::reasoning::{
    value::lookup_path, Collaborators, CompiledNode, ExpressionError, NodeInputs,
};
use crate::domain::DomainError;

/// Node-level failure, recorded on the node's result
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("No {0} configured")]
    MissingCollaborator(&'static str),

    #[error("Condition evaluation failed: {0}")]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Cancelled")]
    Cancelled,
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

/// Everything a handler may read while executing one attempt
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub node: Arc<CompiledNode>,
    pub inputs: Arc<NodeInputs>,
    pub global_input: Arc<Value>,
    pub collaborators: Collaborators,
    pub cancel: CancellationToken,
}

impl HandlerContext {
    pub fn new(
        node: Arc<CompiledNode>,
        inputs: Arc<NodeInputs>,
        global_input: Arc<Value>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            node,
            inputs,
            global_input,
            collaborators,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn node_id(&self) -> &str {
        self.node.id()
    }

    /// Look up a key among the node inputs first, then in the global input
    pub fn input_or_global(&self, key: &str) -> Option<Value> {
        self.inputs
            .get(key)
            .or_else(|| self.global_input.get(key))
            .filter(|value| !value.is_null())
            .cloned()
    }

    /// Resolve a variable path whose head is an input id or a global key
    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        let root = self.inputs.get(head).or_else(|| self.global_input.get(head))?;

        match rest {
            Some(rest) => lookup_path(root, rest).cloned(),
            None => Some(root.clone()),
        }
    }
}
