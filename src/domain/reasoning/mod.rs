//! Reasoning chain domain: nodes, chains, validation and results

pub mod chain;
pub mod collaborators;
pub mod dag;
pub mod error;
pub mod execution;
pub mod expression;
pub mod node;
pub mod node_types;
pub mod result;
pub mod value;

pub use chain::{validate_chain_id, Chain, ChainId};
pub use collaborators::{
    AnalysisRunner, BlobStore, Collaborators, ExecutionSink, HttpClient, HttpRequest,
    HttpResponse, RecordStore, SelectQuery, SessionConcurrency,
};
pub use dag::{topological_order, validate_dag, DependencyGraph};
pub use error::ReasoningError;
pub use execution::{ExecutionQuery, ExecutionRecord, ExecutionSummary};
pub use expression::{Expression, ExpressionError};
pub use node::{NodeConfig, NodeInputs, NodeType, DEFAULT_NODE_TIMEOUT_SECS};
pub use node_types::{
    CalculateSpec, CompiledNode, ConditionSpec, DataInputSpec, NodeKind, OutputSpec,
    TransformSpec,
};
pub use result::{ChainError, ChainRunResult, ChainStatus, NodeResult, NodeStatus};
