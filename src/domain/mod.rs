//! Domain layer - Reasoning chain model and collaborator contracts

pub mod error;
pub mod reasoning;

pub use error::DomainError;
pub use reasoning::{
    Chain, ChainId, ChainRunResult, ChainStatus, NodeConfig, NodeResult, NodeStatus, NodeType,
    ReasoningError,
};
