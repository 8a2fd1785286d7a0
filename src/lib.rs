//! LabFlow reasoning engine
//!
//! Executes reasoning chains, directed acyclic graphs of typed nodes, over
//! lab data:
//! - data input from static values, the record store, uploaded files and HTTP APIs
//! - transforms, arithmetic and statistics, analysis tools and conditions
//! - outputs returned to the caller, stored as conclusions or annotations, or sent out
//! - sequential or bounded-parallel scheduling with per-node retry, timeout and caching

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::reasoning::{Chain, ChainRunResult, Collaborators, NodeConfig};
pub use infrastructure::reasoning::{ReasoningEngine, RunOptions};
