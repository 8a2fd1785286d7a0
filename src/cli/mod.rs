//! CLI module for the LabFlow reasoning engine
//!
//! - `run`: execute a chain document against an input document
//! - `validate`: check a chain document and print its execution order

pub mod run;
pub mod validate;

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::config::AppConfig;
use crate::domain::reasoning::{Chain, NodeConfig};
use crate::infrastructure::logging;

/// LabFlow reasoning - run DAG reasoning chains over lab data
#[derive(Parser)]
#[command(name = "labflow-reasoning")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Execute a chain and print the result envelope as JSON
    Run(run::RunArgs),

    /// Validate a chain and print its execution order
    Validate(validate::ValidateArgs),
}

/// A chain file holds either a full chain or a bare list of nodes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ChainDocument {
    Chain(Chain),
    Nodes(Vec<NodeConfig>),
}

impl ChainDocument {
    pub fn nodes(&self) -> &[NodeConfig] {
        match self {
            Self::Chain(chain) => chain.nodes(),
            Self::Nodes(nodes) => nodes,
        }
    }

    pub fn chain(&self) -> Option<&Chain> {
        match self {
            Self::Chain(chain) => Some(chain),
            Self::Nodes(_) => None,
        }
    }
}

pub(crate) fn read_chain(path: &Path) -> anyhow::Result<ChainDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chain file {}", path.display()))?;

    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse chain file {}", path.display()))
}

pub(crate) fn load_config() -> AppConfig {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging);
    config
}
