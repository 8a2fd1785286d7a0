//! Validate command - checks a chain document without running it

use std::path::PathBuf;

use clap::Args;

use super::{load_config, read_chain};
use crate::domain::reasoning::Collaborators;
use crate::infrastructure::reasoning::ReasoningEngine;

/// Arguments for the validate command
#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Chain document (a chain object or a list of nodes)
    #[arg(long)]
    pub chain: PathBuf,
}

pub async fn run(args: ValidateArgs) -> anyhow::Result<()> {
    load_config();

    let document = read_chain(&args.chain)?;
    if let Some(chain) = document.chain() {
        chain.validate()?;
    }

    let order = ReasoningEngine::new(Collaborators::new()).validate(document.nodes())?;
    println!("{}", serde_json::to_string_pretty(&order)?);

    Ok(())
}
