use clap::Parser;
use labflow_reasoning::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => cli::run::run(args).await,
        Command::Validate(args) => cli::validate::run(args).await,
    }
}
