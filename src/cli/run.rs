//! Run command - executes a chain document and prints the envelope

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{load_config, read_chain};
use crate::config::AppConfig;
use crate::domain::reasoning::{Collaborators, ExecutionSink, RecordStore};
use crate::infrastructure::analysis::{AnalysisToolRegistry, CsvStatsTool};
use crate::infrastructure::blob::LocalBlobStore;
use crate::infrastructure::database::PgRecordStore;
use crate::infrastructure::execution::InMemoryExecutionStore;
use crate::infrastructure::http::ReqwestHttpClient;
use crate::infrastructure::reasoning::{ReasoningEngine, RunOptions};

/// Arguments for the run command
#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Chain document (a chain object or a list of nodes)
    #[arg(long)]
    pub chain: PathBuf,

    /// JSON file holding the global input
    #[arg(long, conflicts_with = "input_json")]
    pub input: Option<PathBuf>,

    /// Global input given inline as JSON
    #[arg(long)]
    pub input_json: Option<String>,

    /// Execute independent nodes concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Upper bound of concurrently executing nodes
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Chain timeout in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Skip writing the execution record
    #[arg(long)]
    pub no_persist: bool,
}

/// Run a chain once
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config();

    let document = read_chain(&args.chain)?;
    let input = read_input(&args)?;
    let engine = build_engine(&config, args.no_persist).await?;

    let mut options = RunOptions::new();
    if args.parallel {
        options = options.parallel(true);
    }
    if let Some(workers) = args.max_workers {
        options = options.with_max_workers(workers);
    }
    if let Some(secs) = args.timeout {
        let timeout = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("Invalid timeout: {}", secs))?;
        options = options.with_timeout(timeout);
    }
    if let Some(chain) = document.chain() {
        options = options.with_chain_id(chain.id().clone());
    }

    let cancel = CancellationToken::new();
    options = options.with_cancel(cancel.clone());

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling chain");
            interrupt.cancel();
        }
    });

    let result = engine.run_chain(document.nodes(), input, options).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.is_success() {
        anyhow::bail!("Chain finished with status {}", result.status.as_str());
    }

    Ok(())
}

fn read_input(args: &RunArgs) -> anyhow::Result<Value> {
    if let Some(raw) = &args.input_json {
        return serde_json::from_str(raw).context("Failed to parse --input-json");
    }

    let Some(path) = &args.input else {
        return Ok(Value::Object(Default::default()));
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse input file {}", path.display()))
}

/// Wire the engine to the configured collaborators
///
/// Without a database, executions are recorded in memory for the lifetime
/// of the process.
pub async fn build_engine(config: &AppConfig, no_persist: bool) -> anyhow::Result<ReasoningEngine> {
    let blobs = Arc::new(LocalBlobStore::new(&config.storage.root));
    let http = ReqwestHttpClient::with_timeout(Duration::from_secs(config.http.timeout_secs))?;

    let mut collaborators = Collaborators::new()
        .with_blob_store(blobs.clone())
        .with_http_client(Arc::new(http));
    let mut registry = AnalysisToolRegistry::new(blobs);

    let sink: Arc<dyn ExecutionSink> = match &config.database {
        Some(database) => {
            let store = Arc::new(PgRecordStore::connect(&database.postgres()).await?);
            store.ensure_tables().await?;
            info!("Connected to record store");

            let records: Arc<dyn RecordStore> = store.clone();
            collaborators = collaborators.with_record_store(records.clone());
            registry = registry.with_record_store(records);
            store
        }
        None => Arc::new(InMemoryExecutionStore::new()),
    };

    registry.register(Arc::new(CsvStatsTool))?;

    let mut settings = config.engine.settings();
    if no_persist {
        settings.persist_executions = false;
    }

    Ok(ReasoningEngine::new(collaborators.with_analysis(Arc::new(registry)))
        .with_sink(sink)
        .with_settings(settings))
}
