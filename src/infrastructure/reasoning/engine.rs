//! Reasoning engine: validates, schedules and records chain runs

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::cache::ResultCache;
use super::executor::{BuiltinHandler, NodeExecutor, NodeHandler};
use super::retry::AttemptMode;
use super::scheduler::{Halt, ScheduleOutcome, Scheduler};
use crate::domain::reasoning::{
    validate_dag, Chain, ChainError, ChainId, ChainRunResult, ChainStatus, Collaborators,
    CompiledNode, ExecutionRecord, ExecutionSink, NodeConfig, NodeStatus, ReasoningError,
    SessionConcurrency,
};
use crate::infrastructure::metrics;

/// Upper bound of the default worker count
pub const MAX_DEFAULT_WORKERS: usize = 32;

/// `min(32, available CPUs + 4)`
pub fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    (cpus + 4).min(MAX_DEFAULT_WORKERS)
}

/// Engine-wide defaults, overridable per run through [`RunOptions`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub parallel: bool,
    /// `None` uses [`default_worker_count`]
    pub max_workers: Option<usize>,
    /// Wall-clock budget of a whole run
    pub chain_timeout: Option<Duration>,
    /// Append an execution record to the sink after each run
    pub persist_executions: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            parallel: false,
            max_workers: None,
            chain_timeout: None,
            persist_executions: true,
        }
    }
}

/// Per-run overrides
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub parallel: Option<bool>,
    pub max_workers: Option<usize>,
    pub timeout: Option<Duration>,
    /// Tags the execution record
    pub chain_id: Option<ChainId>,
    /// Cancelling halts dispatch and cancels attempts in flight
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_chain_id(mut self, chain_id: ChainId) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Runs reasoning chains against a fixed set of collaborators
///
/// The result cache lives as long as the engine and is shared by all runs.
pub struct ReasoningEngine {
    collaborators: Collaborators,
    handler: Arc<dyn NodeHandler>,
    cache: ResultCache,
    sink: Option<Arc<dyn ExecutionSink>>,
    settings: EngineSettings,
}

impl fmt::Debug for ReasoningEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReasoningEngine")
            .field("collaborators", &self.collaborators)
            .field("sink", &self.sink.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ReasoningEngine {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            handler: Arc::new(BuiltinHandler),
            cache: ResultCache::new(),
            sink: None,
            settings: EngineSettings::default(),
        }
    }

    /// Replace the built-in node handlers
    pub fn with_handler(mut self, handler: Arc<dyn NodeHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ExecutionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Check structure and node configs without running anything
    ///
    /// Returns the node ids in execution order.
    pub fn validate(&self, nodes: &[NodeConfig]) -> Result<Vec<String>, ReasoningError> {
        compile(nodes)?;
        crate::domain::reasoning::topological_order(nodes)
    }

    /// Run a stored chain, tagging the execution record with its id
    pub async fn run(&self, chain: &Chain, input: Value) -> ChainRunResult {
        if chain.name().trim().is_empty() {
            return ChainRunResult::rejected(
                ReasoningError::invalid_chain("Chain name cannot be empty").to_string(),
                0,
            );
        }

        let options = RunOptions::new().with_chain_id(chain.id().clone());
        self.run_chain(chain.nodes(), input, options).await
    }

    /// Validate and execute `nodes` with `input` as the global input
    ///
    /// Never fails: structural errors produce a failed envelope without node
    /// results, node failures are reported per node.
    pub async fn run_chain(
        &self,
        nodes: &[NodeConfig],
        input: Value,
        options: RunOptions,
    ) -> ChainRunResult {
        let started = Instant::now();
        let started_at = Utc::now();

        let mut parallel = options.parallel.unwrap_or(self.settings.parallel);
        let workers = options
            .max_workers
            .or(self.settings.max_workers)
            .unwrap_or_else(default_worker_count);
        let timeout = options.timeout.or(self.settings.chain_timeout);
        let cancel = options.cancel.clone().unwrap_or_default();

        let mode = match self.collaborators.session_concurrency() {
            SessionConcurrency::Shared => {
                if parallel {
                    warn!("Parallel execution disabled, a collaborator holds a shared session");
                    parallel = false;
                }
                AttemptMode::Inline
            }
            SessionConcurrency::PerTask => AttemptMode::Isolated,
        };

        info!(
            nodes = nodes.len(),
            mode = metrics::mode_label(parallel),
            chain_id = ?options.chain_id.as_ref().map(ChainId::as_str),
            "Running reasoning chain"
        );

        let compiled = match compile(nodes) {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(error = %e, "Reasoning chain rejected");

                let run = ChainRunResult::rejected(e.to_string(), elapsed_ms(started));
                return self
                    .finish(run, options.chain_id, input, started_at, started, parallel)
                    .await;
            }
        };

        let input = Arc::new(input);
        let executor = NodeExecutor::new(
            self.handler.clone(),
            self.collaborators.clone(),
            self.cache.clone(),
        )
        .with_mode(mode);

        let scheduled = async {
            let scheduler = Scheduler::new(Arc::new(executor), compiled, input.clone())?
                .with_deadline(timeout.map(|t| started + t))
                .with_cancel(cancel.clone());

            if parallel {
                scheduler.run_parallel(workers).await
            } else {
                scheduler.run_sequential().await
            }
        };

        let mut run = match AssertUnwindSafe(scheduled).catch_unwind().await {
            Ok(Ok(outcome)) => envelope(outcome, timeout),
            Ok(Err(e)) => ChainRunResult::rejected(e.to_string(), 0),
            Err(_) => {
                error!("Reasoning chain scheduler panicked");
                ChainRunResult::rejected("Chain execution panicked", 0)
            }
        };
        run.duration_ms = elapsed_ms(started);

        let input = Arc::try_unwrap(input).unwrap_or_else(|shared| (*shared).clone());
        self.finish(run, options.chain_id, input, started_at, started, parallel)
            .await
    }

    async fn finish(
        &self,
        mut run: ChainRunResult,
        chain_id: Option<ChainId>,
        input: Value,
        started_at: chrono::DateTime<Utc>,
        started: Instant,
        parallel: bool,
    ) -> ChainRunResult {
        if let Some(sink) = self.sink.as_ref().filter(|_| self.settings.persist_executions) {
            let record = ExecutionRecord::from_run(chain_id, input, &run, started_at);

            match sink.append(record).await {
                Ok(id) => run.execution_id = Some(id),
                Err(e) => error!(error = %e, "Failed to store reasoning execution"),
            }
        }

        info!(
            status = %run.status.as_str(),
            duration_ms = run.duration_ms,
            completed = run.count(NodeStatus::Completed),
            failed = run.count(NodeStatus::Failed),
            skipped = run.count(NodeStatus::Skipped),
            timed_out = run.timed_out,
            "Reasoning chain finished"
        );

        metrics::record_chain_execution(run.status, parallel, started.elapsed());

        run
    }
}

fn compile(nodes: &[NodeConfig]) -> Result<Vec<Arc<CompiledNode>>, ReasoningError> {
    validate_dag(nodes)?;

    nodes
        .iter()
        .map(|node| CompiledNode::compile(node.clone()).map(Arc::new))
        .collect()
}

/// Fold scheduled node results into the run envelope
fn envelope(outcome: ScheduleOutcome, timeout: Option<Duration>) -> ChainRunResult {
    let ScheduleOutcome {
        results,
        execution_order,
        halted,
    } = outcome;

    let mut errors: Vec<ChainError> = execution_order
        .iter()
        .filter_map(|id| results.get(id))
        .filter(|result| result.is_failed())
        .map(|result| {
            ChainError::node(
                result.node_id.clone(),
                result.error.clone().unwrap_or_default(),
            )
        })
        .collect();

    match halted {
        Some(Halt::TimedOut) => {
            let secs = timeout.map(|t| t.as_secs_f64()).unwrap_or_default();
            errors.push(ChainError::chain(format!(
                "Chain execution timeout after {} seconds",
                secs
            )));
        }
        Some(Halt::Cancelled) => errors.push(ChainError::chain("Chain execution cancelled")),
        None => {}
    }

    let status = if errors.is_empty() && results.values().all(|r| !r.is_failed()) {
        ChainStatus::Completed
    } else {
        ChainStatus::Failed
    };

    ChainRunResult {
        status,
        results,
        errors,
        execution_order,
        duration_ms: 0,
        timed_out: halted == Some(Halt::TimedOut),
        execution_id: None,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::domain::reasoning::collaborators::{MockExecutionSink, MockRecordStore};
    use crate::domain::reasoning::NodeType;
    use crate::domain::DomainError;

    fn constant(id: &str, value: Value) -> NodeConfig {
        NodeConfig::new(id, NodeType::DataInput)
            .with_config(json!({"source_type": "constant", "value": value, "data_type": "integer"}))
    }

    fn add_chain() -> Vec<NodeConfig> {
        vec![
            constant("a", json!(2)),
            constant("b", json!(3)),
            NodeConfig::new("add", NodeType::Calculate)
                .with_inputs(["a", "b"])
                .with_config(json!({"operation": "add", "operands": ["a", "b"]})),
            NodeConfig::new("out", NodeType::Output).with_input("add"),
        ]
    }

    #[tokio::test]
    async fn test_run_chain_completes() {
        let engine = ReasoningEngine::new(Collaborators::new());
        let run = engine.run_chain(&add_chain(), json!({}), RunOptions::new()).await;

        assert!(run.is_success());
        assert_eq!(run.output("add"), Some(&json!(5)));
        assert_eq!(run.output("out"), Some(&json!({"add": 5})));
        assert_eq!(run.execution_order, vec!["a", "b", "add", "out"]);
        assert!(run.errors.is_empty());
        assert!(run.execution_id.is_none());
    }

    #[tokio::test]
    async fn test_rejected_chain_runs_nothing() {
        let engine = ReasoningEngine::new(Collaborators::new());
        let nodes = vec![
            NodeConfig::new("a", NodeType::Transform).with_input("b"),
            NodeConfig::new("b", NodeType::Transform).with_input("a"),
        ];

        let run = engine.run_chain(&nodes, json!({}), RunOptions::new()).await;

        assert_eq!(run.status, ChainStatus::Failed);
        assert!(run.results.is_empty());
        assert_eq!(run.errors.len(), 1);
        assert!(run.errors[0].error.starts_with("Cycle detected"));
        assert!(run.errors[0].node_id.is_none());
    }

    #[tokio::test]
    async fn test_invalid_node_config_is_fatal() {
        let engine = ReasoningEngine::new(Collaborators::new());
        let nodes = vec![NodeConfig::new("calc", NodeType::Calculate)
            .with_config(json!({"operation_type": "astrology"}))];

        let run = engine.run_chain(&nodes, json!({}), RunOptions::new()).await;

        assert!(!run.is_success());
        assert!(run.results.is_empty());
        assert!(engine.validate(&nodes).is_err());
    }

    #[tokio::test]
    async fn test_failed_node_is_reported() {
        let engine = ReasoningEngine::new(Collaborators::new());
        let nodes = vec![
            constant("a", json!(4)),
            constant("zero", json!(0)),
            NodeConfig::new("div", NodeType::Calculate)
                .with_inputs(["a", "zero"])
                .with_config(json!({"operation": "divide", "operands": ["a", "zero"]})),
            NodeConfig::new("out", NodeType::Output).with_input("div"),
        ];

        let run = engine.run_chain(&nodes, json!({}), RunOptions::new()).await;

        assert_eq!(run.status, ChainStatus::Failed);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].node_id.as_deref(), Some("div"));
        assert_eq!(run.errors[0].error, "Division by zero");
        assert_eq!(run.result("out").unwrap().status, NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_shared_session_forces_sequential() {
        let mut store = MockRecordStore::new();
        store
            .expect_concurrency()
            .return_const(SessionConcurrency::Shared);

        let engine = ReasoningEngine::new(Collaborators::new().with_record_store(Arc::new(store)));
        let run = engine
            .run_chain(&add_chain(), json!({}), RunOptions::new().parallel(true))
            .await;

        assert!(run.is_success());
        assert_eq!(run.output("add"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn test_execution_is_persisted() {
        let id = uuid::Uuid::new_v4();
        let mut sink = MockExecutionSink::new();
        sink.expect_append()
            .withf(|record| {
                record.chain_id.as_ref().map(ChainId::as_str) == Some("ph-check")
                    && record.status == ChainStatus::Completed
                    && record.input == json!({"sample": 1})
            })
            .times(1)
            .returning(move |_| Ok(id));

        let engine = ReasoningEngine::new(Collaborators::new()).with_sink(Arc::new(sink));
        let options = RunOptions::new().with_chain_id(ChainId::new("ph-check").unwrap());
        let run = engine.run_chain(&add_chain(), json!({"sample": 1}), options).await;

        assert_eq!(run.execution_id, Some(id));
    }

    #[tokio::test]
    async fn test_sink_failure_is_not_propagated() {
        let mut sink = MockExecutionSink::new();
        sink.expect_append()
            .returning(|_| Err(DomainError::storage("disk full")));

        let engine = ReasoningEngine::new(Collaborators::new()).with_sink(Arc::new(sink));
        let run = engine.run_chain(&add_chain(), json!({}), RunOptions::new()).await;

        assert!(run.is_success());
        assert!(run.execution_id.is_none());
    }

    #[tokio::test]
    async fn test_persistence_can_be_disabled() {
        let mut sink = MockExecutionSink::new();
        sink.expect_append().times(0);

        let engine = ReasoningEngine::new(Collaborators::new())
            .with_sink(Arc::new(sink))
            .with_settings(EngineSettings {
                persist_executions: false,
                ..EngineSettings::default()
            });

        engine.run_chain(&add_chain(), json!({}), RunOptions::new()).await;
    }

    #[tokio::test]
    async fn test_run_stored_chain() {
        let chain = Chain::new(ChainId::new("sum").unwrap(), "Sum").with_nodes(add_chain());
        let engine = ReasoningEngine::new(Collaborators::new());

        let run = engine.run(&chain, json!({})).await;
        assert!(run.is_success());
    }

    #[test]
    fn test_default_worker_count_bounds() {
        let workers = default_worker_count();
        assert!(workers >= 5);
        assert!(workers <= MAX_DEFAULT_WORKERS);
    }

    #[test]
    fn test_validate_returns_order() {
        let engine = ReasoningEngine::new(Collaborators::new());
        assert_eq!(
            engine.validate(&add_chain()).unwrap(),
            vec!["a", "b", "add", "out"]
        );
    }
}
