//! Dependency-ordered dispatch of chain nodes, sequential or on a worker pool

use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::executor::NodeExecutor;
use crate::domain::reasoning::{
    CompiledNode, DependencyGraph, NodeConfig, NodeInputs, NodeResult, ReasoningError,
};

/// Why a run stopped dispatching before every node ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    TimedOut,
    Cancelled,
}

impl Halt {
    fn skip_reason(&self) -> &'static str {
        match self {
            Self::TimedOut => "Skipped: chain execution timeout",
            Self::Cancelled => "Skipped: chain execution cancelled",
        }
    }
}

/// Node results of one scheduled run
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    pub results: BTreeMap<String, NodeResult>,
    /// Planned order, every node after all of its inputs
    pub execution_order: Vec<String>,
    pub halted: Option<Halt>,
}

/// Dispatches the nodes of one validated chain
pub struct Scheduler {
    executor: Arc<NodeExecutor>,
    nodes: Vec<Arc<CompiledNode>>,
    graph: DependencyGraph,
    global_input: Arc<Value>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        executor: Arc<NodeExecutor>,
        nodes: Vec<Arc<CompiledNode>>,
        global_input: Arc<Value>,
    ) -> Result<Self, ReasoningError> {
        let configs: Vec<NodeConfig> = nodes.iter().map(|n| n.config().clone()).collect();
        let graph = DependencyGraph::build(&configs)?;

        Ok(Self {
            executor,
            nodes,
            graph,
            global_input,
            deadline: None,
            cancel: CancellationToken::new(),
        })
    }

    /// No node is dispatched once `deadline` has passed
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run nodes one at a time in topological order
    pub async fn run_sequential(&self) -> Result<ScheduleOutcome, ReasoningError> {
        let order = self.graph.topological_order()?;
        let mut outcome = self.outcome(&order);

        for index in order {
            if let Some(halt) = self.halt() {
                outcome.halted = Some(halt);
                break;
            }

            let result = match self.gather_inputs(index, &outcome.results) {
                Ok(inputs) => {
                    self.executor
                        .execute(
                            self.nodes[index].clone(),
                            inputs,
                            self.global_input.clone(),
                            self.cancel.clone(),
                        )
                        .await
                }
                Err(skipped) => skipped,
            };

            outcome.results.insert(result.node_id.clone(), result);
        }

        self.skip_remaining(&mut outcome);
        Ok(outcome)
    }

    /// Run ready nodes concurrently on at most `workers` tasks
    ///
    /// A node is dispatched as soon as its last input finishes.
    pub async fn run_parallel(&self, workers: usize) -> Result<ScheduleOutcome, ReasoningError> {
        let order = self.graph.topological_order()?;
        let mut outcome = self.outcome(&order);

        let workers = workers.max(1);
        let mut in_degree = self.graph.in_degrees();
        let mut ready: BTreeSet<usize> = (0..self.graph.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut tasks: JoinSet<(usize, NodeResult)> = JoinSet::new();

        loop {
            while outcome.halted.is_none() && tasks.len() < workers {
                let Some(index) = ready.pop_first() else {
                    break;
                };

                if let Some(halt) = self.halt() {
                    outcome.halted = Some(halt);
                    break;
                }

                match self.gather_inputs(index, &outcome.results) {
                    Ok(inputs) => {
                        debug!(node_id = %self.graph.id(index), "Dispatching node");
                        tasks.spawn(self.dispatch(index, inputs));
                    }
                    Err(skipped) => {
                        outcome.results.insert(skipped.node_id.clone(), skipped);
                        self.release(index, &mut in_degree, &mut ready);
                    }
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((index, result)) => {
                    outcome.results.insert(result.node_id.clone(), result);
                    self.release(index, &mut in_degree, &mut ready);
                }
                Err(e) => {
                    // The node stays unrecorded and is skipped below
                    error!(error = %e, "Node task ended abnormally");
                }
            }
        }

        self.skip_remaining(&mut outcome);
        Ok(outcome)
    }

    fn dispatch(
        &self,
        index: usize,
        inputs: NodeInputs,
    ) -> impl Future<Output = (usize, NodeResult)> + Send + 'static {
        let executor = self.executor.clone();
        let node = self.nodes[index].clone();
        let global_input = self.global_input.clone();
        let cancel = self.cancel.clone();

        async move {
            let node_id = node.id().to_string();
            let run = executor.execute(node, inputs, global_input, cancel);

            let result = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(result) => result,
                Err(_) => NodeResult::failed(node_id, "Node execution panicked", chrono::Utc::now()),
            };

            (index, result)
        }
    }

    fn outcome(&self, order: &[usize]) -> ScheduleOutcome {
        ScheduleOutcome {
            results: BTreeMap::new(),
            execution_order: order.iter().map(|&i| self.graph.id(i).to_string()).collect(),
            halted: None,
        }
    }

    fn halt(&self) -> Option<Halt> {
        if self.cancel.is_cancelled() {
            return Some(Halt::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Halt::TimedOut),
            _ => None,
        }
    }

    /// Outputs of the node's inputs, or a skipped result naming the first
    /// input that did not complete
    fn gather_inputs(
        &self,
        index: usize,
        results: &BTreeMap<String, NodeResult>,
    ) -> Result<NodeInputs, NodeResult> {
        let node = &self.nodes[index];
        let mut inputs = NodeInputs::new();

        for input in node.config().inputs() {
            match results.get(input) {
                Some(result) if result.is_completed() => {
                    inputs.insert(input.clone(), result.output.clone());
                }
                _ => {
                    warn!(node_id = %node.id(), input = %input, "Skipping node, input did not complete");

                    return Err(NodeResult::skipped(
                        node.id(),
                        format!("Skipped: input '{}' did not complete", input),
                    ));
                }
            }
        }

        Ok(inputs)
    }

    fn release(&self, index: usize, in_degree: &mut [usize], ready: &mut BTreeSet<usize>) {
        for &dependent in self.graph.dependents(index) {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    fn skip_remaining(&self, outcome: &mut ScheduleOutcome) {
        let reason = outcome
            .halted
            .map(|halt| halt.skip_reason())
            .unwrap_or("Skipped: node was not executed");

        for node in &self.nodes {
            if !outcome.results.contains_key(node.id()) {
                outcome
                    .results
                    .insert(node.id().to_string(), NodeResult::skipped(node.id(), reason));
            }
        }
    }
}
