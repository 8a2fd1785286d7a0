//! Node executor: cache lookup, retries, timeouts and dispatch to handlers

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::cache::ResultCache;
use super::handlers::{
    calculate, condition, data_input, output, transform, HandlerContext, HandlerResult,
};
use super::retry::{execute_inline, execute_with_retry, execute_with_timeout, AttemptMode};
use crate::domain::reasoning::{Collaborators, CompiledNode, NodeInputs, NodeKind, NodeResult};
use crate::infrastructure::metrics;

#[cfg(test)]
use mockall::automock;

/// Produces a node's output from its context
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext) -> HandlerResult;
}

/// Dispatches to the handler of each built-in node type
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinHandler;

#[async_trait]
impl NodeHandler for BuiltinHandler {
    async fn handle(&self, ctx: &HandlerContext) -> HandlerResult {
        match ctx.node.kind() {
            NodeKind::DataInput(spec) => data_input::execute(spec, ctx).await,
            NodeKind::Transform(spec) => transform::execute(spec, &ctx.inputs),
            NodeKind::Calculate(spec) => calculate::execute(spec, ctx).await,
            NodeKind::Condition(spec) => condition::execute(spec, ctx),
            NodeKind::Output(spec) => output::execute(spec, ctx).await,
        }
    }
}

/// Runs single nodes for the scheduler
pub struct NodeExecutor {
    handler: Arc<dyn NodeHandler>,
    collaborators: Collaborators,
    cache: ResultCache,
    mode: AttemptMode,
}

impl fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeExecutor")
            .field("collaborators", &self.collaborators)
            .field("mode", &self.mode)
            .finish()
    }
}

impl NodeExecutor {
    pub fn new(
        handler: Arc<dyn NodeHandler>,
        collaborators: Collaborators,
        cache: ResultCache,
    ) -> Self {
        Self {
            handler,
            collaborators,
            cache,
            mode: AttemptMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: AttemptMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> AttemptMode {
        self.mode
    }

    /// Execute one node against the outputs of its inputs
    ///
    /// Never fails: handler errors, timeouts and panics are recorded on the
    /// returned result.
    pub async fn execute(
        &self,
        node: Arc<CompiledNode>,
        inputs: NodeInputs,
        global_input: Arc<Value>,
        cancel: CancellationToken,
    ) -> NodeResult {
        let config = node.config();
        let node_type = config.node_type().as_str();
        let started = Instant::now();

        if let Some(key) = config.cache_key() {
            if let Some(cached) = self.cache.get(key).await {
                debug!(node_id = %node.id(), cache_key = %key, "Node output served from cache");
                metrics::record_cache_hit(node_type);

                return NodeResult::completed(node.id(), cached, Utc::now()).with_cached(true);
            }
        }

        info!(
            node_id = %node.id(),
            node_type = %node_type,
            operation = node.kind().variant_name(),
            "Executing node"
        );

        let inputs = Arc::new(inputs);
        let mode = self.mode;
        let timeout = config.timeout();

        let result = execute_with_retry(config, &cancel, |_| {
            let handler = self.handler.clone();
            let ctx = HandlerContext::new(
                node.clone(),
                inputs.clone(),
                global_input.clone(),
                self.collaborators.clone(),
            )
            .with_cancel(cancel.child_token());

            async move {
                match mode {
                    AttemptMode::Isolated => execute_with_timeout(handler, ctx, timeout).await,
                    AttemptMode::Inline => execute_inline(handler, ctx).await,
                }
            }
        })
        .await;

        if result.is_completed() {
            if let Some(key) = config.cache_key() {
                self.cache.insert(key, result.output.clone()).await;
            }

            info!(
                node_id = %node.id(),
                attempts = result.attempts,
                duration_ms = result.duration_ms,
                "Node completed"
            );
        } else {
            error!(
                node_id = %node.id(),
                attempts = result.attempts,
                error = result.error.as_deref().unwrap_or_default(),
                "Node failed"
            );
        }

        metrics::record_node_execution(node_type, result.status, started.elapsed());

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::domain::reasoning::{NodeConfig, NodeStatus, NodeType};
    use crate::infrastructure::reasoning::handlers::HandlerError;

    fn compiled(node: NodeConfig) -> Arc<CompiledNode> {
        Arc::new(CompiledNode::compile(node).unwrap())
    }

    fn constant(id: &str, value: Value) -> NodeConfig {
        NodeConfig::new(id, NodeType::DataInput)
            .with_config(json!({"source_type": "constant", "value": value}))
    }

    fn executor(handler: Arc<dyn NodeHandler>) -> NodeExecutor {
        NodeExecutor::new(handler, Collaborators::new(), ResultCache::new())
    }

    #[tokio::test]
    async fn test_builtin_dispatch() {
        let executor = executor(Arc::new(BuiltinHandler));
        let add = NodeConfig::new("add", NodeType::Calculate)
            .with_inputs(["a", "b"])
            .with_config(json!({"operation": "add", "operands": ["a", "b"]}));

        let inputs = NodeInputs::from_iter([("a", json!(2)), ("b", json!(3))]);
        let result = executor
            .execute(compiled(add), inputs, Arc::new(json!({})), CancellationToken::new())
            .await;

        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.output, json!(5));
        assert_eq!(result.attempts, 1);
        assert!(!result.cached);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failed_result() {
        let mut handler = MockNodeHandler::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| Err(HandlerError::failed("instrument offline")));

        let result = executor(Arc::new(handler))
            .execute(
                compiled(constant("c", json!(1))),
                NodeInputs::new(),
                Arc::new(Value::Null),
                CancellationToken::new(),
            )
            .await;

        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some("instrument offline"));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let mut handler = MockNodeHandler::new();
        let mut seq = mockall::Sequence::new();
        handler
            .expect_handle()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(HandlerError::failed("flaky")));
        handler
            .expect_handle()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(json!("ok")));

        let node = constant("c", json!(1)).with_retry(1, 0.0, 1.0);
        let result = executor(Arc::new(handler))
            .execute(compiled(node), NodeInputs::new(), Arc::new(Value::Null), CancellationToken::new())
            .await;

        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_handler() {
        let mut handler = MockNodeHandler::new();
        handler.expect_handle().times(1).returning(|_| Ok(json!(9)));

        let executor = executor(Arc::new(handler));
        let node = compiled(constant("c", json!(1)).with_cache_key("nine"));

        let first = executor
            .execute(node.clone(), NodeInputs::new(), Arc::new(Value::Null), CancellationToken::new())
            .await;
        let second = executor
            .execute(node, NodeInputs::new(), Arc::new(Value::Null), CancellationToken::new())
            .await;

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.output, json!(9));
        assert_eq!(second.attempts, 0);
    }

    #[tokio::test]
    async fn test_failed_output_is_not_cached() {
        let mut handler = MockNodeHandler::new();
        handler
            .expect_handle()
            .times(2)
            .returning(|_| Err(HandlerError::failed("nope")));

        let executor = executor(Arc::new(handler));
        let node = compiled(constant("c", json!(1)).with_cache_key("k"));

        for _ in 0..2 {
            let result = executor
                .execute(node.clone(), NodeInputs::new(), Arc::new(Value::Null), CancellationToken::new())
                .await;
            assert!(result.is_failed());
        }
    }

    #[derive(Debug)]
    struct Stuck;

    #[async_trait]
    impl NodeHandler for Stuck {
        async fn handle(&self, _ctx: &HandlerContext) -> HandlerResult {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_node_timeout() {
        let node = constant("slow", json!(1)).with_timeout_secs(0.05);

        let result = executor(Arc::new(Stuck))
            .execute(compiled(node), NodeInputs::new(), Arc::new(Value::Null), CancellationToken::new())
            .await;

        assert!(result.is_failed());
        assert_eq!(
            result.error.as_deref(),
            Some("Node execution timeout after 0.05 seconds")
        );
    }

    #[tokio::test]
    async fn test_inline_mode_runs_without_timeout_wrapper() {
        let executor = executor(Arc::new(BuiltinHandler)).with_mode(AttemptMode::Inline);
        assert_eq!(executor.mode(), AttemptMode::Inline);

        let result = executor
            .execute(
                compiled(constant("c", json!("7"))),
                NodeInputs::new(),
                Arc::new(Value::Null),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(result.output, json!("7"));
    }
}
