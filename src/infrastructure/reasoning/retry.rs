//! Retry, timeout and isolation around single node attempts

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::executor::NodeHandler;
use super::handlers::{HandlerContext, HandlerError, HandlerResult};
use crate::domain::reasoning::{NodeConfig, NodeResult};

/// How an attempt is run relative to the scheduler task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttemptMode {
    /// Own task, bounded by the node timeout
    #[default]
    Isolated,
    /// On the calling task without a timeout, for single-session collaborators
    Inline,
}

/// Run `attempt` up to `retry_count + 1` times, sleeping between failures
///
/// Never errors: the last attempt's result is returned, carrying the number of
/// attempts made and the start time of the first one.
pub async fn execute_with_retry<F, Fut>(
    node: &NodeConfig,
    cancel: &CancellationToken,
    mut attempt: F,
) -> NodeResult
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = NodeResult>,
{
    let max_attempts = node.retry_count() + 1;
    let started_at = Utc::now();

    let mut result = attempt(0).await;
    let mut attempts = 1;

    while !result.is_completed() && attempts < max_attempts && !cancel.is_cancelled() {
        let delay = node.delay_for_attempt(attempts - 1);

        warn!(
            node_id = %node.id(),
            attempt = attempts,
            max_attempts = max_attempts,
            error = result.error.as_deref().unwrap_or_default(),
            "Node attempt failed, retrying in {:?}",
            delay
        );

        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
            }
        }

        result = attempt(attempts).await;
        attempts += 1;
    }

    result.started_at = started_at;
    result.duration_ms = (result.completed_at - started_at)
        .num_milliseconds()
        .max(0) as u64;
    result.with_attempts(attempts)
}

/// Run one attempt on its own task, cancelling it when `timeout` elapses
///
/// The context's cancellation token is cancelled and the task aborted on
/// timeout, and a panic inside the handler becomes a failed result.
pub async fn execute_with_timeout(
    handler: Arc<dyn NodeHandler>,
    ctx: HandlerContext,
    timeout: Duration,
) -> NodeResult {
    let started_at = Utc::now();
    let node_id = ctx.node_id().to_string();
    let cancel = ctx.cancel.clone();

    let mut task = tokio::spawn(async move { handler.handle(&ctx).await });

    tokio::select! {
        joined = &mut task => match joined {
            Ok(outcome) => into_result(node_id, outcome, started_at),
            Err(e) => NodeResult::failed(
                node_id,
                format!("Node handler panicked: {}", e),
                started_at,
            ),
        },
        _ = tokio::time::sleep(timeout) => {
            cancel.cancel();
            task.abort();
            debug!(node_id = %node_id, "Node attempt aborted after timeout");

            NodeResult::failed(
                node_id,
                format!("Node execution timeout after {} seconds", timeout.as_secs_f64()),
                started_at,
            )
        }
        _ = cancel.cancelled() => {
            task.abort();
            NodeResult::failed(node_id, HandlerError::Cancelled.to_string(), started_at)
        }
    }
}

/// Run one attempt on the calling task, catching panics
pub async fn execute_inline(handler: Arc<dyn NodeHandler>, ctx: HandlerContext) -> NodeResult {
    let started_at = Utc::now();
    let node_id = ctx.node_id().to_string();

    let attempt = AssertUnwindSafe(handler.handle(&ctx)).catch_unwind();

    tokio::select! {
        outcome = attempt => match outcome {
            Ok(outcome) => into_result(node_id, outcome, started_at),
            Err(_) => NodeResult::failed(node_id, "Node handler panicked", started_at),
        },
        _ = ctx.cancel.cancelled() => {
            NodeResult::failed(node_id, HandlerError::Cancelled.to_string(), started_at)
        }
    }
}

fn into_result(
    node_id: String,
    outcome: HandlerResult,
    started_at: chrono::DateTime<Utc>,
) -> NodeResult {
    match outcome {
        Ok(output) => NodeResult::completed(node_id, output, started_at),
        Err(e) => NodeResult::failed(node_id, e.to_string(), started_at),
    }
}
