//! Reasoning engine metrics
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the embedding application.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::domain::reasoning::{ChainStatus, NodeStatus};

/// Record one finished node execution
pub fn record_node_execution(node_type: &str, status: NodeStatus, duration: Duration) {
    let labels = [
        ("node_type", node_type.to_string()),
        ("status", status.as_str().to_string()),
    ];

    counter!("reasoning_node_executions_total", &labels).increment(1);
    histogram!("reasoning_node_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Record one finished chain run
pub fn record_chain_execution(status: ChainStatus, parallel: bool, duration: Duration) {
    let labels = [
        ("status", status.as_str().to_string()),
        ("mode", mode_label(parallel).to_string()),
    ];

    counter!("reasoning_chain_executions_total", &labels).increment(1);
    histogram!("reasoning_chain_duration_seconds", &labels).record(duration.as_secs_f64());
}

pub fn record_cache_hit(node_type: &str) {
    counter!("reasoning_cache_hits_total", "node_type" => node_type.to_string()).increment(1);
}

pub fn mode_label(parallel: bool) -> &'static str {
    if parallel { "parallel" } else { "sequential" }
}
