//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Capability negotiation results
//! - Batch submissions and their outcomes
//! - Confirmation polling activity

use crate::error::{RelayerError, RelayerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, Encoder,
    HistogramVec, IntCounter, TextEncoder,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

lazy_static! {
    // Capability metrics
    pub static ref CAPABILITY_QUERIES: CounterVec = register_counter_vec!(
        "batch_relayer_capability_queries_total",
        "Total wallet_getCapabilities queries by result",
        &["chain_id", "result"]
    ).unwrap();

    // Batch metrics
    pub static ref BATCHES_SUBMITTED: CounterVec = register_counter_vec!(
        "batch_relayer_batches_submitted_total",
        "Total batch submissions by outcome (hash, pending, none, error)",
        &["chain_id", "outcome"]
    ).unwrap();

    pub static ref BATCHES_CONFIRMED: CounterVec = register_counter_vec!(
        "batch_relayer_batches_confirmed_total",
        "Total batches confirmed on chain",
        &["chain_id"]
    ).unwrap();

    pub static ref BATCHES_FAILED: CounterVec = register_counter_vec!(
        "batch_relayer_batches_failed_total",
        "Total batches reported failed by the wallet",
        &["chain_id"]
    ).unwrap();

    pub static ref SUBMISSION_LATENCY: HistogramVec = register_histogram_vec!(
        "batch_relayer_submission_latency_seconds",
        "Time from submit to wallet response",
        &["chain_id"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    // Polling metrics
    pub static ref POLL_TICKS: IntCounter = register_int_counter!(
        "batch_relayer_poll_ticks_total",
        "Total wallet_getCallsStatus requests issued"
    ).unwrap();

    pub static ref POLL_ERRORS: IntCounter = register_int_counter!(
        "batch_relayer_poll_errors_total",
        "Total transient status polling errors"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Config(format!("Cannot bind metrics port {}: {}", self.port, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    encode_metrics().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Render all registered metrics in the Prometheus text format
pub fn encode_metrics() -> RelayerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| RelayerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| RelayerError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_capability_query(chain_id: u64, result: &str) {
    CAPABILITY_QUERIES
        .with_label_values(&[&chain_id.to_string(), result])
        .inc();
}

pub fn record_batch_submitted(chain_id: u64, outcome: &str) {
    BATCHES_SUBMITTED
        .with_label_values(&[&chain_id.to_string(), outcome])
        .inc();
}

pub fn record_batch_confirmed(chain_id: u64) {
    BATCHES_CONFIRMED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_batch_failed(chain_id: u64) {
    BATCHES_FAILED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_submission_latency(chain_id: u64, latency: Duration) {
    SUBMISSION_LATENCY
        .with_label_values(&[&chain_id.to_string()])
        .observe(latency.as_secs_f64());
}

pub fn record_poll_tick() {
    POLL_TICKS.inc();
}

pub fn record_poll_error() {
    POLL_ERRORS.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_exported() {
        record_batch_submitted(100, "pending");
        record_poll_tick();

        let text = encode_metrics().unwrap();
        assert!(text.contains("batch_relayer_batches_submitted_total"));
        assert!(text.contains("batch_relayer_poll_ticks_total"));
    }
}
