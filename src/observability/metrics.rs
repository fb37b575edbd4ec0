//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_request_duration_seconds` (histogram): one sample per completed request
//! - `rejected_requests_total` (counter): admission rejections by reason
//! - `signature_violations_total` (counter): failed signature checks by kind
//! - `rpc_clients_cached` (gauge): per-credential clients held by the proxy
//! - `rpc_dials_total` (counter): backend dials by outcome
//! - `rpc_unavailable_total` (counter): calls that found no live connection

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Wall-clock duration of one request through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSample {
    pub duration: Duration,
}

/// Receives timing samples. Fire-and-forget: implementations must not block.
pub trait MetricsSink: Send + Sync + 'static {
    fn record(&self, sample: TimingSample);
}

/// Sink feeding the `metrics` facade (and thus the Prometheus exporter).
#[derive(Debug, Clone, Default)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn record(&self, sample: TimingSample) {
        ::metrics::histogram!("http_request_duration_seconds").record(sample.duration.as_secs_f64());
    }
}

/// Start the Prometheus scrape endpoint. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rejection(reason: &'static str) {
    ::metrics::counter!("rejected_requests_total", "reason" => reason).increment(1);
}

pub fn record_signature_violation(kind: &'static str) {
    ::metrics::counter!("signature_violations_total", "kind" => kind).increment(1);
}

pub fn set_cached_clients(count: usize) {
    ::metrics::gauge!("rpc_clients_cached").set(count as f64);
}

pub fn record_dial(outcome: &'static str) {
    ::metrics::counter!("rpc_dials_total", "outcome" => outcome).increment(1);
}

pub fn record_backend_unavailable() {
    ::metrics::counter!("rpc_unavailable_total").increment(1);
}
