//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the crackhash server:
//! - HTTP request metrics (latency, counts)
//! - Job counts by status and orchestrator state (collected dynamically)
//! - Broker connection state (collected dynamically)
//! - Core orchestrator, executor and transport metrics

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use crackhash_core::JobStatus;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "crackhash_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("crackhash_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "crackhash_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Job Metrics
// =============================================================================

/// Jobs by current status (collected dynamically).
pub static JOBS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("crackhash_jobs_by_status", "Current job count by status"),
        &["status"],
    )
    .unwrap()
});

/// Whether the orchestrator is running (1) or not (0).
pub static ORCHESTRATOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "crackhash_orchestrator_running",
        "Whether the job orchestrator is running",
    )
    .unwrap()
});

/// Jobs with an armed deadline.
pub static DEADLINES_ARMED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "crackhash_deadlines_armed",
        "Jobs currently waiting on their deadline",
    )
    .unwrap()
});

// =============================================================================
// Broker Metrics
// =============================================================================

/// Whether the publishing connection is up (1) or reconnecting (0).
pub static BROKER_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "crackhash_broker_connected",
        "Whether the broker publishing connection is up",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Jobs
    registry.register(Box::new(JOBS_BY_STATUS.clone())).unwrap();
    registry
        .register(Box::new(ORCHESTRATOR_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(DEADLINES_ARMED.clone())).unwrap();

    // Broker
    registry.register(Box::new(BROKER_CONNECTED.clone())).unwrap();

    // Core metrics (orchestrator, executor, transport)
    for metric in crackhash_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// This is called before encoding metrics to update gauges with current values
/// from the orchestrator and the broker connection.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    BROKER_CONNECTED.set(match state.transport().state() {
        crackhash_core::ConnectionState::Connected => 1,
        crackhash_core::ConnectionState::Reconnecting => 0,
    });

    let Some(orchestrator) = state.orchestrator() else {
        return;
    };

    let summary = orchestrator.summary().await;
    ORCHESTRATOR_RUNNING.set(if summary.running { 1 } else { 0 });
    DEADLINES_ARMED.set(summary.armed_timers as i64);

    for (status, count) in [
        (JobStatus::Created, summary.created_count),
        (JobStatus::InProgress, summary.in_progress_count),
        (JobStatus::PartiallyReady, summary.partially_ready_count),
        (JobStatus::Ready, summary.ready_count),
        (JobStatus::Error, summary.error_count),
    ] {
        JOBS_BY_STATUS
            .with_label_values(&[status.as_str()])
            .set(count as i64);
    }
}
