//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (submissions, dispatch, result merging, terminal statuses)
//! - Transport (publish retries, abandoned deliveries, reconnects)
//! - Executor (task outcomes and durations)

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Orchestrator Metrics
// =============================================================================

/// Jobs accepted by `submit`.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("crackhash_jobs_submitted_total", "Total jobs submitted").unwrap()
});

/// Jobs reaching a terminal status.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "crackhash_jobs_finished_total",
            "Total jobs reaching a terminal status",
        ),
        &["status"], // "READY", "PARTIALLY_READY", "ERROR"
    )
    .unwrap()
});

/// Task messages published (initial dispatch and recovery).
pub static PARTS_DISPATCHED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "crackhash_parts_dispatched_total",
        "Total part tasks published",
    )
    .unwrap()
});

/// Result messages consumed, by outcome.
pub static RESULTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("crackhash_results_total", "Total result messages consumed"),
        &["outcome"], // "merged", "duplicate", "unknown_job", "rejected"
    )
    .unwrap()
});

// =============================================================================
// Transport Metrics
// =============================================================================

/// Publish attempts that failed and were retried.
pub static PUBLISH_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "crackhash_publish_retries_total",
            "Total publish attempts retried after a transport error",
        ),
        &["topic"],
    )
    .unwrap()
});

/// Deliveries dead-lettered after exhausting their retry attempts.
pub static DELIVERIES_ABANDONED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "crackhash_deliveries_abandoned_total",
            "Total messages dead-lettered after too many failed attempts",
        ),
        &["topic"],
    )
    .unwrap()
});

/// Successful reconnects after a lost broker connection.
pub static RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("crackhash_reconnects_total", "Total broker reconnects").unwrap()
});

// =============================================================================
// Executor Metrics
// =============================================================================

/// Tasks handled by executors, by result.
pub static TASKS_EXECUTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("crackhash_tasks_executed_total", "Total tasks handled"),
        &["result"], // "found", "empty", "invalid", "cancelled"
    )
    .unwrap()
});

/// Time spent enumerating a task's range.
pub static TASK_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "crackhash_task_duration_seconds",
            "Duration of range enumeration per task",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
    )
    .unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Orchestrator
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(PARTS_DISPATCHED.clone()),
        Box::new(RESULTS_TOTAL.clone()),
        // Transport
        Box::new(PUBLISH_RETRIES.clone()),
        Box::new(DELIVERIES_ABANDONED.clone()),
        Box::new(RECONNECTS.clone()),
        // Executor
        Box::new(TASKS_EXECUTED.clone()),
        Box::new(TASK_DURATION.clone()),
    ]
}
