//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Step execution by type and outcome
//! - Plan runs, creation latency and run duration
//! - Proof submission failures
//!
//! Metrics are registered in the default registry. Exporting them is left to the
//! embedding application.

use crate::steps::{StepKind, StepOutcome};

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    // Step metrics
    pub static ref STEPS_EXECUTED: CounterVec = register_counter_vec!(
        "trade_executor_steps_total",
        "Total steps executed by type and outcome",
        &["step_type", "outcome"]
    ).unwrap();

    pub static ref STEP_LATENCY: HistogramVec = register_histogram_vec!(
        "trade_executor_step_latency_seconds",
        "Step execution latency, including any confirmation wait",
        &["step_type"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Plan metrics
    pub static ref PLAN_RUNS: CounterVec = register_counter_vec!(
        "trade_executor_plan_runs_total",
        "Total plan runs by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref PLAN_CREATION_LATENCY: HistogramVec = register_histogram_vec!(
        "trade_executor_plan_creation_seconds",
        "Time to create or refresh a plan",
        &["operation"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    pub static ref PLAN_RUN_DURATION: HistogramVec = register_histogram_vec!(
        "trade_executor_plan_run_seconds",
        "Wall time of a full plan run",
        &["outcome"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    ).unwrap();

    pub static ref PROOF_SUBMISSION_FAILURES: CounterVec = register_counter_vec!(
        "trade_executor_proof_submission_failures_total",
        "Proof submissions that exhausted their retries",
        &["step_type"]
    ).unwrap();
}

/// Record the outcome and latency of one step
pub fn record_step(kind: StepKind, outcome: &StepOutcome, seconds: f64) {
    let label = match outcome {
        StepOutcome::Success(_) => "success",
        StepOutcome::Failure(e) => e.reason(),
    };
    STEPS_EXECUTED
        .with_label_values(&[kind.as_str(), label])
        .inc();
    STEP_LATENCY
        .with_label_values(&[kind.as_str()])
        .observe(seconds);
}

pub fn record_plan_creation(operation: &str, seconds: f64) {
    PLAN_CREATION_LATENCY
        .with_label_values(&[operation])
        .observe(seconds);
}

pub fn record_plan_run(outcome: &str, seconds: f64) {
    PLAN_RUNS.with_label_values(&[outcome]).inc();
    PLAN_RUN_DURATION
        .with_label_values(&[outcome])
        .observe(seconds);
}

pub fn record_proof_failure(kind: StepKind) {
    PROOF_SUBMISSION_FAILURES
        .with_label_values(&[kind.as_str()])
        .inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
