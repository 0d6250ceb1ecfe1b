//! Per-run scratch state, owned by a single orchestration call

use crate::steps::{StepKind, StepResult};

use chrono::{DateTime, Utc};
use ethers::types::Bytes;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// One executed step, kept for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct StepLogEntry {
    pub step_index: usize,
    pub kind: StepKind,
    pub chain_id: u64,
    /// `success` or the failure reason
    pub outcome: &'static str,
    pub elapsed_ms: u64,
    pub proof_submitted: Option<bool>,
}

#[derive(Debug)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub plan_id: Option<String>,
    pub current_step_index: Option<usize>,
    pub current_step: Option<StepKind>,
    pub selected_chain: Option<u64>,
    /// Latest signature produced, passed to steps that depend on one
    pub last_signature: Option<Bytes>,
    results: Vec<StepResult>,
    step_log: Vec<StepLogEntry>,
    started: Instant,
    plan_ready: Option<Instant>,
    step_started: Option<Instant>,
}

impl ExecutionContext {
    pub fn new(selected_chain: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            plan_id: None,
            current_step_index: None,
            current_step: None,
            selected_chain: Some(selected_chain),
            last_signature: None,
            results: Vec::new(),
            step_log: Vec::new(),
            started: Instant::now(),
            plan_ready: None,
            step_started: None,
        }
    }

    pub fn plan_ready(&mut self, plan_id: &str) {
        self.plan_id = Some(plan_id.to_string());
        self.plan_ready = Some(Instant::now());
    }

    /// Time spent creating or refreshing the plan
    pub fn plan_creation_elapsed(&self) -> Option<Duration> {
        self.plan_ready.map(|t| t.duration_since(self.started))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn begin_step(&mut self, step_index: usize, kind: StepKind) {
        self.current_step_index = Some(step_index);
        self.current_step = Some(kind);
        self.step_started = Some(Instant::now());
    }

    pub fn record(&mut self, result: &StepResult, chain_id: u64) {
        let elapsed = self
            .step_started
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();

        self.step_log.push(StepLogEntry {
            step_index: result.step_index,
            kind: result.kind,
            chain_id,
            outcome: result.error().map(|e| e.reason()).unwrap_or("success"),
            elapsed_ms: elapsed.as_millis() as u64,
            proof_submitted: None,
        });
        self.results.push(result.clone());
    }

    pub fn mark_proof(&mut self, step_index: usize, submitted: bool) {
        if let Some(entry) = self
            .step_log
            .iter_mut()
            .rev()
            .find(|e| e.step_index == step_index)
        {
            entry.proof_submitted = Some(submitted);
        }
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn step_log(&self) -> &[StepLogEntry] {
        &self.step_log
    }

    pub fn into_results(self) -> Vec<StepResult> {
        self.results
    }
}
