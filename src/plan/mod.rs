//! Remote plan execution
//!
//! This module provides:
//! - The plan model and proof submission types
//! - The `PlanService` boundary and its HTTP implementation
//! - Per-run execution context
//! - The orchestrator that keeps local execution in step with the remote plan

mod context;
pub mod http;
pub mod orchestrator;
mod service;
mod types;

pub use context::{ExecutionContext, StepLogEntry};
pub use http::HttpPlanService;
pub use orchestrator::{PlanOrchestrator, RetryHandle};
pub use service::PlanService;
pub use types::{
    Plan, PlanProgress, PlanRequest, PlanStatus, PlanStep, PlanStepStatus, Proof,
    StepProofSubmission,
};
