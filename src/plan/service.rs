//! Remote plan service boundary

use super::types::{Plan, PlanRequest, StepProofSubmission};
use crate::error::EngineResult;

use async_trait::async_trait;

/// The service that owns plans. Submitting the same proof twice for the same
/// step index is a no-op on its side.
#[async_trait]
pub trait PlanService: Send + Sync {
    async fn create_plan(&self, request: &PlanRequest) -> EngineResult<Plan>;

    /// Re-derive a stale plan server-side
    async fn refresh_plan(&self, plan_id: &str) -> EngineResult<Plan>;

    async fn update_plan(
        &self,
        plan_id: &str,
        proofs: &[StepProofSubmission],
    ) -> EngineResult<Plan>;

    /// Fetch the plan while waiting for `target_step_index` to become actionable
    async fn poll_plan(&self, plan_id: &str, target_step_index: usize) -> EngineResult<Plan>;
}
