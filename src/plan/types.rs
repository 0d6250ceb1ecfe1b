//! Remote plan model

use crate::steps::{Routing, Step, StepKind, StepProof};

use ethers::types::{Bytes, H256};
use serde::{Deserialize, Serialize};

/// Status of a plan as last reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Active,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStepStatus {
    Pending,
    Complete,
}

/// A step owned by the remote plan
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub step_index: usize,
    pub status: PlanStepStatus,
    pub chain_id: u64,
    pub step: Step,
    /// Server estimate of how long the step takes to settle once submitted
    pub expected_duration_ms: Option<u64>,
}

impl PlanStep {
    pub fn kind(&self) -> StepKind {
        self.step.kind()
    }

    pub fn is_complete(&self) -> bool {
        self.status == PlanStepStatus::Complete
    }
}

/// Where a plan stands relative to a step that was just executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanProgress {
    /// A later step is actionable
    Ready,
    /// Every step is complete
    Finished,
    /// The service has not caught up yet
    Waiting,
}

/// Server-authoritative ordered list of steps. Never mutated locally.
#[derive(Debug, Clone)]
pub struct Plan {
    pub plan_id: String,
    pub steps: Vec<PlanStep>,
    pub status: PlanStatus,
}

impl Plan {
    /// Position of the first step that is not complete
    pub fn first_pending(&self) -> Option<usize> {
        self.steps.iter().position(|s| !s.is_complete())
    }

    pub fn is_last(&self, position: usize) -> bool {
        position + 1 == self.steps.len()
    }

    pub fn progress_after(&self, step_index: usize) -> PlanProgress {
        if self.status == PlanStatus::Complete {
            return PlanProgress::Finished;
        }

        match self.first_pending().map(|p| &self.steps[p]) {
            None => PlanProgress::Finished,
            Some(next) if next.step_index > step_index => PlanProgress::Ready,
            Some(_) => PlanProgress::Waiting,
        }
    }

    /// Index/status pairs, used to detect when the known step list changed
    pub fn statuses(&self) -> Vec<(usize, PlanStepStatus)> {
        self.steps.iter().map(|s| (s.step_index, s.status)).collect()
    }
}

/// Hash or signature proving a step was completed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Bytes>,
}

impl From<&StepProof> for Proof {
    fn from(proof: &StepProof) -> Self {
        match proof {
            StepProof::Hash(hash) => Proof {
                tx_hash: Some(*hash),
                signature: None,
            },
            StepProof::Signature(sig) => Proof {
                tx_hash: None,
                signature: Some(sig.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProofSubmission {
    pub step_index: usize,
    pub proof: Proof,
}

impl StepProofSubmission {
    pub fn new(step_index: usize, proof: &StepProof) -> Self {
        Self {
            step_index,
            proof: proof.into(),
        }
    }
}

/// Input for creating a plan, or for refreshing an existing one
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    #[serde(skip)]
    pub existing_plan_id: Option<String>,
    /// Quote as returned by the quoting service, forwarded untouched
    pub quote: serde_json::Value,
    pub routing: Routing,
    /// Chain the wallet is connected to when the run starts
    pub chain_id: u64,
}

impl PlanRequest {
    pub fn new(quote: serde_json::Value, routing: Routing, chain_id: u64) -> Self {
        Self {
            existing_plan_id: None,
            quote,
            routing,
            chain_id,
        }
    }

    pub fn resume(mut self, plan_id: impl Into<String>) -> Self {
        self.existing_plan_id = Some(plan_id.into());
        self
    }
}
