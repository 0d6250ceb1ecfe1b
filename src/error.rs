//! Error types for the trade executor

use crate::steps::StepKind;
use crate::steps::StepResult;

use ethers::types::{H256, U256};
use thiserror::Error;

/// Failure reported by an injected side-effect handler (signer, wallet, RPC)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    #[error("User rejected request")]
    UserRejected,

    #[error("Rejected by network: {0}")]
    Rejected(String),

    #[error("Backend rejected request (status {status:?}): {message}")]
    Backend { status: Option<u16>, message: String },

    #[error("{0}")]
    Other(String),
}

/// Why a single step failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    /// Call data missing or malformed. Programmer error, never retried.
    #[error("{kind} has a malformed request: {reason}")]
    MalformedRequest { kind: StepKind, reason: String },

    /// The handler itself rejected. Nothing was broadcast.
    #[error("{kind} submission failed: {source}")]
    Submission { kind: StepKind, source: HandlerError },

    /// Submitted, but never observed as confirmed.
    #[error("{kind} spacing failed: transaction {hash:?} not confirmed: {reason}")]
    SpacingFailed {
        kind: StepKind,
        hash: H256,
        reason: String,
    },

    #[error("{kind} amount was edited in wallet: approved {approved}, required {required}")]
    ApprovalEditedInWallet {
        kind: StepKind,
        approved: U256,
        required: U256,
    },

    #[error("{kind} requires a signature from a prior step")]
    MissingSignature { kind: StepKind },

    #[error("{kind} could not fetch its transaction request: {source}")]
    RequestFetch { kind: StepKind, source: HandlerError },
}

impl StepError {
    pub fn kind(&self) -> StepKind {
        match self {
            StepError::MalformedRequest { kind, .. }
            | StepError::Submission { kind, .. }
            | StepError::SpacingFailed { kind, .. }
            | StepError::ApprovalEditedInWallet { kind, .. }
            | StepError::MissingSignature { kind }
            | StepError::RequestFetch { kind, .. } => *kind,
        }
    }

    /// Short machine-readable reason used in logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            StepError::MalformedRequest { .. } => "malformed_request",
            StepError::Submission { .. } => "submission_failed",
            StepError::SpacingFailed { .. } => "spacing_failed",
            StepError::ApprovalEditedInWallet { .. } => "approval_edited",
            StepError::MissingSignature { .. } => "missing_signature",
            StepError::RequestFetch { .. } => "request_fetch_failed",
        }
    }

    /// The underlying handler error, if the failure came from a handler
    pub fn handler_error(&self) -> Option<&HandlerError> {
        match self {
            StepError::Submission { source, .. } | StepError::RequestFetch { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self.handler_error(), Some(HandlerError::UserRejected))
    }
}

/// Terminal outcome of `execute_steps`: the first failing step plus everything before it
#[derive(Error, Debug, Clone)]
#[error("Step {failed_index} ({kind}) failed: {error}")]
pub struct StepSequenceError {
    pub completed: Vec<StepResult>,
    pub failed: StepResult,
    pub failed_index: usize,
    pub kind: StepKind,
    pub error: StepError,
}

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Step {index} ({kind}) failed: {source}")]
    StepFailed {
        index: usize,
        kind: StepKind,
        source: StepError,
    },

    #[error("Plan service error during {operation} (status {status:?}): {message}")]
    PlanService {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Plan unavailable after {attempts} attempts: {source}")]
    PlanUnavailable {
        attempts: u32,
        source: Box<EngineError>,
    },

    #[error("No next step found for plan {plan_id} after step {step_index} (waited {waited_ms}ms)")]
    NoNextStepFound {
        plan_id: String,
        step_index: usize,
        waited_ms: u64,
    },

    #[error("Unexpected step type: {0}")]
    UnexpectedStepType(String),

    #[error("Malformed plan step {step_index}: {reason}")]
    MalformedPlan { step_index: usize, reason: String },

    #[error("Plan {plan_id} failed remotely")]
    PlanFailed { plan_id: String },

    #[error("Failed to switch to chain {chain_id}: {source}")]
    ChainSwitch { chain_id: u64, source: HandlerError },

}

impl EngineError {
    /// Check if error is transient and worth an immediate bounded retry
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::PlanService { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            EngineError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Check if the caller should be offered a retry of the entire run
    pub fn allows_run_retry(&self) -> bool {
        if self.is_user_rejection() {
            return false;
        }

        match self {
            EngineError::StepFailed { source, .. } => !matches!(
                source,
                StepError::MalformedRequest { .. } | StepError::MissingSignature { .. }
            ),
            EngineError::UnexpectedStepType(_)
            | EngineError::MalformedPlan { .. }
            | EngineError::Config(_)
            | EngineError::Serialization(_) => false,
            _ => true,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        match self {
            EngineError::StepFailed { source, .. } => source.is_user_rejection(),
            EngineError::ChainSwitch { source, .. } => *source == HandlerError::UserRejected,
            _ => false,
        }
    }

    /// Errors the remote service produced, as opposed to local or wallet failures
    pub fn is_backend_rejection(&self) -> bool {
        match self {
            EngineError::PlanService { .. }
            | EngineError::Http(_)
            | EngineError::PlanUnavailable { .. }
            | EngineError::MalformedPlan { .. }
            | EngineError::PlanFailed { .. } => true,
            EngineError::StepFailed { source, .. } => {
                matches!(source.handler_error(), Some(HandlerError::Backend { .. }))
            }
            _ => false,
        }
    }

    /// Stable classification used in logs and in `DisplayableError`
    pub fn classification(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config",
            EngineError::StepFailed { source, .. } => source.reason(),
            EngineError::PlanService { .. } | EngineError::Http(_) => "plan_service",
            EngineError::Serialization(_) => "serialization",
            EngineError::PlanUnavailable { .. } => "plan_unavailable",
            EngineError::NoNextStepFound { .. } => "no_next_step_found",
            EngineError::UnexpectedStepType(_) => "unexpected_step_type",
            EngineError::MalformedPlan { .. } => "malformed_plan",
            EngineError::PlanFailed { .. } => "plan_failed",
            EngineError::ChainSwitch { .. } => "chain_switch_failed",
        }
    }
}

impl From<StepSequenceError> for EngineError {
    fn from(e: StepSequenceError) -> Self {
        EngineError::StepFailed {
            index: e.failed_index,
            kind: e.kind,
            source: e.error,
        }
    }
}

/// Error in a shape the UI layer can present
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayableError {
    pub message: String,
    pub classification: &'static str,
    pub step: Option<StepKind>,
    pub is_backend_rejection: bool,
    /// User rejections are reported but should not surface error UI
    pub silent: bool,
}

impl DisplayableError {
    pub fn from_engine_error(error: &EngineError, step: Option<StepKind>, flow: &str) -> Self {
        let classification = error.classification();
        let is_backend_rejection = error.is_backend_rejection();

        if error.is_user_rejection() {
            return Self {
                message: "User rejected request".to_string(),
                classification,
                step,
                is_backend_rejection: false,
                silent: true,
            };
        }

        let message = match (error, step) {
            (EngineError::NoNextStepFound { .. }, _) => {
                format!("No next step found during {}", flow)
            }
            (_, Some(kind)) => format!("{} failed during {}", kind, flow),
            (_, None) => error.to_string(),
        };

        Self {
            message,
            classification,
            step,
            is_backend_rejection,
            silent: false,
        }
    }
}

impl std::fmt::Display for DisplayableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
