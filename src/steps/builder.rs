//! Turns a trade context into its ordered step sequence
//!
//! Fixed order, each entry omitted when its precondition is already satisfied:
//! 1. Revocation (clear a non-zero legacy allowance)
//! 2. Approval (allowance insufficient for the required spend)
//! 3. Wrap (routings that need the native asset wrapped first)
//! 4. Signature (Permit2 for swaps/bridges, order signature for off-chain orders)
//! 5. Swap submission (sync when the request is known, async when it needs the signature)

use super::approval::{parse_erc20_approve_calldata, ApproveCall};
use super::types::{
    ApprovalStep, AsyncSwapStep, OrderSignatureStep, Permit2Step, Step, StepKind, SwapStep,
    Token, TxRequest, WrapStep,
};

use ethers::types::transaction::eip712::TypedData;
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// How the trade settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    /// Plain on-chain swap
    Classic,
    /// Cross-venue bridge
    Bridge,
    /// Native asset wrap/unwrap
    Wrap,
    /// Order matched off-chain, settled by a filler
    OffchainOrder,
}

impl Routing {
    pub fn requires_wrap(&self) -> bool {
        matches!(self, Routing::OffchainOrder)
    }

    pub fn settles_offchain(&self) -> bool {
        matches!(self, Routing::OffchainOrder)
    }
}

/// Swap request state at build time
#[derive(Debug, Clone)]
pub enum SwapRequest {
    Ready(TxRequest),
    Deferred(AsyncSwapStep),
    Missing,
}

/// Pre-computed trade, tagged by routing kind
#[derive(Debug, Clone)]
pub struct TradeContext {
    pub routing: Routing,
    pub input_token: Token,
    pub input_amount: U256,
    pub swap_request: SwapRequest,
    /// Off-chain order deadline, unix seconds
    pub order_deadline: Option<u64>,
    pub quote_id: Option<String>,
}

impl TradeContext {
    pub fn new(routing: Routing, input_token: Token, input_amount: U256, swap_request: SwapRequest) -> Self {
        Self {
            routing,
            input_token,
            input_amount,
            swap_request,
            order_deadline: None,
            quote_id: None,
        }
    }
}

/// Requests computed upstream by the approval/gas services
#[derive(Debug, Clone, Default)]
pub struct AuxiliaryRequests {
    pub revocation_tx: Option<TxRequest>,
    pub approval_tx: Option<TxRequest>,
    /// Permit2 payload, or the order payload for off-chain routings
    pub permit: Option<TypedData>,
    pub wrap_tx: Option<TxRequest>,
}

/// Build the ordered step sequence. Invalid or incomplete contexts yield no steps.
pub fn build_steps(context: &TradeContext, aux: &AuxiliaryRequests) -> Vec<Step> {
    match try_build_steps(context, aux) {
        Ok(steps) => {
            debug_assert!(validate_sequence(&steps).is_ok());
            steps
        }
        Err(reason) => {
            debug!(
                routing = ?context.routing,
                reason = %reason,
                "Trade context not executable, no steps generated"
            );
            Vec::new()
        }
    }
}

fn try_build_steps(context: &TradeContext, aux: &AuxiliaryRequests) -> Result<Vec<Step>, String> {
    let mut steps = Vec::new();

    if let Some(tx) = &aux.revocation_tx {
        let (step, call) = allowance_step(tx, &context.input_token, U256::zero())?;
        if !call.amount.is_zero() {
            return Err(format!("revocation request approves {} instead of zero", call.amount));
        }
        steps.push(Step::TokenRevocation(step));
    }

    if let Some(tx) = &aux.approval_tx {
        let (step, _) = allowance_step(tx, &context.input_token, context.input_amount)?;
        steps.push(Step::TokenApproval(step));
    }

    match context.routing {
        Routing::Classic | Routing::Bridge => {
            if let Some(permit) = &aux.permit {
                steps.push(Step::Permit2Signature(Permit2Step {
                    typed_data: permit.clone(),
                    token: context.input_token.clone(),
                }));
            }

            match &context.swap_request {
                SwapRequest::Ready(tx) => steps.push(Step::SwapTransaction(SwapStep {
                    tx_request: Some(tx.clone()),
                })),
                SwapRequest::Deferred(step) => {
                    if aux.permit.is_none() {
                        return Err("deferred swap request without a signature to finalize it".into());
                    }
                    steps.push(Step::SwapTransactionAsync(step.clone()));
                }
                SwapRequest::Missing => return Err("missing swap request".into()),
            }
        }

        Routing::Wrap => match &context.swap_request {
            SwapRequest::Ready(tx) => steps.push(Step::WrapTransaction(WrapStep {
                tx_request: tx.clone(),
                native_token: context.input_token.clone(),
                amount: context.input_amount,
            })),
            _ => return Err("wrap routing requires a ready wrap request".into()),
        },

        Routing::OffchainOrder => {
            let order = aux
                .permit
                .as_ref()
                .ok_or_else(|| "off-chain order without an order payload".to_string())?;

            if let Some(wrap_tx) = &aux.wrap_tx {
                steps.push(Step::WrapTransaction(WrapStep {
                    tx_request: wrap_tx.clone(),
                    native_token: Token::native(context.input_token.chain_id),
                    amount: context.input_amount,
                }));
            }

            steps.push(Step::OffchainOrderSignature(OrderSignatureStep {
                typed_data: order.clone(),
                deadline: context.order_deadline,
                quote_id: context.quote_id.clone(),
            }));
        }
    }

    Ok(steps)
}

fn allowance_step(
    tx: &TxRequest,
    token: &Token,
    amount: U256,
) -> Result<(ApprovalStep, ApproveCall), String> {
    let data = tx
        .data
        .as_ref()
        .ok_or_else(|| "allowance request without calldata".to_string())?;
    let call = parse_erc20_approve_calldata(data)
        .ok_or_else(|| "allowance request is not an ERC-20 approve call".to_string())?;

    let step = ApprovalStep {
        tx_request: tx.clone(),
        token: token.clone(),
        spender: call.spender,
        amount,
    };
    Ok((step, call))
}

/// Broken ordering invariant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceViolation {
    #[error("More than one signature step")]
    MultipleSignatures,

    #[error("{0} appears before the signature it depends on")]
    SignatureAfterDependent(StepKind),

    #[error("Revocation at {revocation} follows approval at {approval}")]
    RevocationAfterApproval { revocation: usize, approval: usize },

    #[error("{kind} appears more than once")]
    Duplicate { kind: StepKind },
}

/// Check the sequence invariants
pub fn validate_sequence(steps: &[Step]) -> Result<(), SequenceViolation> {
    let kinds: Vec<StepKind> = steps.iter().map(Step::kind).collect();

    if kinds.iter().filter(|k| k.is_signature()).count() > 1 {
        return Err(SequenceViolation::MultipleSignatures);
    }

    for (i, kind) in kinds.iter().enumerate() {
        if kinds[..i].contains(kind) {
            return Err(SequenceViolation::Duplicate { kind: *kind });
        }
    }

    let signature_at = kinds.iter().position(|k| k.is_signature());
    if let Some(async_at) = kinds
        .iter()
        .position(|k| *k == StepKind::SwapTransactionAsync)
    {
        match signature_at {
            Some(sig) if sig < async_at => {}
            _ => {
                return Err(SequenceViolation::SignatureAfterDependent(
                    StepKind::SwapTransactionAsync,
                ))
            }
        }
    }

    let revocation = kinds
        .iter()
        .position(|k| *k == StepKind::TokenRevocationTransaction);
    let approval = kinds
        .iter()
        .position(|k| *k == StepKind::TokenApprovalTransaction);
    if let (Some(revocation), Some(approval)) = (revocation, approval) {
        if revocation > approval {
            return Err(SequenceViolation::RevocationAfterApproval {
                revocation,
                approval,
            });
        }
    }

    Ok(())
}
