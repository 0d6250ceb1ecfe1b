//! Step model
//!
//! Closed set of step variants and the pure function that orders them for a trade:
//! - Allowance revocation and approval transactions
//! - Wrapping of the native asset
//! - Permit2 or off-chain order signatures
//! - Swap submission, with the request either known up front or fetched after signing

pub mod approval;
pub mod builder;
mod types;

#[cfg(test)]
pub(crate) mod fixtures;

pub use approval::{encode_erc20_approve, parse_erc20_approve_calldata, ApproveCall};
pub use builder::{
    build_steps, validate_sequence, AuxiliaryRequests, Routing, SequenceViolation, SwapRequest,
    TradeContext,
};
pub use types::{
    ApprovalStep, AsyncSwapStep, OrderSignatureStep, Permit2Step, Step, StepKind, StepOutcome,
    StepProof, StepResult, SwapStep, Token, TxRequest, TxRequestFetcher, WrapStep,
};
