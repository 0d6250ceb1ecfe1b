//! Step variants and per-step results

use crate::error::{HandlerError, StepError};

use async_trait::async_trait;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Transaction request as produced by upstream quote/approval services
pub type TxRequest = TransactionRequest;

/// ERC-20 token (or the chain's native asset when `address` is zero)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub chain_id: u64,
    pub address: Address,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
}

fn default_decimals() -> u8 {
    18
}

impl Token {
    pub fn new(chain_id: u64, address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            chain_id,
            address,
            symbol: Some(symbol.into()),
            decimals,
        }
    }

    /// Native asset of a chain
    pub fn native(chain_id: u64) -> Self {
        Self {
            chain_id,
            address: Address::zero(),
            symbol: None,
            decimals: 18,
        }
    }

    pub fn is_native(&self) -> bool {
        self.address.is_zero()
    }
}

/// Builds the final swap request once the signature it depends on exists.
/// Some submission paths re-quote server-side using the signature.
#[async_trait]
pub trait TxRequestFetcher: Send + Sync {
    async fn fetch_tx_request(&self, signature: &Bytes) -> Result<TxRequest, HandlerError>;
}

/// Approval or revocation of an ERC-20 allowance
#[derive(Debug, Clone)]
pub struct ApprovalStep {
    pub tx_request: TxRequest,
    pub token: Token,
    pub spender: Address,
    /// Required allowance (zero for revocations)
    pub amount: U256,
}

/// Permit2 typed-data signature authorizing the transfer
#[derive(Debug, Clone)]
pub struct Permit2Step {
    pub typed_data: TypedData,
    pub token: Token,
}

#[derive(Debug, Clone)]
pub struct SwapStep {
    pub tx_request: Option<TxRequest>,
}

/// Swap whose request can only be finalized after a prior signature
#[derive(Clone)]
pub struct AsyncSwapStep {
    pub fetcher: Arc<dyn TxRequestFetcher>,
}

impl AsyncSwapStep {
    pub fn new(fetcher: Arc<dyn TxRequestFetcher>) -> Self {
        Self { fetcher }
    }
}

impl fmt::Debug for AsyncSwapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSwapStep").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct WrapStep {
    pub tx_request: TxRequest,
    pub native_token: Token,
    pub amount: U256,
}

/// Signature for an order matched off-chain instead of submitted as a transaction
#[derive(Debug, Clone)]
pub struct OrderSignatureStep {
    pub typed_data: TypedData,
    pub deadline: Option<u64>,
    pub quote_id: Option<String>,
}

/// One atomic unit of work in a transaction sequence
#[derive(Debug, Clone)]
pub enum Step {
    TokenRevocation(ApprovalStep),
    TokenApproval(ApprovalStep),
    Permit2Signature(Permit2Step),
    SwapTransaction(SwapStep),
    SwapTransactionAsync(AsyncSwapStep),
    WrapTransaction(WrapStep),
    OffchainOrderSignature(OrderSignatureStep),
}

/// Discriminant of a `Step`, used for logging, metrics and error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    TokenRevocationTransaction,
    TokenApprovalTransaction,
    Permit2Signature,
    SwapTransaction,
    SwapTransactionAsync,
    WrapTransaction,
    OffchainOrderSignature,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::TokenRevocationTransaction => "TokenRevocationTransaction",
            StepKind::TokenApprovalTransaction => "TokenApprovalTransaction",
            StepKind::Permit2Signature => "Permit2Signature",
            StepKind::SwapTransaction => "SwapTransaction",
            StepKind::SwapTransactionAsync => "SwapTransactionAsync",
            StepKind::WrapTransaction => "WrapTransaction",
            StepKind::OffchainOrderSignature => "OffchainOrderSignature",
        }
    }

    /// Produces a signature rather than a transaction hash
    pub fn is_signature(&self) -> bool {
        matches!(
            self,
            StepKind::Permit2Signature | StepKind::OffchainOrderSignature
        )
    }

    pub fn is_swap(&self) -> bool {
        matches!(
            self,
            StepKind::SwapTransaction | StepKind::SwapTransactionAsync
        )
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::TokenRevocation(_) => StepKind::TokenRevocationTransaction,
            Step::TokenApproval(_) => StepKind::TokenApprovalTransaction,
            Step::Permit2Signature(_) => StepKind::Permit2Signature,
            Step::SwapTransaction(_) => StepKind::SwapTransaction,
            Step::SwapTransactionAsync(_) => StepKind::SwapTransactionAsync,
            Step::WrapTransaction(_) => StepKind::WrapTransaction,
            Step::OffchainOrderSignature(_) => StepKind::OffchainOrderSignature,
        }
    }

    /// Chain the step targets, when the step itself declares one
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Step::TokenRevocation(s) | Step::TokenApproval(s) => {
                tx_chain_id(&s.tx_request).or(Some(s.token.chain_id))
            }
            Step::Permit2Signature(s) => {
                typed_data_chain_id(&s.typed_data).or(Some(s.token.chain_id))
            }
            Step::SwapTransaction(s) => s.tx_request.as_ref().and_then(tx_chain_id),
            Step::SwapTransactionAsync(_) => None,
            Step::WrapTransaction(s) => {
                tx_chain_id(&s.tx_request).or(Some(s.native_token.chain_id))
            }
            Step::OffchainOrderSignature(s) => typed_data_chain_id(&s.typed_data),
        }
    }

    /// Transaction request for on-chain steps whose request is already known
    pub fn tx_request(&self) -> Option<&TxRequest> {
        match self {
            Step::TokenRevocation(s) | Step::TokenApproval(s) => Some(&s.tx_request),
            Step::SwapTransaction(s) => s.tx_request.as_ref(),
            Step::WrapTransaction(s) => Some(&s.tx_request),
            Step::Permit2Signature(_)
            | Step::SwapTransactionAsync(_)
            | Step::OffchainOrderSignature(_) => None,
        }
    }
}

fn tx_chain_id(tx: &TxRequest) -> Option<u64> {
    tx.chain_id.map(|c| c.as_u64())
}

fn typed_data_chain_id(typed_data: &TypedData) -> Option<u64> {
    typed_data.domain.chain_id.map(|c| c.low_u64())
}

/// Evidence a step completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepProof {
    Hash(H256),
    Signature(Bytes),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success(StepProof),
    Failure(StepError),
}

/// Result of executing one step. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub step_index: usize,
    pub kind: StepKind,
    pub outcome: StepOutcome,
}

impl StepResult {
    pub fn success(step_index: usize, kind: StepKind, proof: StepProof) -> Self {
        Self {
            step_index,
            kind,
            outcome: StepOutcome::Success(proof),
        }
    }

    pub fn failure(step_index: usize, error: StepError) -> Self {
        Self {
            step_index,
            kind: error.kind(),
            outcome: StepOutcome::Failure(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StepOutcome::Success(_))
    }

    pub fn proof(&self) -> Option<&StepProof> {
        match &self.outcome {
            StepOutcome::Success(proof) => Some(proof),
            StepOutcome::Failure(_) => None,
        }
    }

    pub fn hash(&self) -> Option<H256> {
        match self.proof() {
            Some(StepProof::Hash(hash)) => Some(*hash),
            _ => None,
        }
    }

    pub fn signature(&self) -> Option<&Bytes> {
        match self.proof() {
            Some(StepProof::Signature(sig)) => Some(sig),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&StepError> {
        match &self.outcome {
            StepOutcome::Failure(e) => Some(e),
            StepOutcome::Success(_) => None,
        }
    }
}
