//! Injected side-effect handlers
//!
//! The engine never signs or broadcasts on its own. Callers plug in whatever signer,
//! wallet or RPC stack backs these traits.

use crate::error::HandlerError;
use crate::steps::{ApprovalStep, OrderSignatureStep, Permit2Step, TxRequest, WrapStep};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};

#[cfg(test)]
use mockall::automock;

/// What the wallet actually broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransaction {
    pub hash: H256,
    /// Calldata as broadcast, when the wallet reports it. Wallets may let the
    /// user edit approval amounts before signing.
    pub data: Option<Bytes>,
}

impl SubmittedTransaction {
    pub fn new(hash: H256) -> Self {
        Self { hash, data: None }
    }

    pub fn with_data(hash: H256, data: Bytes) -> Self {
        Self {
            hash,
            data: Some(data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub success: bool,
}

/// Per-step execution parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepParams {
    pub account: Address,
    pub chain_id: u64,
    /// Block until the submitted transaction is confirmed
    pub should_wait_for_confirmation: bool,
    /// Signature produced by an earlier step, required by `SwapTransactionAsync`
    pub prior_signature: Option<Bytes>,
}

impl StepParams {
    pub fn new(account: Address, chain_id: u64) -> Self {
        Self {
            account,
            chain_id,
            should_wait_for_confirmation: false,
            prior_signature: None,
        }
    }

    pub fn wait_for_confirmation(mut self, wait: bool) -> Self {
        self.should_wait_for_confirmation = wait;
        self
    }

    pub fn with_prior_signature(mut self, signature: Bytes) -> Self {
        self.prior_signature = Some(signature);
        self
    }
}

/// Signs and broadcasts on behalf of the engine
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StepHandlers: Send + Sync {
    async fn submit_revocation(
        &self,
        step: &ApprovalStep,
        params: &StepParams,
    ) -> Result<SubmittedTransaction, HandlerError>;

    async fn submit_approval(
        &self,
        step: &ApprovalStep,
        params: &StepParams,
    ) -> Result<SubmittedTransaction, HandlerError>;

    async fn submit_wrap(
        &self,
        step: &WrapStep,
        params: &StepParams,
    ) -> Result<SubmittedTransaction, HandlerError>;

    async fn submit_swap(
        &self,
        tx_request: &TxRequest,
        params: &StepParams,
    ) -> Result<SubmittedTransaction, HandlerError>;

    async fn sign_permit(
        &self,
        step: &Permit2Step,
        params: &StepParams,
    ) -> Result<Bytes, HandlerError>;

    async fn sign_order(
        &self,
        step: &OrderSignatureStep,
        params: &StepParams,
    ) -> Result<Bytes, HandlerError>;

    async fn select_chain(&self, chain_id: u64) -> Result<(), HandlerError>;
}

/// Tracks submitted transactions until they are mined
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfirmationWatcher: Send + Sync {
    async fn wait_for_confirmation(
        &self,
        chain_id: u64,
        hash: H256,
    ) -> Result<Confirmation, HandlerError>;
}
