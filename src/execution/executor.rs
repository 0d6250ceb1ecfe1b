//! Executes steps against the injected handlers

use super::handlers::{
    Confirmation, ConfirmationWatcher, StepHandlers, StepParams, SubmittedTransaction,
};
use crate::config::ExecutorConfig;
use crate::error::{StepError, StepSequenceError};
use crate::events::StepObserver;
use crate::steps::approval::{is_insufficient_approval, parse_erc20_approve_calldata};
use crate::steps::{ApprovalStep, Step, StepKind, StepOutcome, StepProof, StepResult, TxRequest};

use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

/// Decides which steps of a local sequence block on confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpacingPolicy {
    /// Wait for every on-chain step that has a later step depending on it
    #[default]
    Dependents,
    /// Wait for every on-chain step, including the last
    All,
    /// Never wait
    None,
}

impl SpacingPolicy {
    pub fn should_wait(&self, index: usize, steps: &[Step]) -> bool {
        let on_chain = steps
            .get(index)
            .map(|s| !s.kind().is_signature())
            .unwrap_or(false);

        match self {
            SpacingPolicy::Dependents => on_chain && index + 1 < steps.len(),
            SpacingPolicy::All => on_chain,
            SpacingPolicy::None => false,
        }
    }
}

/// Options for a local `execute_steps` run
#[derive(Debug, Clone)]
pub struct ExecuteStepsOptions {
    pub account: Address,
    pub chain_id: u64,
    /// Overrides the configured spacing policy
    pub spacing: Option<SpacingPolicy>,
}

impl ExecuteStepsOptions {
    pub fn new(account: Address, chain_id: u64) -> Self {
        Self {
            account,
            chain_id,
            spacing: None,
        }
    }

    pub fn with_spacing(mut self, spacing: SpacingPolicy) -> Self {
        self.spacing = Some(spacing);
        self
    }
}

/// Runs one step, or an ordered list of steps, strictly sequentially
#[derive(Clone)]
pub struct StepExecutor {
    handlers: Arc<dyn StepHandlers>,
    watcher: Arc<dyn ConfirmationWatcher>,
    config: ExecutorConfig,
}

impl StepExecutor {
    /// Create a new step executor
    pub fn new(
        handlers: Arc<dyn StepHandlers>,
        watcher: Arc<dyn ConfirmationWatcher>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            handlers,
            watcher,
            config,
        }
    }

    pub fn handlers(&self) -> &Arc<dyn StepHandlers> {
        &self.handlers
    }

    /// Execute a single step and report a uniform result
    pub async fn execute_step(
        &self,
        step_index: usize,
        step: &Step,
        params: &StepParams,
        observer: &dyn StepObserver,
    ) -> StepResult {
        let kind = step.kind();
        let started = Instant::now();

        debug!(
            step_type = %kind,
            step_index,
            chain_id = params.chain_id,
            wait = params.should_wait_for_confirmation,
            "Executing step"
        );

        let result = match self.run_step(step, params, observer).await {
            Ok(proof) => {
                info!(step_type = %kind, step_index, proof = ?proof, "Step completed");
                StepResult::success(step_index, kind, proof)
            }
            Err(e) => {
                warn!(
                    step_type = %kind,
                    step_index,
                    reason = e.reason(),
                    error = %e,
                    "Step failed"
                );
                StepResult::failure(step_index, e)
            }
        };

        crate::metrics::record_step(kind, &result.outcome, started.elapsed().as_secs_f64());
        result
    }

    /// Execute steps in order, stopping at the first failure
    pub async fn execute_steps(
        &self,
        steps: &[Step],
        options: &ExecuteStepsOptions,
        observer: &dyn StepObserver,
    ) -> Result<Vec<StepResult>, StepSequenceError> {
        let spacing = options.spacing.unwrap_or(self.config.spacing);
        let mut results = Vec::with_capacity(steps.len());
        let mut last_signature: Option<Bytes> = None;

        for (index, step) in steps.iter().enumerate() {
            let params = StepParams {
                account: options.account,
                chain_id: options.chain_id,
                should_wait_for_confirmation: spacing.should_wait(index, steps),
                prior_signature: last_signature.clone(),
            };

            let result = self.execute_step(index, step, &params, observer).await;

            match &result.outcome {
                StepOutcome::Success(StepProof::Signature(signature)) => {
                    last_signature = Some(signature.clone());
                }
                StepOutcome::Success(StepProof::Hash(_)) => {}
                StepOutcome::Failure(e) => {
                    error!(
                        step_type = %result.kind,
                        step_index = index,
                        completed = results.len(),
                        remaining = steps.len() - index - 1,
                        "Step sequence aborted"
                    );
                    return Err(StepSequenceError {
                        completed: results,
                        failed_index: index,
                        kind: result.kind,
                        error: e.clone(),
                        failed: result,
                    });
                }
            }

            results.push(result);
        }

        Ok(results)
    }

    async fn run_step(
        &self,
        step: &Step,
        params: &StepParams,
        observer: &dyn StepObserver,
    ) -> Result<StepProof, StepError> {
        let kind = step.kind();

        match step {
            Step::TokenRevocation(_) | Step::TokenApproval(_) | Step::WrapTransaction(_) => {
                let tx_request = step.tx_request().ok_or(StepError::MalformedRequest {
                    kind,
                    reason: "missing transaction request".to_string(),
                })?;
                self.submit(step, tx_request, params, observer).await
            }

            Step::SwapTransaction(swap) => {
                let tx_request = swap.tx_request.as_ref().ok_or(StepError::MalformedRequest {
                    kind,
                    reason: "missing transaction request".to_string(),
                })?;
                self.submit(step, tx_request, params, observer).await
            }

            Step::SwapTransactionAsync(swap) => {
                let signature = params
                    .prior_signature
                    .as_ref()
                    .ok_or(StepError::MissingSignature { kind })?;

                let tx_request = swap
                    .fetcher
                    .fetch_tx_request(signature)
                    .await
                    .map_err(|source| StepError::RequestFetch { kind, source })?;

                self.submit(step, &tx_request, params, observer).await
            }

            Step::Permit2Signature(permit) => {
                observer.on_current_step_changed(step, false);
                let signature = self
                    .handlers
                    .sign_permit(permit, params)
                    .await
                    .map_err(|source| StepError::Submission { kind, source })?;
                observer.on_current_step_changed(step, true);
                Ok(StepProof::Signature(signature))
            }

            Step::OffchainOrderSignature(order) => {
                observer.on_current_step_changed(step, false);
                let signature = self
                    .handlers
                    .sign_order(order, params)
                    .await
                    .map_err(|source| StepError::Submission { kind, source })?;
                observer.on_current_step_changed(step, true);
                Ok(StepProof::Signature(signature))
            }
        }
    }

    /// Submit an on-chain step, then wait for confirmation if requested
    async fn submit(
        &self,
        step: &Step,
        tx_request: &TxRequest,
        params: &StepParams,
        observer: &dyn StepObserver,
    ) -> Result<StepProof, StepError> {
        let kind = step.kind();
        validate_tx_request(kind, tx_request, params.chain_id)?;

        observer.on_current_step_changed(step, false);

        let submitted = match step {
            Step::TokenRevocation(s) => self.handlers.submit_revocation(s, params).await,
            Step::TokenApproval(s) => self.handlers.submit_approval(s, params).await,
            Step::WrapTransaction(s) => self.handlers.submit_wrap(s, params).await,
            Step::SwapTransaction(_) | Step::SwapTransactionAsync(_) => {
                self.handlers.submit_swap(tx_request, params).await
            }
            Step::Permit2Signature(_) | Step::OffchainOrderSignature(_) => {
                return Err(StepError::MalformedRequest {
                    kind,
                    reason: "signature step has no transaction to submit".to_string(),
                })
            }
        }
        .map_err(|source| StepError::Submission { kind, source })?;

        observer.on_current_step_changed(step, true);

        if let Step::TokenRevocation(allowance) | Step::TokenApproval(allowance) = step {
            check_wallet_modification(kind, allowance, &submitted)?;
        }

        if params.should_wait_for_confirmation {
            let chain_id = tx_request
                .chain_id
                .map(|c| c.as_u64())
                .unwrap_or(params.chain_id);
            self.await_confirmation(kind, chain_id, submitted.hash).await?;
        }

        Ok(StepProof::Hash(submitted.hash))
    }

    async fn await_confirmation(
        &self,
        kind: StepKind,
        chain_id: u64,
        hash: H256,
    ) -> Result<(), StepError> {
        let limit = self.config.confirmation_timeout();
        debug!(step_type = %kind, chain_id, tx_hash = ?hash, "Waiting for confirmation");

        match timeout(limit, self.watcher.wait_for_confirmation(chain_id, hash)).await {
            Ok(Ok(Confirmation { success: true })) => Ok(()),
            Ok(Ok(Confirmation { success: false })) => Err(StepError::SpacingFailed {
                kind,
                hash,
                reason: "transaction failed on-chain".to_string(),
            }),
            Ok(Err(e)) => Err(StepError::SpacingFailed {
                kind,
                hash,
                reason: e.to_string(),
            }),
            Err(_) => Err(StepError::SpacingFailed {
                kind,
                hash,
                reason: format!("not confirmed within {}ms", limit.as_millis()),
            }),
        }
    }
}

fn validate_tx_request(kind: StepKind, tx: &TxRequest, chain_id: u64) -> Result<(), StepError> {
    if tx.to.is_none() {
        return Err(StepError::MalformedRequest {
            kind,
            reason: "missing recipient".to_string(),
        });
    }

    if tx.data.as_ref().map(|d| d.is_empty()).unwrap_or(true) {
        return Err(StepError::MalformedRequest {
            kind,
            reason: "missing calldata".to_string(),
        });
    }

    if let Some(tx_chain) = tx.chain_id {
        if tx_chain.as_u64() != chain_id {
            return Err(StepError::MalformedRequest {
                kind,
                reason: format!(
                    "request targets chain {} but chain {} is selected",
                    tx_chain, chain_id
                ),
            });
        }
    }

    Ok(())
}

/// Wallets may let the user edit an approval before it is broadcast
fn check_wallet_modification(
    kind: StepKind,
    step: &ApprovalStep,
    submitted: &SubmittedTransaction,
) -> Result<(), StepError> {
    let Some(data) = &submitted.data else {
        return Ok(());
    };
    if step.tx_request.data.as_ref() == Some(data) {
        return Ok(());
    }

    match parse_erc20_approve_calldata(data) {
        Some(call) if is_insufficient_approval(kind, call.amount, step.amount) => {
            Err(StepError::ApprovalEditedInWallet {
                kind,
                approved: call.amount,
                required: step.amount,
            })
        }
        Some(call) => {
            info!(
                step_type = %kind,
                approved = %call.amount,
                "Approval amount edited in wallet but still sufficient"
            );
            Ok(())
        }
        None => {
            warn!(
                step_type = %kind,
                tx_hash = ?submitted.hash,
                "Submitted calldata differs from request and is not an approve call"
            );
            Ok(())
        }
    }
}
