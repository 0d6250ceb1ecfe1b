//! Control loop for server-owned plans
//!
//! CreatingOrRefreshingPlan -> SelectingStep -> ExecutingStep -> SubmittingProof
//! -> AwaitingNextStep -> (SelectingStep | Complete | Failed)

use super::context::ExecutionContext;
use super::service::PlanService;
use super::types::{Plan, PlanProgress, PlanRequest, PlanStatus, PlanStep, StepProofSubmission};
use crate::chain::PollSchedule;
use crate::config::PlanConfig;
use crate::error::{DisplayableError, EngineError, EngineResult};
use crate::events::{PlanObserver, StepObserver};
use crate::execution::{StepExecutor, StepParams};
use crate::retry::{self, RetryPolicy};
use crate::steps::{Step, StepOutcome, StepProof, StepResult};

use ethers::types::Address;
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Forwards executor notifications to a plan observer
struct StepForwarder<'a>(&'a dyn PlanObserver);

impl StepObserver for StepForwarder<'_> {
    fn on_current_step_changed(&self, step: &Step, accepted: bool) {
        self.0.on_current_step_changed(step, accepted);
    }
}

/// Runs a remote plan to completion, one step at a time
#[derive(Clone)]
pub struct PlanOrchestrator {
    service: Arc<dyn PlanService>,
    executor: StepExecutor,
    config: PlanConfig,
    account: Address,
}

impl PlanOrchestrator {
    pub fn new(
        service: Arc<dyn PlanService>,
        executor: StepExecutor,
        config: PlanConfig,
        account: Address,
    ) -> Self {
        Self {
            service,
            executor,
            config,
            account,
        }
    }

    /// Run the plan described by `request`. Exactly one of `on_success` or
    /// `on_failure` is invoked on `observer` before this returns.
    pub async fn run(
        &self,
        request: PlanRequest,
        observer: Arc<dyn PlanObserver>,
    ) -> EngineResult<Vec<StepResult>> {
        let mut ctx = ExecutionContext::new(request.chain_id);
        info!(
            run_id = %ctx.run_id,
            routing = ?request.routing,
            existing_plan = request.existing_plan_id.is_some(),
            "Starting plan run"
        );

        match self.drive(&request, &mut ctx, observer.as_ref()).await {
            Ok(()) => {
                info!(
                    run_id = %ctx.run_id,
                    plan_id = ctx.plan_id.as_deref().unwrap_or_default(),
                    steps = ctx.results().len(),
                    elapsed_ms = ctx.elapsed().as_millis() as u64,
                    "Plan complete"
                );
                crate::metrics::record_plan_run("complete", ctx.elapsed().as_secs_f64());
                observer.on_success();
                Ok(ctx.into_results())
            }
            Err(e) => {
                self.report_failure(&e, &request, &ctx, &observer);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        request: &PlanRequest,
        ctx: &mut ExecutionContext,
        observer: &dyn PlanObserver,
    ) -> EngineResult<()> {
        let mut plan = self.create_or_refresh_plan(request).await?;
        ctx.plan_ready(&plan.plan_id);
        observer.on_steps_changed(&plan.steps);

        loop {
            if plan.status == PlanStatus::Failed {
                return Err(EngineError::PlanFailed {
                    plan_id: plan.plan_id.clone(),
                });
            }

            let Some(position) = plan.first_pending() else {
                debug!(plan_id = %plan.plan_id, "No pending steps remain");
                return Ok(());
            };
            let plan_step = plan.steps[position].clone();
            let is_last = plan.is_last(position);
            let kind = plan_step.kind();

            ctx.begin_step(plan_step.step_index, kind);
            self.ensure_chain(plan_step.chain_id, ctx).await?;

            let proof = self.execute(&plan_step, ctx, observer).await?;
            let acknowledged = self
                .submit_proof(&plan.plan_id, &plan_step, &proof, ctx)
                .await?;

            if let Some(updated) = acknowledged {
                if updated.status == PlanStatus::Failed {
                    return Err(EngineError::PlanFailed {
                        plan_id: updated.plan_id,
                    });
                }
                if updated.statuses() != plan.statuses() {
                    observer.on_steps_changed(&updated.steps);
                    plan = updated;
                }
            }

            if is_last && kind.is_swap() {
                return Ok(());
            }

            let (next, progress) = self
                .await_next_step(&plan, &plan_step, observer)
                .await?;
            if progress == PlanProgress::Finished {
                return Ok(());
            }
            plan = next;
        }
    }

    /// Create a new plan, or refresh the one named in the request. Retried
    /// immediately up to `creation_attempts` times.
    pub async fn create_or_refresh_plan(&self, request: &PlanRequest) -> EngineResult<Plan> {
        let attempts = self.config.creation_attempts;
        let policy = RetryPolicy::immediate(attempts);
        let operation = match request.existing_plan_id {
            Some(_) => "refresh_plan",
            None => "create_plan",
        };
        let service = &self.service;
        let started = Instant::now();

        let result = policy
            .run(operation, |_| async move {
                match &request.existing_plan_id {
                    Some(plan_id) => service.refresh_plan(plan_id).await,
                    None => service.create_plan(request).await,
                }
            })
            .await;

        crate::metrics::record_plan_creation(operation, started.elapsed().as_secs_f64());

        match result {
            Ok(plan) => {
                info!(
                    plan_id = %plan.plan_id,
                    steps = plan.steps.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Plan ready"
                );
                Ok(plan)
            }
            Err(e) if e.is_retryable() => Err(retry::exhausted(attempts, e)),
            Err(e) => Err(e),
        }
    }

    /// Switch chains if the step needs a different one, then let the switch settle
    async fn ensure_chain(&self, chain_id: u64, ctx: &mut ExecutionContext) -> EngineResult<()> {
        if ctx.selected_chain == Some(chain_id) {
            return Ok(());
        }

        info!(
            run_id = %ctx.run_id,
            from = ?ctx.selected_chain,
            to = chain_id,
            "Switching chain"
        );
        self.executor
            .handlers()
            .select_chain(chain_id)
            .await
            .map_err(|source| EngineError::ChainSwitch { chain_id, source })?;

        sleep(self.config.chain_switch_delay()).await;
        ctx.selected_chain = Some(chain_id);
        Ok(())
    }

    async fn execute(
        &self,
        plan_step: &PlanStep,
        ctx: &mut ExecutionContext,
        observer: &dyn PlanObserver,
    ) -> EngineResult<StepProof> {
        let kind = plan_step.kind();

        // The plan's own polling stands in for confirmation waits
        let params = StepParams {
            account: self.account,
            chain_id: plan_step.chain_id,
            should_wait_for_confirmation: false,
            prior_signature: ctx.last_signature.clone(),
        };

        let result = self
            .executor
            .execute_step(
                plan_step.step_index,
                &plan_step.step,
                &params,
                &StepForwarder(observer),
            )
            .await;
        ctx.record(&result, plan_step.chain_id);

        match result.outcome {
            StepOutcome::Success(proof) => {
                if let StepProof::Signature(signature) = &proof {
                    ctx.last_signature = Some(signature.clone());
                }
                Ok(proof)
            }
            StepOutcome::Failure(source) => Err(EngineError::StepFailed {
                index: plan_step.step_index,
                kind,
                source,
            }),
        }
    }

    /// Submit proof for a step and return the plan the service acknowledged it
    /// with. Exhausting retries is logged but not terminal: the service may have
    /// received the proof, and polling will tell.
    async fn submit_proof(
        &self,
        plan_id: &str,
        plan_step: &PlanStep,
        proof: &StepProof,
        ctx: &mut ExecutionContext,
    ) -> EngineResult<Option<Plan>> {
        let submission = [StepProofSubmission::new(plan_step.step_index, proof)];
        let policy = RetryPolicy::new(
            self.config.proof_submission_attempts,
            self.config.proof_submission_delay(),
        );
        let service = &self.service;
        let submission = &submission;

        let result = policy
            .run("update_plan", |_| async move {
                service.update_plan(plan_id, submission).await
            })
            .await;

        match result {
            Ok(updated) => {
                debug!(plan_id, step_index = plan_step.step_index, "Proof accepted");
                ctx.mark_proof(plan_step.step_index, true);
                Ok(Some(updated))
            }
            Err(e @ EngineError::UnexpectedStepType(_)) => Err(e),
            Err(e) => {
                warn!(
                    run_id = %ctx.run_id,
                    plan_id,
                    step_index = plan_step.step_index,
                    step_type = %plan_step.kind(),
                    error = %e,
                    "Proof submission failed, continuing to poll"
                );
                crate::metrics::record_proof_failure(plan_step.kind());
                ctx.mark_proof(plan_step.step_index, false);
                Ok(None)
            }
        }
    }

    /// Poll until a step after `executed` is actionable, or the plan finishes
    async fn await_next_step(
        &self,
        plan: &Plan,
        executed: &PlanStep,
        observer: &dyn PlanObserver,
    ) -> EngineResult<(Plan, PlanProgress)> {
        let schedule = PollSchedule::for_chain(
            executed.chain_id,
            executed.expected_duration_ms,
            &self.config,
        );
        let target = executed.step_index + 1;
        let started = Instant::now();
        let deadline = started + schedule.timeout;
        let mut known = plan.statuses();

        debug!(
            plan_id = %plan.plan_id,
            target_step_index = target,
            interval_ms = schedule.interval.as_millis() as u64,
            timeout_ms = schedule.timeout.as_millis() as u64,
            "Awaiting next step"
        );

        loop {
            sleep(schedule.interval).await;

            match self.service.poll_plan(&plan.plan_id, target).await {
                Ok(polled) => {
                    if polled.status == PlanStatus::Failed {
                        return Err(EngineError::PlanFailed {
                            plan_id: polled.plan_id,
                        });
                    }

                    let statuses = polled.statuses();
                    if statuses != known {
                        observer.on_steps_changed(&polled.steps);
                        known = statuses;
                    }

                    let progress = polled.progress_after(executed.step_index);
                    if progress != PlanProgress::Waiting {
                        return Ok((polled, progress));
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(plan_id = %plan.plan_id, error = %e, "Poll failed, will retry");
                }
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(EngineError::NoNextStepFound {
                    plan_id: plan.plan_id.clone(),
                    step_index: executed.step_index,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        }
    }

    fn report_failure(
        &self,
        err: &EngineError,
        request: &PlanRequest,
        ctx: &ExecutionContext,
        observer: &Arc<dyn PlanObserver>,
    ) {
        let displayable = DisplayableError::from_engine_error(err, ctx.current_step, &self.config.flow);

        error!(
            run_id = %ctx.run_id,
            plan_id = ctx.plan_id.as_deref().unwrap_or_default(),
            classification = displayable.classification,
            step_type = ?ctx.current_step,
            step_index = ?ctx.current_step_index,
            started_at = %ctx.started_at,
            plan_creation_ms = ?ctx.plan_creation_elapsed().map(|d| d.as_millis() as u64),
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            step_log = ?ctx.step_log(),
            error = %err,
            "Plan run failed"
        );
        crate::metrics::record_plan_run("failed", ctx.elapsed().as_secs_f64());

        let retry = err.allows_run_retry().then(|| RetryHandle {
            orchestrator: self.clone(),
            request: request.clone(),
            observer: observer.clone(),
        });
        observer.on_failure(displayable, retry);
    }
}

/// Re-runs a failed orchestration from scratch with the same request
#[derive(Clone)]
pub struct RetryHandle {
    orchestrator: PlanOrchestrator,
    request: PlanRequest,
    observer: Arc<dyn PlanObserver>,
}

impl RetryHandle {
    pub async fn retry(&self) -> EngineResult<Vec<StepResult>> {
        info!(routing = ?self.request.routing, "Retrying plan run");
        self.orchestrator
            .run(self.request.clone(), self.observer.clone())
            .await
    }
}

impl fmt::Debug for RetryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHandle")
            .field("routing", &self.request.routing)
            .field("existing_plan_id", &self.request.existing_plan_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::error::HandlerError;
    use crate::events::{drain, ChannelObserver, ExecutionEvent};
    use crate::execution::handlers::{MockConfirmationWatcher, MockStepHandlers};
    use crate::execution::SubmittedTransaction;
    use crate::plan::types::PlanStepStatus;
    use crate::steps::fixtures::*;
    use crate::steps::{ApprovalStep, Routing, StepKind, SwapStep};

    use async_trait::async_trait;
    use ethers::types::H256;
    use mockall::predicate::eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedReceiver;

    const PLAN_ID: &str = "plan-1";

    fn unavailable(operation: &str) -> EngineError {
        EngineError::PlanService {
            operation: operation.to_string(),
            status: Some(503),
            message: "unavailable".to_string(),
        }
    }

    /// Scripted plan service that records every call
    struct FakePlanService {
        plan: Plan,
        polls: Mutex<VecDeque<Plan>>,
        stall: Option<Plan>,
        acknowledged: Option<Plan>,
        rejecting_updates: bool,
        create_failures: AtomicU32,
        update_failures: AtomicU32,
        creates: AtomicU32,
        poll_count: AtomicU32,
        updates: Mutex<Vec<StepProofSubmission>>,
    }

    impl FakePlanService {
        fn new(plan: Plan) -> Self {
            Self {
                plan,
                polls: Mutex::new(VecDeque::new()),
                stall: None,
                acknowledged: None,
                rejecting_updates: false,
                create_failures: AtomicU32::new(0),
                update_failures: AtomicU32::new(0),
                creates: AtomicU32::new(0),
                poll_count: AtomicU32::new(0),
                updates: Mutex::new(Vec::new()),
            }
        }

        fn then_poll(self, plan: Plan) -> Self {
            self.polls.lock().unwrap().push_back(plan);
            self
        }

        /// Returned once scripted polls run out
        fn stalled_at(mut self, plan: Plan) -> Self {
            self.stall = Some(plan);
            self
        }

        /// Plan returned from `update_plan` in place of the created one
        fn acknowledging(mut self, plan: Plan) -> Self {
            self.acknowledged = Some(plan);
            self
        }

        fn rejecting_updates(mut self) -> Self {
            self.rejecting_updates = true;
            self
        }

        fn failing_creates(self, n: u32) -> Self {
            self.create_failures.store(n, Ordering::SeqCst);
            self
        }

        fn failing_updates(self, n: u32) -> Self {
            self.update_failures.store(n, Ordering::SeqCst);
            self
        }

        fn updates_for(&self, step_index: usize) -> usize {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.step_index == step_index)
                .count()
        }

        fn take_failure(counter: &AtomicU32) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl PlanService for FakePlanService {
        async fn create_plan(&self, _request: &PlanRequest) -> EngineResult<Plan> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if Self::take_failure(&self.create_failures) {
                return Err(unavailable("create_plan"));
            }
            Ok(self.plan.clone())
        }

        async fn refresh_plan(&self, plan_id: &str) -> EngineResult<Plan> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            assert_eq!(plan_id, PLAN_ID);
            Ok(self.plan.clone())
        }

        async fn update_plan(
            &self,
            _plan_id: &str,
            proofs: &[StepProofSubmission],
        ) -> EngineResult<Plan> {
            self.updates.lock().unwrap().extend_from_slice(proofs);
            if self.rejecting_updates {
                return Err(EngineError::UnexpectedStepType("BRIDGE_V9".to_string()));
            }
            if Self::take_failure(&self.update_failures) {
                return Err(unavailable("update_plan"));
            }
            Ok(self.acknowledged.clone().unwrap_or_else(|| self.plan.clone()))
        }

        async fn poll_plan(&self, _plan_id: &str, _target: usize) -> EngineResult<Plan> {
            self.poll_count.fetch_add(1, Ordering::SeqCst);
            if let Some(plan) = self.polls.lock().unwrap().pop_front() {
                return Ok(plan);
            }
            match &self.stall {
                Some(plan) => Ok(plan.clone()),
                None => Err(unavailable("poll_plan")),
            }
        }
    }

    fn approval(chain_id: u64) -> Step {
        Step::TokenApproval(ApprovalStep {
            tx_request: approve_request(chain_id, input_amount()),
            token: usdc(),
            spender: permit2_address(),
            amount: input_amount(),
        })
    }

    fn swap(chain_id: u64) -> Step {
        Step::SwapTransaction(SwapStep {
            tx_request: Some(swap_request(chain_id)),
        })
    }

    fn plan_step(step_index: usize, status: PlanStepStatus, chain_id: u64, step: Step) -> PlanStep {
        PlanStep {
            step_index,
            status,
            chain_id,
            step,
            expected_duration_ms: None,
        }
    }

    fn plan(steps: Vec<PlanStep>, status: PlanStatus) -> Plan {
        Plan {
            plan_id: PLAN_ID.to_string(),
            steps,
            status,
        }
    }

    /// Approval then swap, both on mainnet
    fn approve_then_swap(first: PlanStepStatus, second: PlanStepStatus) -> Plan {
        plan(
            vec![
                plan_step(0, first, MAINNET, approval(MAINNET)),
                plan_step(1, second, MAINNET, swap(MAINNET)),
            ],
            PlanStatus::Active,
        )
    }

    fn request() -> PlanRequest {
        PlanRequest::new(serde_json::json!({ "quoteId": "q-1" }), Routing::Bridge, MAINNET)
    }

    fn handlers_for_two_steps() -> MockStepHandlers {
        let mut handlers = MockStepHandlers::new();
        handlers
            .expect_submit_approval()
            .times(1)
            .returning(|_, _| Ok(SubmittedTransaction::new(H256::from_low_u64_be(1))));
        handlers
            .expect_submit_swap()
            .times(1)
            .returning(|_, _| Ok(SubmittedTransaction::new(H256::from_low_u64_be(2))));
        handlers
    }

    fn orchestrator(service: Arc<FakePlanService>, handlers: MockStepHandlers) -> PlanOrchestrator {
        let executor = StepExecutor::new(
            Arc::new(handlers),
            Arc::new(MockConfirmationWatcher::new()),
            ExecutorConfig::default(),
        );
        PlanOrchestrator::new(service, executor, PlanConfig::default(), account())
    }

    fn observer() -> (Arc<dyn PlanObserver>, UnboundedReceiver<ExecutionEvent>) {
        let (observer, rx) = ChannelObserver::new();
        let observer: Arc<dyn PlanObserver> = Arc::new(observer);
        (observer, rx)
    }

    fn count(events: &[ExecutionEvent], name: &str) -> usize {
        events.iter().filter(|e| e.name() == name).count()
    }

    fn failure(events: &[ExecutionEvent]) -> (DisplayableError, Option<RetryHandle>) {
        events
            .iter()
            .find_map(|e| match e {
                ExecutionEvent::Failure { error, retry } => Some((error.clone(), retry.clone())),
                _ => None,
            })
            .expect("failure event")
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_step_plan_completes_after_one_poll() {
        use PlanStepStatus::*;

        let service = Arc::new(
            FakePlanService::new(approve_then_swap(Pending, Pending))
                .then_poll(approve_then_swap(Complete, Pending)),
        );
        let orchestrator = orchestrator(service.clone(), handlers_for_two_steps());
        let (observer, mut rx) = observer();

        let results = orchestrator.run(request(), observer).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_success()));
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 1);
        assert_eq!(service.updates_for(0), 1);
        assert_eq!(service.updates_for(1), 1);

        let events = drain(&mut rx);
        assert_eq!(count(&events, "Success"), 1);
        assert_eq!(count(&events, "Failure"), 0);
        // Initial plan, then the acknowledgement of step 0
        assert_eq!(count(&events, "StepsChanged"), 2);
        assert_eq!(count(&events, "CurrentStepChanged"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_exhaustion_reports_no_next_step() {
        use PlanStepStatus::*;

        let service = Arc::new(
            FakePlanService::new(approve_then_swap(Pending, Pending))
                .stalled_at(approve_then_swap(Pending, Pending)),
        );
        let mut handlers = MockStepHandlers::new();
        handlers
            .expect_submit_approval()
            .times(1)
            .returning(|_, _| Ok(SubmittedTransaction::new(H256::from_low_u64_be(1))));
        handlers.expect_submit_swap().never();

        let orchestrator = orchestrator(service.clone(), handlers);
        let (observer, mut rx) = observer();

        let err = orchestrator.run(request(), observer).await.unwrap_err();
        assert!(matches!(err, EngineError::NoNextStepFound { step_index: 0, .. }));

        // Mainnet default: 24s settlement plus 30s grace, polled every 2s
        let polls = service.poll_count.load(Ordering::SeqCst);
        assert_eq!(polls, 27);

        let events = drain(&mut rx);
        assert_eq!(count(&events, "Success"), 0);
        assert_eq!(count(&events, "Failure"), 1);
        let (error, retry) = failure(&events);
        assert_eq!(error.classification, "no_next_step_found");
        assert_eq!(error.message, "No next step found during swap");
        assert!(retry.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_proof_failure_is_retried_once_acknowledged() {
        use PlanStepStatus::*;

        let service = Arc::new(
            FakePlanService::new(approve_then_swap(Pending, Pending))
                .then_poll(approve_then_swap(Complete, Pending))
                .failing_updates(1),
        );
        let orchestrator = orchestrator(service.clone(), handlers_for_two_steps());
        let (observer, _rx) = observer();

        orchestrator.run(request(), observer).await.unwrap();

        // One failed attempt, one acknowledged, no more
        assert_eq!(service.updates_for(0), 2);
        assert_eq!(service.updates_for(1), 1);
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_proof_submission_still_polls() {
        use PlanStepStatus::*;

        let service = Arc::new(
            FakePlanService::new(approve_then_swap(Pending, Pending))
                .then_poll(approve_then_swap(Complete, Pending))
                .failing_updates(3),
        );
        let orchestrator = orchestrator(service.clone(), handlers_for_two_steps());
        let (observer, mut rx) = observer();

        let results = orchestrator.run(request(), observer).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(service.updates_for(0), 3);
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 1);
        assert_eq!(count(&drain(&mut rx), "Success"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switches_chain_before_step() {
        let service = Arc::new(FakePlanService::new(plan(
            vec![plan_step(0, PlanStepStatus::Pending, BASE, swap(BASE))],
            PlanStatus::Active,
        )));

        let mut handlers = MockStepHandlers::new();
        handlers
            .expect_select_chain()
            .with(eq(BASE))
            .times(1)
            .returning(|_| Ok(()));
        handlers
            .expect_submit_swap()
            .times(1)
            .withf(|_, params| params.chain_id == BASE)
            .returning(|_, _| Ok(SubmittedTransaction::new(H256::from_low_u64_be(3))));

        let orchestrator = orchestrator(service.clone(), handlers);
        let (observer, _rx) = observer();
        let started = Instant::now();

        orchestrator.run(request(), observer).await.unwrap();

        assert!(started.elapsed() >= PlanConfig::default().chain_switch_delay());
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_plan_failure_is_terminal() {
        use PlanStepStatus::*;

        let service = Arc::new(
            FakePlanService::new(approve_then_swap(Pending, Pending))
                .then_poll(plan(
                    approve_then_swap(Complete, Pending).steps,
                    PlanStatus::Failed,
                )),
        );
        let mut handlers = MockStepHandlers::new();
        handlers
            .expect_submit_approval()
            .returning(|_, _| Ok(SubmittedTransaction::new(H256::from_low_u64_be(1))));
        handlers.expect_submit_swap().never();

        let orchestrator = orchestrator(service, handlers);
        let (observer, mut rx) = observer();

        let err = orchestrator.run(request(), observer).await.unwrap_err();
        assert!(matches!(err, EngineError::PlanFailed { .. }));
        assert_eq!(failure(&drain(&mut rx)).0.classification, "plan_failed");
    }

    #[tokio::test]
    async fn test_user_rejection_is_silent_without_retry() {
        let service = Arc::new(FakePlanService::new(plan(
            vec![plan_step(0, PlanStepStatus::Pending, MAINNET, swap(MAINNET))],
            PlanStatus::Active,
        )));
        let mut handlers = MockStepHandlers::new();
        handlers
            .expect_submit_swap()
            .returning(|_, _| Err(HandlerError::UserRejected));

        let orchestrator = orchestrator(service.clone(), handlers);
        let (observer, mut rx) = observer();

        orchestrator.run(request(), observer).await.unwrap_err();

        let (error, retry) = failure(&drain(&mut rx));
        assert!(error.silent);
        assert!(retry.is_none());
        // No proof for a failed step
        assert_eq!(service.updates_for(0), 0);
    }

    #[tokio::test]
    async fn test_creation_exhaustion_offers_retry_of_whole_run() {
        let service = Arc::new(
            FakePlanService::new(plan(
                vec![plan_step(0, PlanStepStatus::Pending, MAINNET, swap(MAINNET))],
                PlanStatus::Active,
            ))
            .failing_creates(3),
        );
        let mut handlers = MockStepHandlers::new();
        handlers
            .expect_submit_swap()
            .times(1)
            .returning(|_, _| Ok(SubmittedTransaction::new(H256::from_low_u64_be(4))));

        let orchestrator = orchestrator(service.clone(), handlers);
        let (observer, mut rx) = observer();

        let err = orchestrator.run(request(), observer).await.unwrap_err();
        assert!(matches!(err, EngineError::PlanUnavailable { attempts: 3, .. }));
        assert_eq!(service.creates.load(Ordering::SeqCst), 3);

        let (error, retry) = failure(&drain(&mut rx));
        assert_eq!(error.classification, "plan_unavailable");
        assert!(error.is_backend_rejection);

        let results = retry.expect("retry handle").retry().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(service.creates.load(Ordering::SeqCst), 4);
        assert_eq!(count(&drain(&mut rx), "Success"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_existing_plan_from_first_pending_step() {
        use PlanStepStatus::*;

        let service = Arc::new(FakePlanService::new(approve_then_swap(Complete, Pending)));
        let mut handlers = MockStepHandlers::new();
        handlers.expect_submit_approval().never();
        handlers
            .expect_submit_swap()
            .times(1)
            .returning(|_, _| Ok(SubmittedTransaction::new(H256::from_low_u64_be(5))));

        let orchestrator = orchestrator(service.clone(), handlers);
        let (observer, _rx) = observer();

        let results = orchestrator
            .run(request().resume(PLAN_ID), observer)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].step_index, 1);
        assert_eq!(service.updates_for(1), 1);
    }

    /// Records how many polls had happened each time the plan changed
    struct PollCountingObserver {
        service: Arc<FakePlanService>,
        polls_at_change: Mutex<Vec<u32>>,
    }

    impl StepObserver for PollCountingObserver {}

    impl PlanObserver for PollCountingObserver {
        fn on_steps_changed(&self, _steps: &[PlanStep]) {
            let polls = self.service.poll_count.load(Ordering::SeqCst);
            self.polls_at_change.lock().unwrap().push(polls);
        }
    }

    /// Approval on mainnet, then a swap on Base
    fn approve_then_swap_on_base(first: PlanStepStatus) -> Plan {
        plan(
            vec![
                plan_step(0, first, MAINNET, approval(MAINNET)),
                plan_step(1, PlanStepStatus::Pending, BASE, swap(BASE)),
            ],
            PlanStatus::Active,
        )
    }

    fn handlers_failing_switch(error: HandlerError) -> MockStepHandlers {
        let mut handlers = MockStepHandlers::new();
        handlers
            .expect_submit_approval()
            .times(1)
            .returning(|_, _| Ok(SubmittedTransaction::new(H256::from_low_u64_be(1))));
        handlers
            .expect_select_chain()
            .with(eq(BASE))
            .times(1)
            .returning(move |_| Err(error.clone()));
        handlers.expect_submit_swap().never();
        handlers
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_step_type_in_proof_response_is_terminal() {
        use PlanStepStatus::*;

        let service = Arc::new(
            FakePlanService::new(approve_then_swap(Pending, Pending)).rejecting_updates(),
        );
        let mut handlers = MockStepHandlers::new();
        handlers
            .expect_submit_approval()
            .times(1)
            .returning(|_, _| Ok(SubmittedTransaction::new(H256::from_low_u64_be(1))));
        handlers.expect_submit_swap().never();

        let orchestrator = orchestrator(service.clone(), handlers);
        let (observer, mut rx) = observer();

        let err = orchestrator.run(request(), observer).await.unwrap_err();
        assert!(matches!(err, EngineError::UnexpectedStepType(_)));
        assert_eq!(service.updates_for(0), 1);
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 0);

        let (error, retry) = failure(&drain(&mut rx));
        assert_eq!(error.classification, "unexpected_step_type");
        assert_eq!(error.step, Some(StepKind::TokenApprovalTransaction));
        assert!(retry.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_switch_failure_names_the_pending_step() {
        use PlanStepStatus::*;

        let service = Arc::new(
            FakePlanService::new(approve_then_swap_on_base(Pending))
                .then_poll(approve_then_swap_on_base(Complete)),
        );
        let handlers = handlers_failing_switch(HandlerError::Rejected("unsupported chain".into()));
        let orchestrator = orchestrator(service.clone(), handlers);
        let (observer, mut rx) = observer();

        let err = orchestrator.run(request(), observer).await.unwrap_err();
        assert!(matches!(err, EngineError::ChainSwitch { chain_id: BASE, .. }));
        assert_eq!(service.updates_for(1), 0);

        let (error, retry) = failure(&drain(&mut rx));
        assert_eq!(error.classification, "chain_switch_failed");
        assert_eq!(error.step, Some(StepKind::SwapTransaction));
        assert_eq!(error.message, "SwapTransaction failed during swap");
        assert!(!error.silent);
        assert!(retry.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_chain_switch_is_silent_without_retry() {
        use PlanStepStatus::*;

        let service = Arc::new(
            FakePlanService::new(approve_then_swap_on_base(Pending))
                .then_poll(approve_then_swap_on_base(Complete)),
        );
        let orchestrator = orchestrator(
            service.clone(),
            handlers_failing_switch(HandlerError::UserRejected),
        );
        let (observer, mut rx) = observer();

        orchestrator.run(request(), observer).await.unwrap_err();

        let (error, retry) = failure(&drain(&mut rx));
        assert!(error.silent);
        assert_eq!(error.step, Some(StepKind::SwapTransaction));
        assert!(retry.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_statuses_are_notified_before_polling() {
        use PlanStepStatus::*;

        let service = Arc::new(
            FakePlanService::new(approve_then_swap(Pending, Pending))
                .acknowledging(approve_then_swap(Complete, Pending))
                .then_poll(approve_then_swap(Complete, Pending)),
        );
        let orchestrator = orchestrator(service.clone(), handlers_for_two_steps());
        let observer = Arc::new(PollCountingObserver {
            service: service.clone(),
            polls_at_change: Mutex::new(Vec::new()),
        });

        orchestrator.run(request(), observer.clone()).await.unwrap();

        // Initial plan, then the acknowledgement of step 0. The poll saw nothing new.
        assert_eq!(*observer.polls_at_change.lock().unwrap(), vec![0, 0]);
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_plan_in_proof_response_stops_before_polling() {
        use PlanStepStatus::*;

        let service = Arc::new(
            FakePlanService::new(approve_then_swap(Pending, Pending))
                .acknowledging(plan(approve_then_swap(Pending, Pending).steps, PlanStatus::Failed)),
        );
        let mut handlers = MockStepHandlers::new();
        handlers
            .expect_submit_approval()
            .times(1)
            .returning(|_, _| Ok(SubmittedTransaction::new(H256::from_low_u64_be(1))));
        handlers.expect_submit_swap().never();

        let orchestrator = orchestrator(service.clone(), handlers);
        let (observer, _rx) = observer();

        let err = orchestrator.run(request(), observer).await.unwrap_err();
        assert!(matches!(err, EngineError::PlanFailed { .. }));
        assert_eq!(service.poll_count.load(Ordering::SeqCst), 0);
    }
}
