//! Progress notifications emitted during execution
//!
//! Notifications are synchronous: the orchestrator calls the observer and the caller
//! updates its own state before control returns. `ChannelObserver` forwards the same
//! notifications to a channel for callers that consume them from their own task.

use crate::error::DisplayableError;
use crate::plan::{PlanStep, RetryHandle};
use crate::steps::Step;

use tokio::sync::mpsc;
use tracing::debug;

/// Receives current-step notifications from the step executor
pub trait StepObserver: Send + Sync {
    /// `accepted` is false right before the user is prompted, true once the
    /// signature or transaction has been accepted
    fn on_current_step_changed(&self, _step: &Step, _accepted: bool) {}
}

/// Receives plan-level notifications from the orchestrator
pub trait PlanObserver: StepObserver {
    fn on_steps_changed(&self, _steps: &[PlanStep]) {}

    fn on_success(&self) {}

    fn on_failure(&self, _error: DisplayableError, _retry: Option<RetryHandle>) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StepObserver for NoopObserver {}
impl PlanObserver for NoopObserver {}

/// A notification, as delivered through `ChannelObserver`
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    StepsChanged(Vec<PlanStep>),
    CurrentStepChanged { step: Step, accepted: bool },
    Success,
    Failure {
        error: DisplayableError,
        retry: Option<RetryHandle>,
    },
}

impl ExecutionEvent {
    /// Get event name
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionEvent::StepsChanged(_) => "StepsChanged",
            ExecutionEvent::CurrentStepChanged { .. } => "CurrentStepChanged",
            ExecutionEvent::Success => "Success",
            ExecutionEvent::Failure { .. } => "Failure",
        }
    }
}

/// Forwards notifications to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ExecutionEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!(event = name, "Event receiver dropped, notification discarded");
        }
    }
}

impl StepObserver for ChannelObserver {
    fn on_current_step_changed(&self, step: &Step, accepted: bool) {
        self.send(ExecutionEvent::CurrentStepChanged {
            step: step.clone(),
            accepted,
        });
    }
}

impl PlanObserver for ChannelObserver {
    fn on_steps_changed(&self, steps: &[PlanStep]) {
        self.send(ExecutionEvent::StepsChanged(steps.to_vec()));
    }

    fn on_success(&self) {
        self.send(ExecutionEvent::Success);
    }

    fn on_failure(&self, error: DisplayableError, retry: Option<RetryHandle>) {
        self.send(ExecutionEvent::Failure { error, retry });
    }
}

/// Drain everything currently buffered in a receiver
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
