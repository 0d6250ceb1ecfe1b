//! Trade Executor - multi-step transaction execution engine
//!
//! Turns a pre-computed trade into an ordered sequence of approvals, wraps,
//! signatures and swap submissions, executes them against caller-supplied
//! handlers, and keeps chained actions in sync with a server-owned plan.

pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod metrics;
pub mod plan;
pub mod retry;
pub mod steps;

pub use config::Settings;
pub use error::{
    DisplayableError, EngineError, EngineResult, HandlerError, StepError, StepSequenceError,
};
pub use events::{ChannelObserver, ExecutionEvent, NoopObserver, PlanObserver, StepObserver};
pub use execution::{
    ConfirmationWatcher, ExecuteStepsOptions, SpacingPolicy, StepExecutor, StepHandlers,
    StepParams,
};
pub use plan::{HttpPlanService, PlanOrchestrator, PlanRequest, PlanService, RetryHandle};
pub use steps::{build_steps, Step, StepKind, StepResult};

const DEFAULT_LOG_FILTER: &str = "info,trade_executor=debug,reqwest=warn,hyper=warn";

/// Initialize logging with targets and thread ids. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize JSON logging for log aggregation
pub fn init_json_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_current_span(true))
        .init();
}
