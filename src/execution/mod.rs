//! Step execution
//!
//! This module provides:
//! - Handler traits the caller implements to sign and broadcast
//! - Single-step execution with optional confirmation wait
//! - Strictly sequential multi-step execution that stops at the first failure

pub mod executor;
pub mod handlers;

pub use executor::{ExecuteStepsOptions, SpacingPolicy, StepExecutor};
pub use handlers::{
    Confirmation, ConfirmationWatcher, StepHandlers, StepParams, SubmittedTransaction,
};
