//! The executing side of a scenario run.
//!
//! This module is the imperative shell around [`crate::core`]: it invokes user
//! actions under time budgets, runs and aborts individual transitions, and
//! sequences them in a state machine.
//!
//! # Key Concepts
//!
//! - **Actions**: user work, immediate or computed, with optional timeout and rescue
//! - **Executor**: races an action against its timeout and follows rescue chains
//! - **Transition**: one move, resolved by whichever of run and abort settles first
//! - **State Machine**: launches, supersedes, recovers and drains transitions
//!
//! Cancellation is cooperative. Tokens are handed to every invocation and a
//! handler that ignores its token keeps running; its result is discarded.

mod action;
pub mod cancel;
mod error;
mod executor;
mod machine;
mod transition;

pub use action::{
    AbortAction, Action, ActionKind, Callable, ErrorAction, ErrorArgs, HandlerFuture,
    HintsAction, Invocation, TransitionAction, TransitionArgs,
};
pub use error::{ErrorKind, ExecutionError};
pub use executor::Executor;
pub use machine::{StateMachine, Termination, TerminationHandle};
pub use transition::{Transition, TransitionOutcome, TransitionSnapshot};
