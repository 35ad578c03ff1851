//! Switchboard: a transition execution engine for scenario state machines.
//!
//! A scenario is a graph of named states. Entering a state runs its
//! transition action, which tells the engine where to go next. Every action
//! is time-bounded and cancellable, may cascade into rescue actions when its
//! time runs out, and never throws out of the engine: failures resolve to a
//! status-carrying result.
//!
//! # Layers
//!
//! - [`core`]: plain data (states, triggers, directives, history)
//! - [`effects`]: executor, transitions and the state machine
//! - [`builder`]: scenario construction and validation
//! - [`stages`]: initialization, scenario and termination around one run
//!
//! # Example
//!
//! ```rust
//! use switchboard::builder::{ScenarioBuilder, StateBuilder};
//! use switchboard::core::{Directive, Trigger};
//! use switchboard::effects::{Action, TransitionArgs};
//! use switchboard::stages::{Runner, StageStatus};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let scenario = ScenarioBuilder::new()
//!     .state(
//!         StateBuilder::new("ringing")
//!             .entrypoint()
//!             .transition(
//!                 Action::computed("ring", |args: TransitionArgs, _call| async move {
//!                     Ok(Directive::trigger(Trigger::go("answered", args.hints)))
//!                 })
//!                 .with_timeout(Duration::from_secs(30)),
//!             ),
//!     )
//!     .state(StateBuilder::new("answered").terminal().transition(Action::immediate(
//!         "answer",
//!         Directive::idle().with_value(json!("connected")),
//!     )))
//!     .build()
//!     .unwrap();
//!
//! let result = Runner::new(scenario, ()).run(json!({ "caller": "alice" })).await;
//!
//! assert_eq!(result.status, StageStatus::Success);
//! assert_eq!(result.stages.scenario.value, json!("connected"));
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod core;
pub mod effects;
pub mod stages;

// Re-export commonly used types
pub use crate::builder::{Scenario, ScenarioBuilder, StateBuilder};
pub use crate::config::EngineConfig;
pub use crate::core::{Directive, NextState, Stage, State, StateId, Trigger};
pub use crate::effects::{Action, ExecutionError, Executor, StateMachine, Termination};
pub use crate::stages::{RunResult, Runner, StageStatus};
