//! Stage sequencer.
//!
//! A run is initialization, then the scenario state machine, then
//! termination. The run reports the most severe stage status.

mod result;
mod runner;

pub use result::{RunResult, StageResult, StageStatus, Stages};
pub use runner::{InitializationAction, Runner, TerminationAction};
