//! Core scenario types.
//!
//! This module contains the plain data of a scenario run:
//! - State records and their declared triggers
//! - Directives and triggers returned by transition actions
//! - Lifecycle enums for transitions and the machine
//! - Bounded transition history
//!
//! Nothing in here performs I/O or spawns work; the executing side lives in
//! [`crate::effects`].

mod history;
mod state;
mod status;
mod trigger;

pub use history::{HistoryEntry, StateHistory, HISTORY_CAPACITY};
pub use state::{DeclaredTrigger, State};
pub use status::{MachineStatus, Stage, TransitionStatus};
pub use trigger::{Directive, Hints, NextState, StateId, Trigger};
