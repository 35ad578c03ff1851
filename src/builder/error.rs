//! Errors raised while building a scenario.

use crate::core::StateId;
use thiserror::Error;

/// A single structural problem in a scenario definition.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("scenario defines no states. Add at least one with .state(..)")]
    NoStates,

    #[error("no entrypoint state. Mark exactly one state with .entrypoint()")]
    MissingEntrypoint,

    #[error("multiple entrypoint states: {0:?}")]
    MultipleEntrypoints(Vec<StateId>),

    #[error("state '{0}' is defined more than once")]
    DuplicateState(StateId),

    #[error("state '{state}' declares a trigger to unknown state '{target}'")]
    UnknownTriggerTarget { state: StateId, target: StateId },
}

/// Every problem found in a scenario, not just the first.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid scenario: {}", render(.errors))]
pub struct ScenarioError {
    pub errors: Vec<BuildError>,
}

impl ScenarioError {
    pub fn new(errors: Vec<BuildError>) -> Self {
        Self { errors }
    }

    pub fn contains(&self, error: &BuildError) -> bool {
        self.errors.contains(error)
    }
}

fn render(errors: &[BuildError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
