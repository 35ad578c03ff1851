//! Validated scenario graphs.

use crate::builder::error::{BuildError, ScenarioError};
use crate::builder::state::StateBuilder;
use crate::core::{State, StateId, Trigger};
use crate::effects::{Action, ErrorAction};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

/// An immutable, validated set of states plus the scenario error handler.
pub struct Scenario<Env> {
    states: HashMap<StateId, Arc<State<Env>>>,
    entrypoint: Arc<State<Env>>,
    on_error: ErrorAction<Env>,
    timeout: Option<Duration>,
}

impl<Env> Scenario<Env> {
    pub fn state(&self, id: &str) -> Option<&Arc<State<Env>>> {
        self.states.get(id)
    }

    pub fn entrypoint(&self) -> &Arc<State<Env>> {
        &self.entrypoint
    }

    pub fn states(&self) -> impl Iterator<Item = &Arc<State<Env>>> {
        self.states.values()
    }

    /// Handler consulted when a transition fails.
    pub fn on_error(&self) -> &ErrorAction<Env> {
        &self.on_error
    }

    /// Overall time budget of a run, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl<Env> Clone for Scenario<Env> {
    fn clone(&self) -> Self {
        Self {
            states: self.states.clone(),
            entrypoint: Arc::clone(&self.entrypoint),
            on_error: self.on_error.clone(),
            timeout: self.timeout,
        }
    }
}

impl<Env> fmt::Debug for Scenario<Env> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.states.keys().collect();
        ids.sort();
        f.debug_struct("Scenario")
            .field("states", &ids)
            .field("entrypoint", &self.entrypoint.id())
            .field("on_error", &self.on_error)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder for [`Scenario`].
///
/// `build()` reports every structural problem at once.
///
/// # Example
///
/// ```rust
/// use switchboard::builder::{BuildError, ScenarioBuilder, StateBuilder};
///
/// let error = ScenarioBuilder::<()>::new()
///     .state(StateBuilder::new("a").trigger("nowhere"))
///     .state(StateBuilder::new("a"))
///     .build()
///     .unwrap_err();
///
/// assert!(error.contains(&BuildError::MissingEntrypoint));
/// assert!(error.contains(&BuildError::DuplicateState("a".into())));
/// assert_eq!(error.errors.len(), 3);
/// ```
pub struct ScenarioBuilder<Env> {
    states: Vec<State<Env>>,
    on_error: Option<ErrorAction<Env>>,
    timeout: Option<Duration>,
}

impl<Env> ScenarioBuilder<Env> {
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            on_error: None,
            timeout: None,
        }
    }

    pub fn state(mut self, state: StateBuilder<Env>) -> Self {
        self.states.push(state.build());
        self
    }

    /// Scenario error handler. Without one, failures are never rescued.
    pub fn on_error(mut self, action: ErrorAction<Env>) -> Self {
        self.on_error = Some(action);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn validate(&self) -> Validation<(), NonEmptyVec<BuildError>> {
        let mut checks: Vec<Validation<(), NonEmptyVec<BuildError>>> = Vec::new();

        if self.states.is_empty() {
            checks.push(Validation::fail(BuildError::NoStates));
            return Validation::all_vec(checks).map(|_| ());
        }

        let entrypoints: Vec<StateId> = self
            .states
            .iter()
            .filter(|state| state.is_entrypoint())
            .map(|state| state.id().to_string())
            .collect();
        checks.push(match entrypoints.len() {
            0 => Validation::fail(BuildError::MissingEntrypoint),
            1 => Validation::success(()),
            _ => Validation::fail(BuildError::MultipleEntrypoints(entrypoints)),
        });

        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for state in &self.states {
            if !seen.insert(state.id()) && reported.insert(state.id()) {
                checks.push(Validation::fail(BuildError::DuplicateState(
                    state.id().to_string(),
                )));
            }
        }

        for state in &self.states {
            if let Some(trigger) = state.declared_trigger() {
                if !seen.contains(trigger.id.as_str()) {
                    checks.push(Validation::fail(BuildError::UnknownTriggerTarget {
                        state: state.id().to_string(),
                        target: trigger.id.clone(),
                    }));
                }
            }
        }

        Validation::all_vec(checks).map(|_| ())
    }

    pub fn build(self) -> Result<Scenario<Env>, ScenarioError> {
        if let Validation::Failure(errors) = self.validate() {
            return Err(ScenarioError::new(errors.iter().cloned().collect()));
        }

        let states: HashMap<StateId, Arc<State<Env>>> = self
            .states
            .into_iter()
            .map(|state| (state.id().to_string(), Arc::new(state)))
            .collect();
        let entrypoint = states
            .values()
            .find(|state| state.is_entrypoint())
            .cloned()
            .ok_or_else(|| ScenarioError::new(vec![BuildError::MissingEntrypoint]))?;

        Ok(Scenario {
            states,
            entrypoint,
            on_error: self
                .on_error
                .unwrap_or_else(|| Action::immediate("scenario.on_error", Trigger::None)),
            timeout: self.timeout,
        })
    }
}

impl<Env> Default for ScenarioBuilder<Env> {
    fn default() -> Self {
        Self::new()
    }
}
