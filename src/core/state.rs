//! Scenario state records.
//!
//! A [`State`] is immutable once the scenario is built. It owns the action
//! that moves the machine into it, an optional action that aborts that move,
//! and an optional trigger declaring where to go next.

use super::trigger::StateId;
use crate::effects::{AbortAction, HintsAction, TransitionAction};
use std::fmt;

/// Statically declared follow-up move of a state.
///
/// `hints` is evaluated through the executor each time the trigger fires, so
/// it can be a literal ([`Action::immediate`](crate::effects::Action::immediate))
/// or computed ([`Action::computed`](crate::effects::Action::computed)).
pub struct DeclaredTrigger<Env> {
    pub id: StateId,
    pub hints: HintsAction<Env>,
}

impl<Env> Clone for DeclaredTrigger<Env> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            hints: self.hints.clone(),
        }
    }
}

impl<Env> fmt::Debug for DeclaredTrigger<Env> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeclaredTrigger")
            .field("id", &self.id)
            .field("hints", &self.hints)
            .finish()
    }
}

/// A named node of the scenario graph.
pub struct State<Env> {
    pub(crate) id: StateId,
    pub(crate) entrypoint: bool,
    pub(crate) terminal: bool,
    pub(crate) transition: TransitionAction<Env>,
    pub(crate) abort: Option<AbortAction<Env>>,
    pub(crate) trigger: Option<DeclaredTrigger<Env>>,
}

impl<Env> State<Env> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the scenario starts in this state.
    pub fn is_entrypoint(&self) -> bool {
        self.entrypoint
    }

    /// Reaching a terminal state finishes the scenario.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Action that moves the machine into this state.
    pub fn transition(&self) -> &TransitionAction<Env> {
        &self.transition
    }

    /// Action that aborts an in-flight move into this state.
    pub fn abort_action(&self) -> Option<&AbortAction<Env>> {
        self.abort.as_ref()
    }

    pub fn declared_trigger(&self) -> Option<&DeclaredTrigger<Env>> {
        self.trigger.as_ref()
    }
}

impl<Env> fmt::Debug for State<Env> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.id)
            .field("entrypoint", &self.entrypoint)
            .field("terminal", &self.terminal)
            .field("transition", &self.transition)
            .field("abort", &self.abort)
            .field("trigger", &self.trigger)
            .finish()
    }
}
