//! Builder for scenario states.

use crate::core::{DeclaredTrigger, Directive, State, StateId};
use crate::effects::{AbortAction, Action, HintsAction, TransitionAction};
use serde_json::Value;

/// Fluent builder for a [`State`].
///
/// A state without a transition action settles immediately with an empty
/// directive.
pub struct StateBuilder<Env> {
    id: StateId,
    entrypoint: bool,
    terminal: bool,
    transition: Option<TransitionAction<Env>>,
    abort: Option<AbortAction<Env>>,
    trigger: Option<DeclaredTrigger<Env>>,
}

impl<Env> StateBuilder<Env> {
    pub fn new(id: impl Into<StateId>) -> Self {
        Self {
            id: id.into(),
            entrypoint: false,
            terminal: false,
            transition: None,
            abort: None,
            trigger: None,
        }
    }

    /// The scenario starts here.
    pub fn entrypoint(mut self) -> Self {
        self.entrypoint = true;
        self
    }

    /// Entering this state finishes the scenario.
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn transition(mut self, action: TransitionAction<Env>) -> Self {
        self.transition = Some(action);
        self
    }

    pub fn abort(mut self, action: AbortAction<Env>) -> Self {
        self.abort = Some(action);
        self
    }

    /// Move on to `target` with no hints once this state is entered.
    pub fn trigger(self, target: impl Into<StateId>) -> Self {
        let hints = Action::immediate(format!("{}.hints", self.id), Value::Null);
        self.trigger_with(target, hints)
    }

    /// Move on to `target` with hints produced by `hints`.
    pub fn trigger_with(mut self, target: impl Into<StateId>, hints: HintsAction<Env>) -> Self {
        self.trigger = Some(DeclaredTrigger {
            id: target.into(),
            hints,
        });
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn build(self) -> State<Env> {
        let transition = self.transition.unwrap_or_else(|| {
            Action::immediate(format!("{}.transition", self.id), Directive::idle())
        });
        State {
            id: self.id,
            entrypoint: self.entrypoint,
            terminal: self.terminal,
            transition,
            abort: self.abort,
            trigger: self.trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::ActionKind;

    #[test]
    fn defaults_to_immediate_idle_transition() {
        let state: State<()> = StateBuilder::new("lobby").build();

        assert_eq!(state.id(), "lobby");
        assert!(!state.is_entrypoint());
        assert!(!state.is_terminal());
        assert!(state.abort_action().is_none());
        assert_eq!(state.transition().id(), "lobby.transition");
        assert!(matches!(
            state.transition().kind(),
            ActionKind::Immediate(directive) if *directive == Directive::idle()
        ));
    }

    #[test]
    fn declared_trigger_defaults_to_null_hints() {
        let state: State<()> = StateBuilder::new("ringing")
            .entrypoint()
            .abort(Action::immediate("ringing.abort", Value::Null))
            .trigger("connected")
            .build();

        let trigger = state.declared_trigger().unwrap();
        assert_eq!(trigger.id, "connected");
        assert_eq!(trigger.hints.id(), "ringing.hints");
        assert!(state.is_entrypoint());
        assert!(state.abort_action().is_some());
    }
}
