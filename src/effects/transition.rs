//! A single state-to-state move.
//!
//! A [`Transition`] runs the target state's transition action and can be asked
//! to abort while that action is in flight. Both paths race to settle one
//! shared completion handle; the first to settle wins and the other outcome is
//! discarded.

use crate::core::{Directive, Hints, State, StateId, TransitionStatus};
use crate::effects::action::TransitionArgs;
use crate::effects::error::ExecutionError;
use crate::effects::executor::Executor;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Final outcome of a transition.
#[derive(Clone, Debug)]
pub struct TransitionOutcome {
    pub status: TransitionStatus,
    pub result: Result<Directive, ExecutionError>,
}

impl TransitionOutcome {
    /// Whether the run action completed and its directive applies.
    pub fn is_success(&self) -> bool {
        self.status == TransitionStatus::Executed
    }

    /// Value recorded in history: the directive value, or the rendered error.
    pub fn value(&self) -> Value {
        match &self.result {
            Ok(directive) => directive.value.clone(),
            Err(error) => Value::String(error.to_string()),
        }
    }
}

/// Plain `{origin, target, hints}` view for logging.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransitionSnapshot {
    pub origin: Option<StateId>,
    pub target: StateId,
    pub hints: Hints,
}

/// One move from `origin` into `target`.
///
/// Compared by identity: two transitions between the same states are still
/// different transitions.
pub struct Transition<Env> {
    id: Uuid,
    origin: Option<StateId>,
    target: Arc<State<Env>>,
    hints: Hints,
    launched_at: DateTime<Utc>,
    token: CancellationToken,
    status: Mutex<TransitionStatus>,
    outcome: watch::Sender<Option<TransitionOutcome>>,
}

impl<Env> Transition<Env>
where
    Env: Clone + Send + Sync + 'static,
{
    pub fn new(origin: Option<StateId>, target: Arc<State<Env>>, hints: Hints) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            id: Uuid::new_v4(),
            origin,
            target,
            hints,
            launched_at: Utc::now(),
            token: CancellationToken::new(),
            status: Mutex::new(TransitionStatus::Idle),
            outcome,
        }
    }

    /// Start the target's transition action. Callable once.
    pub fn run(self: &Arc<Self>, executor: &Executor<Env>) -> Result<JoinHandle<()>, ExecutionError> {
        self.advance(TransitionStatus::Idle, TransitionStatus::Executing, "run")?;
        debug!(transition = %self.id, target = %self.target.id(), "running transition");

        let this = Arc::clone(self);
        let executor = executor.clone();
        Ok(tokio::spawn(async move {
            let action = this.target.transition();
            let result = executor
                .run_handler(action, this.args(), Some(&this.token))
                .await;

            let outcome = match result {
                Ok(directive) => TransitionOutcome {
                    status: TransitionStatus::Executed,
                    result: Ok(directive),
                },
                Err(error) => TransitionOutcome {
                    status: if error.is_timeout() {
                        TransitionStatus::TimedOut
                    } else {
                        TransitionStatus::ExecutionFailure
                    },
                    result: Err(ExecutionError::transition(this.target.id(), error)),
                },
            };

            if !this.settle(outcome) {
                debug!(transition = %this.id, "run outcome discarded, already settled");
            }
        }))
    }

    /// Abort the in-flight run. Only valid while `Executing`.
    ///
    /// Cancels the run's token tree and runs the target's abort action, if
    /// any, independently of the run.
    pub fn abort(self: &Arc<Self>, executor: &Executor<Env>) -> Result<JoinHandle<()>, ExecutionError> {
        self.advance(TransitionStatus::Executing, TransitionStatus::Aborting, "abort")?;
        self.token.cancel();
        debug!(transition = %self.id, target = %self.target.id(), "aborting transition");

        let this = Arc::clone(self);
        let executor = executor.clone();
        Ok(tokio::spawn(async move {
            let outcome = match this.target.abort_action() {
                None => TransitionOutcome {
                    status: TransitionStatus::Aborted,
                    result: Ok(Directive::idle()),
                },
                Some(action) => match executor.run_handler(action, this.args(), None).await {
                    Ok(value) => TransitionOutcome {
                        status: TransitionStatus::Aborted,
                        result: Ok(Directive::idle().with_value(value)),
                    },
                    Err(error) => {
                        warn!(transition = %this.id, target = %this.target.id(), %error, "abort failed");
                        TransitionOutcome {
                            status: TransitionStatus::AbortFailure,
                            result: Err(ExecutionError::transition(this.target.id(), error)),
                        }
                    }
                },
            };

            if !this.settle(outcome) {
                debug!(transition = %this.id, "abort outcome discarded, already settled");
            }
        }))
    }

    fn args(&self) -> TransitionArgs {
        TransitionArgs {
            origin: self.origin.clone(),
            hints: self.hints.clone(),
        }
    }
}

impl<Env> Transition<Env> {
    fn advance(
        &self,
        from: TransitionStatus,
        to: TransitionStatus,
        operation: &str,
    ) -> Result<(), ExecutionError> {
        let mut status = self.status.lock();
        if *status != from {
            return Err(ExecutionError::illegal_state(format!(
                "cannot {operation} transition to '{}' while {:?}",
                self.target.id(),
                *status
            )));
        }
        *status = to;
        Ok(())
    }

    /// Resolve the completion handle. Returns false if it was already settled.
    fn settle(&self, outcome: TransitionOutcome) -> bool {
        let mut status = self.status.lock();
        if self.outcome.borrow().is_some() {
            return false;
        }
        *status = outcome.status;
        self.outcome.send_replace(Some(outcome));
        true
    }

    /// Wait for the outcome.
    pub async fn settled(&self) -> TransitionOutcome {
        let mut receiver = self.outcome.subscribe();
        loop {
            let current = receiver.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            // `self` owns the sender, so the channel stays open while we wait.
            let _ = receiver.changed().await;
        }
    }

    /// The outcome, if already settled.
    pub fn outcome(&self) -> Option<TransitionOutcome> {
        self.outcome.borrow().clone()
    }

    /// Unique identity, also recorded in history.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// State the transition leaves; `None` for the entrypoint move.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// State the transition enters.
    pub fn target(&self) -> &Arc<State<Env>> {
        &self.target
    }

    /// Hints passed to the target's transition action.
    pub fn hints(&self) -> &Hints {
        &self.hints
    }

    /// When the transition was created.
    pub fn launched_at(&self) -> DateTime<Utc> {
        self.launched_at
    }

    /// Current lifecycle status.
    pub fn status(&self) -> TransitionStatus {
        *self.status.lock()
    }

    pub fn is_settled(&self) -> bool {
        self.status().is_settled()
    }

    /// Serializable view of origin, target and hints.
    pub fn snapshot(&self) -> TransitionSnapshot {
        TransitionSnapshot {
            origin: self.origin.clone(),
            target: self.target.id().to_string(),
            hints: self.hints.clone(),
        }
    }
}

impl<Env> fmt::Debug for Transition<Env> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("target", &self.target.id())
            .field("status", &self.status())
            .finish()
    }
}
