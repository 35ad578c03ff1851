//! Actions: user-supplied, time-bounded units of work.
//!
//! Every transition, abort, error handler and computed hint is an [`Action`].
//! An action is either an immediate value or a computed async callable, has an
//! optional timeout, and may carry a rescue action that runs when the timeout
//! expires. Rescues nest to arbitrary depth.

use crate::core::{Directive, Hints, StateId, Trigger};
use crate::effects::error::ExecutionError;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Future returned by a computed action.
pub type HandlerFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

/// Type alias for computed action callables.
pub type Callable<Env, A, T> = Arc<dyn Fn(A, Invocation<Env>) -> HandlerFuture<T> + Send + Sync>;

/// Moves the machine into a state; returns what to do next.
pub type TransitionAction<Env> = Action<Env, TransitionArgs, Directive>;

/// Counter-action to an in-flight transition.
pub type AbortAction<Env> = Action<Env, TransitionArgs, Value>;

/// Scenario-level error handler; a returned move rescues the scenario.
pub type ErrorAction<Env> = Action<Env, ErrorArgs, Trigger>;

/// Produces the hints of a declared trigger.
pub type HintsAction<Env> = Action<Env, (), Hints>;

/// Arguments of transition and abort actions.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionArgs {
    /// State being left, `None` for the entrypoint move
    pub origin: Option<StateId>,
    pub hints: Hints,
}

/// Arguments of the scenario error handler.
#[derive(Clone, Debug)]
pub struct ErrorArgs {
    pub error: ExecutionError,
    pub origin: Option<StateId>,
    pub target: StateId,
    pub hints: Hints,
}

/// Per-call context handed to a computed action.
///
/// The token is cancelled when the action's time budget runs out or when the
/// owning transition is aborted. Cancellation is advisory: a handler that
/// never looks at the token runs to completion and its result is discarded.
#[derive(Clone, Debug)]
pub struct Invocation<Env> {
    env: Env,
    token: CancellationToken,
    timeouts: Vec<ExecutionError>,
}

impl<Env> Invocation<Env> {
    pub(crate) fn new(env: Env, token: CancellationToken, timeouts: Vec<ExecutionError>) -> Self {
        Self {
            env,
            token,
            timeouts,
        }
    }

    /// Execution context the action is bound to.
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Token cancelled when this invocation times out or its parent is cancelled.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the invocation is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Timeout errors of the actions this rescue is standing in for,
    /// outermost first. Empty for a regular call.
    pub fn timeouts(&self) -> &[ExecutionError] {
        &self.timeouts
    }

    /// The timeout that triggered this rescue, if it is one.
    pub fn timed_out(&self) -> Option<&ExecutionError> {
        self.timeouts.last()
    }
}

/// Body of an action.
pub enum ActionKind<Env, A, T> {
    /// Resolves with a fixed value
    Immediate(T),
    /// Runs a callable for every invocation
    Computed(Callable<Env, A, T>),
}

/// A user-supplied unit of work.
///
/// # Example
///
/// ```rust
/// use switchboard::core::{Directive, Trigger};
/// use switchboard::effects::{Action, TransitionAction, TransitionArgs};
/// use std::time::Duration;
///
/// let fallback: TransitionAction<()> =
///     Action::immediate("dial.fallback", Directive::trigger(Trigger::to("voicemail")));
///
/// let dial: TransitionAction<()> = Action::computed("dial", |args: TransitionArgs, call| async move {
///     call.cancelled().await;
///     Ok(Directive::trigger(Trigger::go("connected", args.hints)))
/// })
/// .with_timeout(Duration::from_secs(30))
/// .on_timeout(fallback);
///
/// assert_eq!(dial.timeout(), Some(Duration::from_secs(30)));
/// assert!(dial.rescue().is_some());
/// ```
pub struct Action<Env, A, T> {
    id: String,
    kind: ActionKind<Env, A, T>,
    timeout: Option<Duration>,
    on_timeout: Option<Box<Action<Env, A, T>>>,
}

impl<Env, A, T> Action<Env, A, T> {
    /// An action that resolves with `value`.
    pub fn immediate(id: impl Into<String>, value: T) -> Self {
        Self {
            id: id.into(),
            kind: ActionKind::Immediate(value),
            timeout: None,
            on_timeout: None,
        }
    }

    /// An action that runs `callable` on each invocation.
    pub fn computed<F, Fut>(id: impl Into<String>, callable: F) -> Self
    where
        F: Fn(A, Invocation<Env>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        Env: 'static,
        A: 'static,
        T: 'static,
    {
        let callable: Callable<Env, A, T> =
            Arc::new(move |args: A, invocation: Invocation<Env>| callable(args, invocation).boxed());
        Self {
            id: id.into(),
            kind: ActionKind::Computed(callable),
            timeout: None,
            on_timeout: None,
        }
    }

    /// Bound the action by `timeout`. Zero always expires.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Remove any time bound.
    pub fn unbounded(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Run `rescue` when this action's timeout expires.
    pub fn on_timeout(mut self, rescue: Action<Env, A, T>) -> Self {
        self.on_timeout = Some(Box::new(rescue));
        self
    }

    /// Identifier used in logs and timeout errors.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the action is a fixed value or a callable.
    pub fn kind(&self) -> &ActionKind<Env, A, T> {
        &self.kind
    }

    /// Time budget, if bounded.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Action run when this one times out.
    pub fn rescue(&self) -> Option<&Action<Env, A, T>> {
        self.on_timeout.as_deref()
    }

    /// Depth of the rescue chain below this action.
    pub fn rescue_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.rescue();
        while let Some(rescue) = current {
            depth += 1;
            current = rescue.rescue();
        }
        depth
    }
}

impl<Env, A, T> Action<Env, A, T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn invoke(&self, args: A, invocation: Invocation<Env>) -> HandlerFuture<T> {
        match &self.kind {
            ActionKind::Immediate(value) => futures::future::ready(Ok(value.clone())).boxed(),
            ActionKind::Computed(callable) => callable(args, invocation),
        }
    }
}

impl<Env, A, T: Clone> Clone for Action<Env, A, T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            kind: match &self.kind {
                ActionKind::Immediate(value) => ActionKind::Immediate(value.clone()),
                ActionKind::Computed(callable) => ActionKind::Computed(Arc::clone(callable)),
            },
            timeout: self.timeout,
            on_timeout: self.on_timeout.clone(),
        }
    }
}

impl<Env, A, T> fmt::Debug for Action<Env, A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ActionKind::Immediate(_) => "immediate",
            ActionKind::Computed(_) => "computed",
        };
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("kind", &kind)
            .field("timeout", &self.timeout)
            .field("on_timeout", &self.on_timeout)
            .finish()
    }
}
