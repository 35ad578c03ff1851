//! Runtime errors raised while executing scenario actions.

use crate::core::StateId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of an [`ExecutionError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A user action rejected (returned an error or panicked)
    Action,
    /// An action exceeded its time budget and no rescue succeeded
    Timeout,
    /// An operation was called in a lifecycle state that forbids it
    IllegalState,
    /// A directive or rescue named a state the scenario does not define
    UnknownState,
    /// The engine can no longer trust its own state
    Unrecoverable,
}

/// Errors that can occur while running actions and transitions.
///
/// Cheap to clone: the same error is recorded in history, handed to the
/// scenario error handler and carried in the final result.
#[derive(Clone, Debug, Error)]
pub enum ExecutionError {
    #[error("action '{action}' failed: {cause:#}")]
    Rejected {
        action: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("action '{action}' timed out after {timeout:?}")]
    TimedOut { action: String, timeout: Duration },

    #[error("transition to '{target}' failed: {cause}")]
    Transition {
        target: StateId,
        #[source]
        cause: Box<ExecutionError>,
    },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("unknown state '{0}'")]
    UnknownState(StateId),

    #[error("unrecoverable fault: {0}")]
    Unrecoverable(String),
}

impl ExecutionError {
    /// Convert an error returned by a user handler.
    ///
    /// Handlers may return an `ExecutionError` themselves (for example
    /// [`ExecutionError::Unrecoverable`]); those are adopted as they are.
    pub fn from_handler(action: &str, error: anyhow::Error) -> Self {
        match error.downcast::<ExecutionError>() {
            Ok(error) => error,
            Err(cause) => Self::Rejected {
                action: action.to_string(),
                cause: Arc::new(cause),
            },
        }
    }

    pub fn transition(target: impl Into<StateId>, cause: ExecutionError) -> Self {
        Self::Transition {
            target: target.into(),
            cause: Box::new(cause),
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    pub fn unrecoverable(message: impl Into<String>) -> Self {
        Self::Unrecoverable(message.into())
    }

    /// The innermost error, looking through transition wrappers.
    pub fn root(&self) -> &ExecutionError {
        match self {
            Self::Transition { cause, .. } => cause.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Rejected { .. } => ErrorKind::Action,
            Self::TimedOut { .. } => ErrorKind::Timeout,
            Self::Transition { cause, .. } => cause.kind(),
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::UnknownState(_) => ErrorKind::UnknownState,
            Self::Unrecoverable(_) => ErrorKind::Unrecoverable,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Unrecoverable faults bypass the scenario error handler.
    pub fn is_unrecoverable(&self) -> bool {
        self.kind() == ErrorKind::Unrecoverable
    }
}
