//! Lifecycle enums for transitions and the state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle of a single transition.
///
/// `Idle -> Executing -> {Executed | ExecutionFailure | TimedOut}`, and from
/// `Executing` only, `Aborting -> {Aborted | AbortFailure}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionStatus {
    Idle,
    Executing,
    Executed,
    ExecutionFailure,
    TimedOut,
    Aborting,
    Aborted,
    AbortFailure,
}

impl TransitionStatus {
    /// Whether the transition has reached a final outcome.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            Self::Executed
                | Self::ExecutionFailure
                | Self::TimedOut
                | Self::Aborted
                | Self::AbortFailure
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::ExecutionFailure | Self::TimedOut | Self::AbortFailure
        )
    }
}

/// Lifecycle of the state machine itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Idle,
    Running,
    ErrorHandling,
    Terminating,
    Terminated,
}

impl Stage {
    /// Restricted stages reject externally requested transitions.
    pub fn is_restricted(self) -> bool {
        matches!(
            self,
            Self::ErrorHandling | Self::Terminating | Self::Terminated
        )
    }

    /// Terminal stages reject every launch, including chained ones.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated)
    }
}

/// Final status of a scenario run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineStatus {
    /// A terminal state was reached.
    Finished,
    /// A transition failed and the scenario error handler did not rescue it.
    Failed,
    /// An unrecoverable fault bypassed the scenario error handler.
    Tripped,
    /// The machine was terminated from outside.
    Aborted,
}
