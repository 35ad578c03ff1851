//! Severity-ranked run results.

use crate::core::MachineStatus;
use crate::effects::{ExecutionError, Termination};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Outcome of one stage, ordered by severity.
///
/// `Skipped < Success < Failure < Tripped`; a run reports its most severe
/// stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Skipped,
    Success,
    /// Recoverable failure: a rejected or timed-out action
    Failure,
    /// The engine itself can no longer be trusted
    Tripped,
}

impl StageStatus {
    /// Stage status for an error.
    pub fn for_error(error: &ExecutionError) -> Self {
        if error.is_unrecoverable() {
            Self::Tripped
        } else {
            Self::Failure
        }
    }
}

impl From<MachineStatus> for StageStatus {
    fn from(status: MachineStatus) -> Self {
        match status {
            MachineStatus::Finished => Self::Success,
            MachineStatus::Failed | MachineStatus::Aborted => Self::Failure,
            MachineStatus::Tripped => Self::Tripped,
        }
    }
}

/// Result of a single stage.
#[derive(Clone, Debug)]
pub struct StageResult {
    pub status: StageStatus,
    pub value: Value,
    pub error: Option<ExecutionError>,
    pub duration: Duration,
}

impl StageResult {
    pub fn skipped() -> Self {
        Self {
            status: StageStatus::Skipped,
            value: Value::Null,
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub fn success(value: Value, duration: Duration) -> Self {
        Self {
            status: StageStatus::Success,
            value,
            error: None,
            duration,
        }
    }

    pub fn failed(error: ExecutionError, duration: Duration) -> Self {
        Self {
            status: StageStatus::for_error(&error),
            value: Value::String(error.to_string()),
            error: Some(error),
            duration,
        }
    }

    pub fn from_termination(termination: Termination, duration: Duration) -> Self {
        Self {
            status: termination.status.into(),
            value: termination.value,
            error: termination.error,
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }

    fn summary(&self) -> Value {
        json!({
            "status": self.status,
            "value": self.value,
            "error": self.error.as_ref().map(ToString::to_string),
            "duration_ms": self.duration.as_millis() as u64,
        })
    }
}

/// Per-stage results of a run.
#[derive(Clone, Debug)]
pub struct Stages {
    pub initialization: StageResult,
    pub scenario: StageResult,
    pub termination: StageResult,
}

impl Stages {
    fn iter(&self) -> impl Iterator<Item = &StageResult> {
        [&self.initialization, &self.scenario, &self.termination].into_iter()
    }
}

/// Aggregated result of initialization, scenario and termination.
#[derive(Clone, Debug)]
pub struct RunResult {
    pub status: StageStatus,
    pub stages: Stages,
    /// Error of the earliest stage at the reported severity
    pub error: Option<ExecutionError>,
    pub duration: Duration,
}

impl RunResult {
    pub fn aggregate(stages: Stages, duration: Duration) -> Self {
        let status = stages
            .iter()
            .map(|stage| stage.status)
            .max()
            .unwrap_or(StageStatus::Skipped);
        let error = stages
            .iter()
            .filter(|stage| stage.status == status)
            .find_map(|stage| stage.error.clone());

        Self {
            status,
            stages,
            error,
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }

    /// JSON view for hosts that report run results.
    pub fn summary(&self) -> Value {
        json!({
            "status": self.status,
            "error": self.error.as_ref().map(ToString::to_string),
            "duration_ms": self.duration.as_millis() as u64,
            "stages": {
                "initialization": self.stages.initialization.summary(),
                "scenario": self.stages.scenario.summary(),
                "termination": self.stages.termination.summary(),
            },
        })
    }
}
