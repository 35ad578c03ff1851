//! Initialization, scenario and termination, in that order.

use crate::builder::Scenario;
use crate::config::EngineConfig;
use crate::core::{Hints, MachineStatus};
use crate::effects::{Action, ExecutionError, Executor, StateMachine};
use crate::stages::result::{RunResult, StageResult, Stages};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

/// Prepares the environment before the scenario; receives the run hints.
pub type InitializationAction<Env> = Action<Env, Hints, Value>;

/// Cleans up after the scenario; receives the scenario stage result.
pub type TerminationAction<Env> = Action<Env, StageResult, Value>;

/// Runs a scenario between optional initialization and termination actions.
///
/// Termination always runs. A failed initialization skips the scenario.
pub struct Runner<Env> {
    scenario: Scenario<Env>,
    env: Env,
    config: EngineConfig,
    initialization: Option<InitializationAction<Env>>,
    termination: Option<TerminationAction<Env>>,
}

impl<Env> Runner<Env>
where
    Env: Clone + Send + Sync + 'static,
{
    pub fn new(scenario: Scenario<Env>, env: Env) -> Self {
        Self {
            scenario,
            env,
            config: EngineConfig::default(),
            initialization: None,
            termination: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_initialization(mut self, action: InitializationAction<Env>) -> Self {
        self.initialization = Some(action);
        self
    }

    pub fn with_termination(mut self, action: TerminationAction<Env>) -> Self {
        self.termination = Some(action);
        self
    }

    pub async fn run(&self, hints: Hints) -> RunResult {
        let started = Instant::now();
        let executor = Executor::with_config(self.env.clone(), &self.config);

        let initialization = match &self.initialization {
            Some(action) => run_stage(&executor, action, hints.clone()).await,
            None => StageResult::success(Value::Null, std::time::Duration::ZERO),
        };

        let scenario = if initialization.is_success() {
            self.run_scenario(hints).await
        } else {
            warn!(status = ?initialization.status, "initialization failed, skipping scenario");
            StageResult::skipped()
        };

        let termination = match &self.termination {
            Some(action) => run_stage(&executor, action, scenario.clone()).await,
            None => StageResult::skipped(),
        };

        let result = RunResult::aggregate(
            Stages {
                initialization,
                scenario,
                termination,
            },
            started.elapsed(),
        );
        info!(status = ?result.status, duration = ?result.duration, "run complete");
        result
    }

    async fn run_scenario(&self, hints: Hints) -> StageResult {
        let started = Instant::now();
        let machine = StateMachine::with_config(self.scenario.clone(), self.env.clone(), &self.config);
        let handle = match machine.run(hints) {
            Ok(handle) => handle,
            Err(error) => return StageResult::failed(error, started.elapsed()),
        };

        let Some(limit) = self.scenario.timeout() else {
            return StageResult::from_termination(handle.wait().await, started.elapsed());
        };

        match tokio::time::timeout(limit, handle.clone().wait()).await {
            Ok(termination) => StageResult::from_termination(termination, started.elapsed()),
            Err(_) => {
                warn!(?limit, "scenario timed out, terminating");
                let forced = machine.terminate().is_ok();
                let termination = handle.wait().await;
                if forced && termination.status == MachineStatus::Aborted {
                    let error = ExecutionError::TimedOut {
                        action: "scenario".to_string(),
                        timeout: limit,
                    };
                    StageResult::failed(error, started.elapsed())
                } else {
                    StageResult::from_termination(termination, started.elapsed())
                }
            }
        }
    }
}

async fn run_stage<Env, A>(executor: &Executor<Env>, action: &Action<Env, A, Value>, args: A) -> StageResult
where
    Env: Clone + Send + Sync + 'static,
    A: Clone + Send + 'static,
{
    let started = Instant::now();
    match executor.run_handler(action, args, None).await {
        Ok(value) => StageResult::success(value, started.elapsed()),
        Err(error) => {
            warn!(action = %action.id(), %error, "stage action failed");
            StageResult::failed(error, started.elapsed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ScenarioBuilder, StateBuilder};
    use crate::core::{Directive, Trigger};
    use crate::effects::Invocation;
    use crate::stages::StageStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn scenario() -> Scenario<()> {
        ScenarioBuilder::new()
            .state(StateBuilder::new("A").entrypoint().transition(Action::immediate(
                "A.transition",
                Directive::trigger(Trigger::to("B")),
            )))
            .state(StateBuilder::new("B").terminal().transition(Action::immediate(
                "B.transition",
                Directive::idle().with_value(json!(42)),
            )))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn successful_run_without_stage_actions() {
        let result = Runner::new(scenario(), ()).run(Value::Null).await;

        assert_eq!(result.status, StageStatus::Success);
        assert_eq!(result.stages.scenario.value, json!(42));
        assert_eq!(result.stages.termination.status, StageStatus::Skipped);
    }

    #[tokio::test]
    async fn failed_initialization_skips_scenario_but_not_termination() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let termination: TerminationAction<()> = {
            let cleanups = Arc::clone(&cleanups);
            Action::computed("cleanup", move |scenario: StageResult, _call: Invocation<()>| {
                let cleanups = Arc::clone(&cleanups);
                async move {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(scenario.status))
                }
            })
        };

        let result = Runner::new(scenario(), ())
            .with_initialization(Action::computed("setup", |_: Hints, _call: Invocation<()>| async move {
                Err(anyhow::anyhow!("database unavailable"))
            }))
            .with_termination(termination)
            .run(Value::Null)
            .await;

        assert_eq!(result.status, StageStatus::Failure);
        assert_eq!(result.stages.scenario.status, StageStatus::Skipped);
        assert_eq!(result.stages.termination.value, json!("skipped"));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }
}
