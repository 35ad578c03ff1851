//! Scenario state machine.
//!
//! The machine launches [`Transition`]s, supersedes the head-of-line one when
//! a new move is requested, recovers from failures through the scenario's
//! error handler, and drains every outstanding transition before it reports
//! termination.
//!
//! All mutation happens on a single driver task. Public methods validate
//! their request, then hand a command to the driver. Settled transitions and
//! deferred work (computed hints, the error handler) are polled by the driver
//! itself. Once every [`StateMachine`] clone is dropped and no work is
//! outstanding, nothing can move the run forward, so it finalizes `Aborted`.

use crate::builder::Scenario;
use crate::config::EngineConfig;
use crate::core::{
    HistoryEntry, Hints, MachineStatus, NextState, Stage, State, StateHistory, StateId,
    Trigger, TransitionStatus,
};
use crate::effects::action::ErrorArgs;
use crate::effects::error::ExecutionError;
use crate::effects::executor::Executor;
use crate::effects::transition::{Transition, TransitionOutcome};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Final result of a run.
#[derive(Clone, Debug)]
pub struct Termination {
    pub status: MachineStatus,
    /// Directive value of the terminal state, or the rendered error
    pub value: Value,
    pub error: Option<ExecutionError>,
}

impl Termination {
    pub fn finished(value: Value) -> Self {
        Self {
            status: MachineStatus::Finished,
            value,
            error: None,
        }
    }

    pub fn failed(error: ExecutionError) -> Self {
        Self::with_error(MachineStatus::Failed, error)
    }

    pub fn tripped(error: ExecutionError) -> Self {
        Self::with_error(MachineStatus::Tripped, error)
    }

    pub fn aborted() -> Self {
        Self {
            status: MachineStatus::Aborted,
            value: Value::Null,
            error: None,
        }
    }

    fn with_error(status: MachineStatus, error: ExecutionError) -> Self {
        Self {
            status,
            value: Value::String(error.to_string()),
            error: Some(error),
        }
    }
}

/// Resolves once the machine reaches `Terminated`.
#[derive(Clone, Debug)]
pub struct TerminationHandle {
    receiver: watch::Receiver<Option<Termination>>,
}

impl TerminationHandle {
    /// Wait for the termination.
    pub async fn wait(mut self) -> Termination {
        loop {
            let current = self.receiver.borrow_and_update().clone();
            if let Some(termination) = current {
                return termination;
            }
            if self.receiver.changed().await.is_err() {
                return Termination::tripped(ExecutionError::unrecoverable(
                    "state machine stopped before terminating",
                ));
            }
        }
    }

    /// The termination, if the machine already terminated.
    pub fn peek(&self) -> Option<Termination> {
        self.receiver.borrow().clone()
    }
}

enum Command {
    /// Externally requested move, validated by the caller
    TransitionTo(NextState),
    Terminate,
    /// Declared trigger whose hints finished evaluating
    Chain { generation: u64, next: NextState },
    /// Move returned by the scenario error handler
    Rescue { generation: u64, next: NextState },
    Recover {
        generation: u64,
        error: ExecutionError,
        origin: Option<StateId>,
        target: StateId,
        hints: Hints,
    },
    Finalize {
        generation: u64,
        termination: Termination,
    },
}

struct Core<Env> {
    current: Option<Arc<State<Env>>>,
    head: Option<Arc<Transition<Env>>>,
    background: HashMap<Uuid, Arc<Transition<Env>>>,
    stage: Stage,
    history: StateHistory,
    /// Bumped on every launch and finalization; deferred work tagged with an
    /// older generation is dropped.
    generation: u64,
    termination: Option<Termination>,
}

impl<Env> Core<Env> {
    fn origin(&self) -> Option<StateId> {
        self.current.as_ref().map(|state| state.id().to_string())
    }

    fn record(&mut self, transition: &Transition<Env>, status: TransitionStatus, value: Value) {
        self.history.record(HistoryEntry::new(
            transition.id(),
            transition.origin().map(str::to_string),
            transition.target().id().to_string(),
            transition.hints().clone(),
            status,
            value,
        ));
    }
}

struct Shared<Env> {
    scenario: Scenario<Env>,
    executor: Executor<Env>,
    core: Mutex<Core<Env>>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    termination: watch::Sender<Option<Termination>>,
}

/// Drives a [`Scenario`] from its entrypoint to termination.
///
/// Cheap to clone; clones share the same run. Methods that start or steer
/// the run must be called from within a Tokio runtime. Dropping every clone
/// lets outstanding work finish; a run left idle afterwards ends `Aborted`.
///
/// # Example
///
/// ```rust
/// use switchboard::builder::{ScenarioBuilder, StateBuilder};
/// use switchboard::core::{Directive, MachineStatus, Trigger};
/// use switchboard::effects::{Action, StateMachine};
/// use serde_json::{json, Value};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let scenario = ScenarioBuilder::new()
///     .state(StateBuilder::new("greet").entrypoint().transition(Action::immediate(
///         "greet.transition",
///         Directive::trigger(Trigger::to("done")),
///     )))
///     .state(StateBuilder::new("done").terminal().transition(Action::immediate(
///         "done.transition",
///         Directive::idle().with_value(json!("bye")),
///     )))
///     .build()
///     .unwrap();
///
/// let machine = StateMachine::new(scenario, ());
/// let termination = machine.run(Value::Null).unwrap().wait().await;
///
/// assert_eq!(termination.status, MachineStatus::Finished);
/// assert_eq!(termination.value, json!("bye"));
/// # }
/// ```
pub struct StateMachine<Env> {
    shared: Arc<Shared<Env>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl<Env> Clone for StateMachine<Env> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            commands: self.commands.clone(),
        }
    }
}

impl<Env> StateMachine<Env>
where
    Env: Clone + Send + Sync + 'static,
{
    pub fn new(scenario: Scenario<Env>, env: Env) -> Self {
        Self::with_config(scenario, env, &EngineConfig::default())
    }

    pub fn with_config(scenario: Scenario<Env>, env: Env, config: &EngineConfig) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (termination, _) = watch::channel(None);
        let core = Core {
            current: None,
            head: None,
            background: HashMap::new(),
            stage: Stage::Idle,
            history: StateHistory::with_capacity(config.history_capacity()),
            generation: 0,
            termination: None,
        };

        Self {
            shared: Arc::new(Shared {
                scenario,
                executor: Executor::with_config(env, config),
                core: Mutex::new(core),
                inbox: Mutex::new(Some(inbox)),
                termination,
            }),
            commands,
        }
    }

    /// Launch the entrypoint with `hints`. Callable once.
    pub fn run(&self, hints: Hints) -> Result<TerminationHandle, ExecutionError> {
        let inbox = self
            .shared
            .inbox
            .lock()
            .take()
            .ok_or_else(|| ExecutionError::illegal_state("state machine already started"))?;

        let entrypoint = self.shared.scenario.entrypoint();
        info!(entrypoint = %entrypoint.id(), states = self.shared.scenario.len(), "starting scenario");

        let mut driver = Driver {
            shared: Arc::clone(&self.shared),
            inbox,
            listening: true,
            pending: FuturesUnordered::new(),
            deferred: FuturesUnordered::new(),
        };
        driver.launch(NextState::new(entrypoint.id(), hints))?;
        tokio::spawn(driver.drive());

        Ok(self.termination())
    }

    /// Request a move into `id`.
    ///
    /// Rejected for unknown states, before the run starts, and while the
    /// stage is restricted.
    pub fn transition_to(&self, id: impl Into<StateId>, hints: Hints) -> Result<(), ExecutionError> {
        let id = id.into();
        if self.shared.scenario.state(&id).is_none() {
            return Err(ExecutionError::UnknownState(id));
        }
        if self.shared.inbox.lock().is_some() {
            return Err(ExecutionError::illegal_state("state machine has not been started"));
        }

        let stage = self.stage();
        if stage.is_restricted() {
            warn!(target_state = %id, ?stage, "rejected external transition");
            return Err(ExecutionError::illegal_state(format!(
                "cannot transition to '{id}' while {stage:?}"
            )));
        }

        self.send(Command::TransitionTo(NextState::new(id, hints)))
    }

    /// Abort the head-of-line transition and finalize as `Aborted`.
    pub fn terminate(&self) -> Result<(), ExecutionError> {
        let stage = self.stage();
        if stage.is_terminal() {
            return Err(ExecutionError::illegal_state(format!(
                "state machine already {stage:?}"
            )));
        }

        // Never started: nothing to drain.
        if self.shared.inbox.lock().take().is_some() {
            self.shared.core.lock().stage = Stage::Terminated;
            self.shared.termination.send_replace(Some(Termination::aborted()));
            info!("scenario terminated before start");
            return Ok(());
        }

        self.send(Command::Terminate)
    }

    fn send(&self, command: Command) -> Result<(), ExecutionError> {
        self.commands
            .send(command)
            .map_err(|_| ExecutionError::illegal_state("state machine has stopped"))
    }
}

impl<Env> StateMachine<Env> {
    pub fn scenario(&self) -> &Scenario<Env> {
        &self.shared.scenario
    }

    /// Last state successfully entered.
    pub fn state(&self) -> Option<Arc<State<Env>>> {
        self.shared.core.lock().current.clone()
    }

    pub fn head_transition(&self) -> Option<Arc<Transition<Env>>> {
        self.shared.core.lock().head.clone()
    }

    pub fn stage(&self) -> Stage {
        self.shared.core.lock().stage
    }

    /// Snapshot of the bounded history.
    pub fn history(&self) -> StateHistory {
        self.shared.core.lock().history.clone()
    }

    pub fn termination(&self) -> TerminationHandle {
        TerminationHandle {
            receiver: self.shared.termination.subscribe(),
        }
    }
}

type Settled<Env> = BoxFuture<'static, (Arc<Transition<Env>>, TransitionOutcome)>;

struct Driver<Env> {
    shared: Arc<Shared<Env>>,
    inbox: mpsc::UnboundedReceiver<Command>,
    /// False once every `StateMachine` clone is gone
    listening: bool,
    pending: FuturesUnordered<Settled<Env>>,
    deferred: FuturesUnordered<JoinHandle<Command>>,
}

impl<Env> Driver<Env>
where
    Env: Clone + Send + Sync + 'static,
{
    fn core(&self) -> MutexGuard<'_, Core<Env>> {
        self.shared.core.lock()
    }

    async fn drive(mut self) {
        loop {
            if self.try_complete() {
                break;
            }

            tokio::select! {
                Some((transition, outcome)) = self.pending.next(), if !self.pending.is_empty() => {
                    self.dispatch(transition, outcome);
                }
                Some(joined) = self.deferred.next(), if !self.deferred.is_empty() => match joined {
                    Ok(command) => self.handle(command),
                    Err(join) => {
                        error!(error = %join, "deferred work did not complete");
                        self.finalize(Termination::tripped(ExecutionError::unrecoverable(format!(
                            "deferred work did not complete: {join}"
                        ))));
                    }
                },
                command = self.inbox.recv(), if self.listening => match command {
                    Some(command) => self.handle(command),
                    None => {
                        debug!("every state machine handle dropped");
                        self.listening = false;
                    }
                },
                else => {
                    info!("no handles and no outstanding work, aborting scenario");
                    self.finalize(Termination::aborted());
                    self.try_complete();
                    break;
                }
            }
        }
        debug!("state machine driver stopped");
    }

    fn launch(&mut self, next: NextState) -> Result<(), ExecutionError> {
        let target = self
            .shared
            .scenario
            .state(&next.id)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownState(next.id.clone()))?;

        let transition = {
            let mut core = self.core();
            if core.stage.is_terminal() {
                return Err(ExecutionError::illegal_state(format!(
                    "cannot launch '{}' while {:?}",
                    next.id, core.stage
                )));
            }

            if let Some(head) = core.head.take() {
                self.supersede(&mut core, &head);
            }

            let transition = Arc::new(Transition::new(core.origin(), target, next.hints));
            core.generation += 1;
            core.head = Some(Arc::clone(&transition));
            core.background.insert(transition.id(), Arc::clone(&transition));
            core.stage = Stage::Running;
            transition
        };

        transition.run(&self.shared.executor)?;
        self.core()
            .record(&transition, TransitionStatus::Executing, Value::Null);
        info!(
            transition = %transition.id(),
            origin = ?transition.origin(),
            target_state = %transition.target().id(),
            "launched transition"
        );
        self.track(transition);
        Ok(())
    }

    /// Abort `head`; it stays in the background set until it settles.
    fn supersede(&self, core: &mut Core<Env>, head: &Arc<Transition<Env>>) {
        match head.abort(&self.shared.executor) {
            Ok(_) => {
                core.record(head, TransitionStatus::Aborting, Value::Null);
                debug!(transition = %head.id(), "superseded transition");
            }
            Err(error) => debug!(transition = %head.id(), %error, "superseded transition already settled"),
        }
    }

    fn track(&mut self, transition: Arc<Transition<Env>>) {
        self.pending.push(
            async move {
                let outcome = transition.settled().await;
                (transition, outcome)
            }
            .boxed(),
        );
    }

    fn dispatch(&mut self, transition: Arc<Transition<Env>>, outcome: TransitionOutcome) {
        let target = Arc::clone(transition.target());
        let succeeded = outcome.is_success();
        let directive = {
            let mut core = self.core();
            core.record(&transition, outcome.status, outcome.value());
            core.background.remove(&transition.id());

            let is_head = core
                .head
                .as_ref()
                .is_some_and(|head| Arc::ptr_eq(head, &transition));
            if !is_head {
                debug!(transition = %transition.id(), status = ?outcome.status, "background transition settled");
                return;
            }
            core.head = None;

            match outcome.result {
                Ok(directive) => {
                    // The head slot is cleared before any abort.
                    debug_assert!(succeeded, "head transition settled {:?}", outcome.status);
                    core.stage = Stage::Idle;
                    core.current = Some(Arc::clone(&target));
                    directive
                }
                Err(error) => {
                    drop(core);
                    self.recover(
                        error,
                        transition.origin().map(str::to_string),
                        target.id().to_string(),
                        transition.hints().clone(),
                    );
                    return;
                }
            }
        };

        info!(state = %target.id(), "entered state");
        if target.is_terminal() {
            self.finalize(Termination::finished(directive.value));
            return;
        }

        if let Some(next) = directive.next().into_next() {
            self.follow(next);
        } else if let Some(declared) = target.declared_trigger() {
            let generation = self.core().generation;
            let shared = Arc::clone(&self.shared);
            let declared = declared.clone();
            let origin = Some(target.id().to_string());
            self.deferred.push(tokio::spawn(async move {
                match shared.executor.run_handler(&declared.hints, (), None).await {
                    Ok(hints) => Command::Chain {
                        generation,
                        next: NextState::new(declared.id, hints),
                    },
                    Err(error) => Command::Recover {
                        generation,
                        error,
                        origin,
                        target: declared.id,
                        hints: Value::Null,
                    },
                }
            }));
        } else {
            debug!(state = %target.id(), "idle, awaiting external trigger");
        }
    }

    /// Launch `next` from the current state; unknown targets go to recovery.
    fn follow(&mut self, next: NextState) {
        if self.shared.scenario.state(&next.id).is_none() {
            let origin = self.core().origin();
            self.recover(ExecutionError::UnknownState(next.id.clone()), origin, next.id, next.hints);
            return;
        }
        if let Err(error) = self.launch(next) {
            self.finalize(Termination::failed(error));
        }
    }

    fn recover(&mut self, failure: ExecutionError, origin: Option<StateId>, target: StateId, hints: Hints) {
        let generation = {
            let mut core = self.core();
            core.stage = Stage::ErrorHandling;
            core.generation
        };

        if failure.is_unrecoverable() {
            error!(error = %failure, "unrecoverable fault, tripping scenario");
            self.finalize(Termination::tripped(failure));
            return;
        }

        warn!(error = %failure, target_state = %target, "transition failed, running error handler");
        let shared = Arc::clone(&self.shared);
        self.deferred.push(tokio::spawn(async move {
            let args = ErrorArgs {
                error: failure.clone(),
                origin,
                target,
                hints,
            };
            match shared.executor.run_handler(shared.scenario.on_error(), args, None).await {
                Ok(Trigger::Go(next)) => Command::Rescue { generation, next },
                Ok(Trigger::None) => Command::Finalize {
                    generation,
                    termination: Termination::failed(failure),
                },
                Err(handler) if handler.is_unrecoverable() => Command::Finalize {
                    generation,
                    termination: Termination::tripped(handler),
                },
                Err(handler) => {
                    warn!(error = %handler, "error handler failed");
                    Command::Finalize {
                        generation,
                        termination: Termination::failed(failure),
                    }
                }
            }
        }));
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::TransitionTo(next) => {
                let stage = self.core().stage;
                if stage.is_restricted() {
                    warn!(target_state = %next.id, ?stage, "dropped external transition");
                    return;
                }
                if let Err(error) = self.launch(next) {
                    warn!(%error, "external transition failed to launch");
                }
            }
            Command::Terminate => self.terminate(),
            Command::Chain { generation, next } => {
                if self.is_current(generation) {
                    self.follow(next);
                }
            }
            Command::Rescue { generation, next } => {
                if !self.is_current(generation) {
                    return;
                }
                info!(target_state = %next.id, "error handler rescued scenario");
                if let Err(error) = self.launch(next) {
                    self.finalize(Termination::failed(error));
                }
            }
            Command::Recover {
                generation,
                error,
                origin,
                target,
                hints,
            } => {
                if self.is_current(generation) {
                    self.recover(error, origin, target, hints);
                }
            }
            Command::Finalize {
                generation,
                termination,
            } => {
                if self.is_current(generation) {
                    self.finalize(termination);
                }
            }
        }
    }

    /// Deferred work still applies: nothing launched since, not terminating.
    fn is_current(&self, generation: u64) -> bool {
        let core = self.core();
        core.generation == generation && core.head.is_none() && !core.stage.is_terminal()
    }

    fn terminate(&mut self) {
        {
            let mut core = self.core();
            if core.stage.is_terminal() {
                return;
            }
            if let Some(head) = core.head.take() {
                self.supersede(&mut core, &head);
            }
        }
        self.finalize(Termination::aborted());
    }

    fn finalize(&mut self, termination: Termination) {
        let mut core = self.core();
        if core.stage.is_terminal() {
            return;
        }
        info!(status = ?termination.status, outstanding = core.background.len(), "finalizing scenario");
        core.stage = Stage::Terminating;
        core.generation += 1;
        core.termination = Some(termination);
    }

    /// Move to `Terminated` once every outstanding transition has settled.
    fn try_complete(&mut self) -> bool {
        let termination = {
            let mut core = self.core();
            match core.stage {
                Stage::Terminated => return true,
                Stage::Terminating if core.background.is_empty() => {
                    core.stage = Stage::Terminated;
                    core.termination.take()
                }
                _ => return false,
            }
        };

        let termination = termination.unwrap_or_else(Termination::aborted);
        info!(status = ?termination.status, "scenario terminated");
        self.shared.termination.send_replace(Some(termination));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ScenarioBuilder, StateBuilder};
    use crate::core::Directive;
    use crate::effects::action::{Action, Invocation, TransitionArgs};
    use serde_json::json;
    use std::time::Duration;

    fn linear() -> Scenario<()> {
        ScenarioBuilder::new()
            .state(StateBuilder::new("A").entrypoint().transition(Action::immediate(
                "A.transition",
                Directive::trigger(Trigger::to("B")),
            )))
            .state(StateBuilder::new("B").terminal().transition(Action::immediate(
                "B.transition",
                Directive::idle().with_value(json!("done")),
            )))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn runs_to_terminal_state() {
        let machine = StateMachine::new(linear(), ());
        let termination = machine.run(Value::Null).unwrap().wait().await;

        assert_eq!(termination.status, MachineStatus::Finished);
        assert_eq!(termination.value, json!("done"));
        assert_eq!(machine.stage(), Stage::Terminated);
        assert_eq!(machine.state().map(|s| s.id().to_string()), Some("B".to_string()));
        assert_eq!(machine.history().path(), vec!["A", "B"]);
        assert!(machine.head_transition().is_none());
    }

    #[tokio::test]
    async fn second_run_is_illegal() {
        let machine = StateMachine::new(linear(), ());
        let handle = machine.run(Value::Null).unwrap();

        let error = machine.run(Value::Null).unwrap_err();
        assert!(matches!(error, ExecutionError::IllegalState(_)));
        assert_eq!(handle.wait().await.status, MachineStatus::Finished);
    }

    #[tokio::test]
    async fn terminate_before_run_resolves_aborted() {
        let machine = StateMachine::new(linear(), ());
        machine.terminate().unwrap();

        assert_eq!(machine.termination().wait().await.status, MachineStatus::Aborted);
        assert!(machine.run(Value::Null).is_err());
        assert!(machine.terminate().is_err());
    }

    #[tokio::test]
    async fn transition_to_validates_before_sending() {
        let machine = StateMachine::new(linear(), ());

        assert!(matches!(
            machine.transition_to("Z", Value::Null),
            Err(ExecutionError::UnknownState(ref id)) if id == "Z"
        ));
        assert!(matches!(
            machine.transition_to("B", Value::Null),
            Err(ExecutionError::IllegalState(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_drains_superseded_transition() {
        let scenario = ScenarioBuilder::new()
            .state(StateBuilder::new("A").entrypoint().transition(Action::computed(
                "A.transition",
                |_: TransitionArgs, _call: Invocation<()>| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Directive::idle())
                },
            )))
            .build()
            .unwrap();
        let machine = StateMachine::new(scenario, ());
        let handle = machine.run(Value::Null).unwrap();

        machine.terminate().unwrap();
        let started = tokio::time::Instant::now();
        let termination = handle.wait().await;

        assert_eq!(termination.status, MachineStatus::Aborted);
        assert!(started.elapsed() < Duration::from_millis(50));
        let statuses: Vec<_> = machine.history().entries().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                TransitionStatus::Executing,
                TransitionStatus::Aborting,
                TransitionStatus::Aborted
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn driver_releases_idle_machine_when_handles_drop() {
        let scenario = ScenarioBuilder::new()
            .state(StateBuilder::new("lobby").entrypoint())
            .state(StateBuilder::new("exit").terminal())
            .build()
            .unwrap();
        let machine = StateMachine::new(scenario, ());
        let handle = machine.run(Value::Null).unwrap();
        while machine.state().is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let shared = Arc::downgrade(&machine.shared);
        drop(machine);
        drop(handle);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(shared.upgrade().is_none());
    }
}
