//! Handler invocation with timeouts and rescue cascades.

use crate::config::EngineConfig;
use crate::effects::action::{Action, Invocation};
use crate::effects::cancel::child_token;
use crate::effects::error::ExecutionError;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Runs actions bound to an execution context.
///
/// Each invocation runs on its own task with a fresh cancellation token. When
/// an action's timeout fires first, its token is cancelled and the task is
/// left to finish on its own; the result is discarded. If the action has a
/// rescue, the rescue runs with the same arguments plus the timeout error and
/// its outcome becomes final. Every link of the cascade gets its own budget.
#[derive(Clone, Debug)]
pub struct Executor<Env> {
    env: Env,
    max_rescue_depth: usize,
}

impl<Env> Executor<Env>
where
    Env: Clone + Send + Sync + 'static,
{
    pub fn new(env: Env) -> Self {
        Self::with_config(env, &EngineConfig::default())
    }

    pub fn with_config(env: Env, config: &EngineConfig) -> Self {
        Self {
            env,
            max_rescue_depth: config.max_rescue_depth(),
        }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Run `action` with `args`, racing it against its timeout.
    ///
    /// The invocation token depends on `parent` when one is given.
    #[instrument(skip_all, fields(action = %action.id()))]
    pub async fn run_handler<A, T>(
        &self,
        action: &Action<Env, A, T>,
        args: A,
        parent: Option<&CancellationToken>,
    ) -> Result<T, ExecutionError>
    where
        A: Clone + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let mut current = action;
        let mut timeouts = Vec::new();

        loop {
            let token = child_token(parent);
            let invocation = Invocation::new(self.env.clone(), token.clone(), timeouts.clone());
            let mut task = tokio::spawn(current.invoke(args.clone(), invocation));

            let Some(limit) = current.timeout() else {
                return settle(current.id(), task.await);
            };

            // A zero budget expires without racing the handler.
            if !limit.is_zero() {
                tokio::select! {
                    biased;
                    _ = tokio::time::sleep(limit) => {}
                    joined = &mut task => return settle(current.id(), joined),
                }
            }

            token.cancel();
            let error = ExecutionError::TimedOut {
                action: current.id().to_string(),
                timeout: limit,
            };

            match current.rescue() {
                Some(rescue) if timeouts.len() < self.max_rescue_depth => {
                    warn!(timed_out = %current.id(), rescue = %rescue.id(), ?limit, "action timed out, running rescue");
                    timeouts.push(error);
                    current = rescue;
                }
                Some(_) => {
                    warn!(depth = timeouts.len(), "rescue depth exhausted");
                    return Err(error);
                }
                None => {
                    debug!(?limit, "action timed out without rescue");
                    return Err(error);
                }
            }
        }
    }

    /// Invoke `action` once, ignoring its timeout and rescue.
    ///
    /// Errors and panics are still captured.
    pub async fn execute<A, T>(&self, action: &Action<Env, A, T>, args: A) -> Result<T, ExecutionError>
    where
        A: Send + 'static,
        T: Clone + Send + 'static,
    {
        let invocation = Invocation::new(self.env.clone(), CancellationToken::new(), Vec::new());
        settle(action.id(), tokio::spawn(action.invoke(args, invocation)).await)
    }
}

fn settle<T>(
    action: &str,
    joined: Result<anyhow::Result<T>, JoinError>,
) -> Result<T, ExecutionError> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(ExecutionError::from_handler(action, error)),
        Err(join) => Err(ExecutionError::Rejected {
            action: action.to_string(),
            cause: Arc::new(anyhow::anyhow!("handler did not complete: {join}")),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::action::HintsAction;
    use crate::effects::error::ErrorKind;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn stalled(id: &str) -> HintsAction<()> {
        Action::computed(id, |_: (), _call: Invocation<()>| async move {
            futures::future::pending::<()>().await;
            Ok(Value::Null)
        })
    }

    #[tokio::test]
    async fn immediate_action_resolves() {
        let executor = Executor::new(());
        let action: HintsAction<()> = Action::immediate("hints", json!({ "caller": "alice" }));

        let value = executor.run_handler(&action, (), None).await.unwrap();
        assert_eq!(value, json!({ "caller": "alice" }));
    }

    #[tokio::test]
    async fn action_is_bound_to_env() {
        let executor = Executor::new("tenant-7".to_string());
        let action: Action<String, u8, String> =
            Action::computed("greet", |n: u8, call: Invocation<String>| async move {
                Ok(format!("{}:{n}", call.env()))
            });

        assert_eq!(executor.execute(&action, 3).await.unwrap(), "tenant-7:3");
    }

    #[tokio::test]
    async fn handler_error_becomes_rejection() {
        let executor = Executor::new(());
        let action: HintsAction<()> = Action::computed("fails", |_: (), _call| async move {
            Err(anyhow::anyhow!("no route"))
        });

        let error = executor.run_handler(&action, (), None).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Action);
        assert!(error.to_string().contains("no route"));
    }

    #[tokio::test]
    async fn panicking_handler_is_captured() {
        let executor = Executor::new(());
        let action: HintsAction<()> = Action::computed("panics", |_: (), _call| async move {
            let explode = true;
            if explode {
                panic!("boom");
            }
            Ok(Value::Null)
        });

        let error = executor.run_handler(&action, (), None).await.unwrap_err();
        assert!(matches!(error, ExecutionError::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_without_rescue_times_out() {
        let executor = Executor::new(());
        let action: HintsAction<()> =
            Action::immediate("instant", Value::Null).with_timeout(Duration::ZERO);

        let error = executor.run_handler(&action, (), None).await.unwrap_err();
        assert!(error.is_timeout());
        assert!(matches!(error, ExecutionError::TimedOut { ref action, .. } if action == "instant"));
    }

    async fn zero_timeout_always_expires() {
        let executor = Executor::new(());
        let action: HintsAction<()> =
            Action::immediate("instant", Value::Null).with_timeout(Duration::ZERO);

        for _ in 0..50 {
            let error = executor.run_handler(&action, (), None).await.unwrap_err();
            assert!(error.is_timeout());
        }
    }

    #[tokio::test]
    async fn zero_timeout_expires_on_current_thread_clock() {
        zero_timeout_always_expires().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn zero_timeout_expires_on_multi_thread_clock() {
        zero_timeout_always_expires().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn zero_timeout_rescue_runs_on_real_clock() {
        let executor = Executor::new(());
        let action = Action::computed("quick", |_: (), _call: Invocation<()>| async move {
            Ok(json!("handler"))
        })
        .with_timeout(Duration::ZERO)
        .on_timeout(Action::immediate("rescue", json!("rescued")));

        for _ in 0..50 {
            assert_eq!(executor.run_handler(&action, (), None).await.unwrap(), json!("rescued"));
        }
    }

    #[tokio::test]
    async fn stalled_handler_times_out_on_real_clock() {
        let executor = Executor::new(());
        let action = stalled("stalled").with_timeout(Duration::from_millis(5));

        let started = std::time::Instant::now();
        let error = executor.run_handler(&action, (), None).await.unwrap_err();

        assert!(matches!(error, ExecutionError::TimedOut { ref action, .. } if action == "stalled"));
        assert!(started.elapsed() >= Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_with_rescue_adopts_rescue_value() {
        let executor = Executor::new(());
        let rescue: HintsAction<()> = Action::computed("rescue", |_: (), call: Invocation<()>| async move {
            let timed_out = call.timed_out().map(ExecutionError::is_timeout).unwrap_or(false);
            Ok(json!({ "rescued": timed_out }))
        });
        let action = Action::immediate("instant", Value::Null)
            .with_timeout(Duration::ZERO)
            .on_timeout(rescue);

        let value = executor.run_handler(&action, (), None).await.unwrap();
        assert_eq!(value, json!({ "rescued": true }));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_rescue_is_final() {
        let executor = Executor::new(());
        let rescue: HintsAction<()> = Action::computed("rescue", |_: (), _call| async move {
            Err(anyhow::anyhow!("rescue failed"))
        });
        let action = stalled("stalled")
            .with_timeout(Duration::from_millis(5))
            .on_timeout(rescue);

        let error = executor.run_handler(&action, (), None).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Action);
    }

    #[tokio::test(start_paused = true)]
    async fn rescue_chain_cascades_with_accumulated_timeouts() {
        let executor = Executor::new(());
        let last: HintsAction<()> = Action::computed("last", |_: (), call: Invocation<()>| async move {
            Ok(Value::from(call.timeouts().len()))
        });
        let action = stalled("first")
            .with_timeout(Duration::from_millis(5))
            .on_timeout(
                stalled("second")
                    .with_timeout(Duration::from_millis(5))
                    .on_timeout(last),
            );

        let started = tokio::time::Instant::now();
        let value = executor.run_handler(&action, (), None).await.unwrap();

        assert_eq!(value, Value::from(2));
        assert!(started.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn rescue_depth_is_bounded() {
        let config = EngineConfig::new().with_max_rescue_depth(1);
        let executor = Executor::with_config((), &config);
        let action = stalled("first")
            .with_timeout(Duration::from_millis(1))
            .on_timeout(
                stalled("second")
                    .with_timeout(Duration::from_millis(1))
                    .on_timeout(Action::immediate("never", Value::Null)),
            );

        let error = executor.run_handler(&action, (), None).await.unwrap_err();
        assert!(matches!(error, ExecutionError::TimedOut { ref action, .. } if action == "second"));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_handler_is_cancelled_but_keeps_running() {
        let executor = Executor::new(());
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicUsize::new(0));

        let action: HintsAction<()> = {
            let saw_cancel = Arc::clone(&saw_cancel);
            let finished = Arc::clone(&finished);
            Action::computed("stubborn", move |_: (), call: Invocation<()>| {
                let saw_cancel = Arc::clone(&saw_cancel);
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    saw_cancel.store(call.is_cancelled(), Ordering::SeqCst);
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            })
            .with_timeout(Duration::from_millis(5))
        };

        let error = executor.run_handler(&action, (), None).await.unwrap_err();
        assert!(error.is_timeout());
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn execute_ignores_timeout_and_rescue() {
        let executor = Executor::new(());
        let action: HintsAction<()> = Action::computed("slow", |_: (), call: Invocation<()>| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Value::from(call.timeouts().len()))
        })
        .with_timeout(Duration::ZERO)
        .on_timeout(Action::immediate("rescue", json!("rescued")));

        assert_eq!(executor.execute(&action, ()).await.unwrap(), Value::from(0));
    }

    #[tokio::test]
    async fn cancelled_parent_cancels_invocation() {
        let executor = Executor::new(());
        let parent = CancellationToken::new();
        parent.cancel();
        let action: Action<(), (), bool> =
            Action::computed("check_cancel", |_: (), call: Invocation<()>| async move { Ok(call.is_cancelled()) });

        let cancelled = executor.run_handler(&action, (), Some(&parent)).await.unwrap();
        assert!(cancelled);
    }

    #[tokio::test]
    async fn unrecoverable_errors_pass_through() {
        let executor = Executor::new(());
        let action: HintsAction<()> = Action::computed("trips", |_: (), _call| async move {
            Err(anyhow::Error::new(ExecutionError::unrecoverable("ledger corrupted")))
        });

        let error = executor.run_handler(&action, (), None).await.unwrap_err();
        assert!(error.is_unrecoverable());
    }
}
