//! Lifecycle owner of the single shared engine instance.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::util::lock::mutex_lock;

use super::{EngineError, EngineInstance, EngineLauncher};

const SOURCE: &str = "engine::handle";

const METRIC_ENGINE_LAUNCH: &str = "pressroom_engine_launch_total";
const METRIC_ENGINE_LAUNCH_FAILED: &str = "pressroom_engine_launch_failed_total";
const METRIC_ENGINE_LAUNCH_MS: &str = "pressroom_engine_launch_ms";
const METRIC_ENGINE_RESTART: &str = "pressroom_engine_restart_total";

type LaunchOutcome = Result<Arc<dyn EngineInstance>, EngineError>;
type LaunchAttempt = Shared<BoxFuture<'static, LaunchOutcome>>;

enum EngineState {
    Uninitialized,
    Initializing {
        generation: u64,
        attempt: LaunchAttempt,
    },
    Ready {
        generation: u64,
        instance: Arc<dyn EngineInstance>,
    },
    Failed {
        message: String,
    },
}

/// Observable engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Uninitialized,
    Initializing { generation: u64 },
    Ready { generation: u64 },
    Failed { message: String },
}

/// A started engine together with the generation that identifies this particular start.
#[derive(Clone)]
pub struct ReadyEngine {
    pub generation: u64,
    pub instance: Arc<dyn EngineInstance>,
}

/// Owns at most one running engine instance.
///
/// Startup is lazy and single-flight: concurrent [`ensure_ready`](Self::ensure_ready) callers
/// share one launch and observe the same outcome. A failed launch leaves the handle ready to
/// retry on the next call.
pub struct EngineHandle {
    launcher: Arc<dyn EngineLauncher>,
    launch_timeout: Duration,
    state: Mutex<EngineState>,
    generations: AtomicU64,
}

impl EngineHandle {
    pub fn new(launcher: Arc<dyn EngineLauncher>, launch_timeout: Duration) -> Self {
        Self {
            launcher,
            launch_timeout,
            state: Mutex::new(EngineState::Uninitialized),
            generations: AtomicU64::new(0),
        }
    }

    pub async fn ensure_ready(&self) -> Result<ReadyEngine, EngineError> {
        let (generation, attempt) = {
            let mut state = mutex_lock(&self.state, SOURCE, "ensure_ready");
            match &*state {
                EngineState::Ready {
                    generation,
                    instance,
                } => {
                    return Ok(ReadyEngine {
                        generation: *generation,
                        instance: Arc::clone(instance),
                    });
                }
                EngineState::Initializing {
                    generation,
                    attempt,
                } => (*generation, attempt.clone()),
                EngineState::Uninitialized | EngineState::Failed { .. } => {
                    let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
                    let attempt = self.launch_attempt(generation);
                    *state = EngineState::Initializing {
                        generation,
                        attempt: attempt.clone(),
                    };
                    (generation, attempt)
                }
            }
        };

        let outcome = attempt.await;
        self.settle(generation, &outcome);
        outcome.map(|instance| ReadyEngine {
            generation,
            instance,
        })
    }

    /// Force initialization and ask the engine for a liveness answer.
    ///
    /// An engine that does not answer within the launch timeout counts as unreachable.
    pub async fn probe(&self) -> Result<String, EngineError> {
        let ready = self.ensure_ready().await?;
        match tokio::time::timeout(self.launch_timeout, ready.instance.probe()).await {
            Ok(answer) => answer,
            Err(_) => Err(EngineError::unreachable(format!(
                "no probe answer within {:?}",
                self.launch_timeout
            ))),
        }
    }

    /// Retire the engine started as `failed_generation`, then start a fresh one.
    ///
    /// When the failed generation has already been replaced this only waits for the current
    /// engine, so concurrent crash reports cause a single restart.
    pub async fn restart(&self, failed_generation: u64) -> Result<ReadyEngine, EngineError> {
        let retired = {
            let mut state = mutex_lock(&self.state, SOURCE, "restart");
            let live = matches!(
                &*state,
                EngineState::Ready { generation, .. } if *generation == failed_generation
            );
            if live {
                match std::mem::replace(&mut *state, EngineState::Uninitialized) {
                    EngineState::Ready { instance, .. } => Some(instance),
                    other => {
                        *state = other;
                        None
                    }
                }
            } else {
                None
            }
        };

        if let Some(instance) = retired {
            counter!(METRIC_ENGINE_RESTART).increment(1);
            warn!(
                target = SOURCE,
                op = "restart",
                generation = failed_generation,
                "Restarting engine after failure"
            );
            self.retire(failed_generation, instance).await;
        }

        self.ensure_ready().await
    }

    /// Release the running engine. A launch in progress is awaited and its result closed.
    pub async fn shutdown(&self) {
        enum Step {
            Await(u64, LaunchAttempt),
            Close(u64, Arc<dyn EngineInstance>),
            Done,
        }

        loop {
            let step = {
                let mut state = mutex_lock(&self.state, SOURCE, "shutdown");
                match std::mem::replace(&mut *state, EngineState::Uninitialized) {
                    EngineState::Initializing {
                        generation,
                        attempt,
                    } => {
                        let pending = attempt.clone();
                        *state = EngineState::Initializing {
                            generation,
                            attempt,
                        };
                        Step::Await(generation, pending)
                    }
                    EngineState::Ready {
                        generation,
                        instance,
                    } => Step::Close(generation, instance),
                    EngineState::Uninitialized | EngineState::Failed { .. } => Step::Done,
                }
            };

            match step {
                Step::Await(generation, attempt) => {
                    let outcome = attempt.await;
                    self.settle(generation, &outcome);
                }
                Step::Close(generation, instance) => {
                    if !self.retire(generation, instance).await {
                        return;
                    }
                    info!(
                        target = SOURCE,
                        op = "shutdown",
                        result = "ok",
                        generation,
                        "Engine shut down"
                    );
                    return;
                }
                Step::Done => return,
            }
        }
    }

    /// True when `generation` is the engine currently serving sessions.
    pub fn is_live(&self, generation: u64) -> bool {
        matches!(
            &*mutex_lock(&self.state, SOURCE, "is_live"),
            EngineState::Ready { generation: live, .. } if *live == generation
        )
    }

    pub fn status(&self) -> EngineStatus {
        match &*mutex_lock(&self.state, SOURCE, "status") {
            EngineState::Uninitialized => EngineStatus::Uninitialized,
            EngineState::Initializing { generation, .. } => EngineStatus::Initializing {
                generation: *generation,
            },
            EngineState::Ready { generation, .. } => EngineStatus::Ready {
                generation: *generation,
            },
            EngineState::Failed { message } => EngineStatus::Failed {
                message: message.clone(),
            },
        }
    }

    // A wedged engine must not hold up its caller: shutdown gets the launch timeout, then the
    // instance is dropped as is. Returns whether shutdown finished.
    async fn retire(&self, generation: u64, instance: Arc<dyn EngineInstance>) -> bool {
        match tokio::time::timeout(self.launch_timeout, instance.shutdown()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    target = SOURCE,
                    op = "retire",
                    result = "timeout",
                    generation,
                    limit_ms = self.launch_timeout.as_millis() as u64,
                    "Engine shutdown did not finish in time, abandoning instance"
                );
                false
            }
        }
    }

    // The launch runs as its own task so a cancelled waiter cannot stall it.
    fn launch_attempt(&self, generation: u64) -> LaunchAttempt {
        let launcher = Arc::clone(&self.launcher);
        let limit = self.launch_timeout;
        let task = tokio::spawn(async move {
            let started = Instant::now();
            debug!(target = SOURCE, op = "launch", generation, "Launching engine");
            let outcome = match tokio::time::timeout(limit, launcher.launch()).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::LaunchTimeout(limit)),
            };
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            histogram!(METRIC_ENGINE_LAUNCH_MS).record(elapsed_ms);
            match &outcome {
                Ok(_) => {
                    counter!(METRIC_ENGINE_LAUNCH).increment(1);
                    info!(
                        target = SOURCE,
                        op = "launch",
                        result = "ok",
                        generation,
                        elapsed_ms,
                        "Engine ready"
                    );
                }
                Err(err) => {
                    counter!(METRIC_ENGINE_LAUNCH_FAILED).increment(1);
                    error!(
                        target = SOURCE,
                        op = "launch",
                        result = "error",
                        generation,
                        elapsed_ms,
                        error = %err,
                        "Engine failed to start"
                    );
                }
            }
            outcome
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join) => Err(EngineError::launch(join)),
            }
        }
        .boxed()
        .shared()
    }

    // Only the attempt that is still current may move the state machine.
    fn settle(&self, generation: u64, outcome: &LaunchOutcome) {
        let mut state = mutex_lock(&self.state, SOURCE, "settle");
        let current = matches!(
            &*state,
            EngineState::Initializing { generation: pending, .. } if *pending == generation
        );
        if !current {
            return;
        }
        *state = match outcome {
            Ok(instance) => EngineState::Ready {
                generation,
                instance: Arc::clone(instance),
            },
            Err(err) => EngineState::Failed {
                message: err.to_string(),
            },
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::FakeEngine;

    fn handle(engine: &Arc<FakeEngine>) -> Arc<EngineHandle> {
        Arc::new(EngineHandle::new(engine.launcher(), Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_launch() {
        let engine = FakeEngine::new();
        engine.set_launch_delay(Duration::from_millis(50));
        let handle = handle(&engine);

        let waiters = (0..8).map(|_| {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.ensure_ready().await.map(|ready| ready.generation) })
        });
        let generations: Vec<u64> = futures::future::join_all(waiters)
            .await
            .into_iter()
            .map(|joined| joined.expect("task").expect("engine ready"))
            .collect();

        assert_eq!(FakeEngine::count(&engine.launches), 1);
        assert!(generations.iter().all(|generation| *generation == 1));
        assert_eq!(handle.status(), EngineStatus::Ready { generation: 1 });
    }

    #[tokio::test]
    async fn failed_launch_reaches_every_waiter_then_retries() {
        let engine = FakeEngine::new();
        engine.set_launch_delay(Duration::from_millis(20));
        engine.fail_launches(1);
        let handle = handle(&engine);

        let (first, second) = tokio::join!(handle.ensure_ready(), handle.ensure_ready());
        assert!(matches!(first, Err(EngineError::Launch { .. })));
        assert!(matches!(second, Err(EngineError::Launch { .. })));
        assert_eq!(FakeEngine::count(&engine.launches), 1);
        assert!(matches!(handle.status(), EngineStatus::Failed { .. }));

        let ready = handle.ensure_ready().await.expect("retry succeeds");
        assert_eq!(ready.generation, 2);
        assert_eq!(FakeEngine::count(&engine.launches), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_launch_times_out_instead_of_hanging() {
        let engine = FakeEngine::new();
        engine.set_launch_delay(Duration::from_secs(60));
        let handle = EngineHandle::new(engine.launcher(), Duration::from_secs(1));

        let err = match handle.ensure_ready().await {
            Ok(_) => panic!("launch should time out"),
            Err(err) => err,
        };
        assert!(matches!(err, EngineError::LaunchTimeout(limit) if limit == Duration::from_secs(1)));
        assert!(matches!(handle.status(), EngineStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let engine = FakeEngine::new();
        let handle = handle(&engine);

        handle.shutdown().await;
        handle.ensure_ready().await.expect("ready");
        handle.shutdown().await;
        handle.shutdown().await;

        assert_eq!(FakeEngine::count(&engine.shutdowns), 1);
        assert_eq!(handle.status(), EngineStatus::Uninitialized);
    }

    #[tokio::test]
    async fn shutdown_during_launch_closes_the_result() {
        let engine = FakeEngine::new();
        engine.set_launch_delay(Duration::from_millis(50));
        let handle = handle(&engine);

        let starter = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.ensure_ready().await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown().await;

        assert!(starter.await.expect("task"));
        assert_eq!(FakeEngine::count(&engine.shutdowns), 1);
        assert_eq!(handle.status(), EngineStatus::Uninitialized);
    }

    #[tokio::test]
    async fn restart_of_stale_generation_does_not_relaunch() {
        let engine = FakeEngine::new();
        let handle = handle(&engine);

        let first = handle.ensure_ready().await.expect("ready");
        let second = handle.restart(first.generation).await.expect("restarted");
        assert_eq!(second.generation, first.generation + 1);
        assert!(!handle.is_live(first.generation));
        assert!(handle.is_live(second.generation));

        let again = handle.restart(first.generation).await.expect("still ready");
        assert_eq!(again.generation, second.generation);
        assert_eq!(FakeEngine::count(&engine.launches), 2);
        assert_eq!(FakeEngine::count(&engine.shutdowns), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wedged_shutdown_does_not_block_restart() {
        let engine = FakeEngine::new();
        let handle = EngineHandle::new(engine.launcher(), Duration::from_secs(1));
        let first = handle.ensure_ready().await.expect("ready");
        engine.wedge_shutdowns();

        let started = tokio::time::Instant::now();
        let second = tokio::time::timeout(Duration::from_secs(10), handle.restart(first.generation))
            .await
            .expect("restart finishes")
            .expect("fresh engine");

        assert_eq!(second.generation, first.generation + 1);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(FakeEngine::count(&engine.launches), 2);
        assert_eq!(FakeEngine::count(&engine.shutdowns), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wedged_shutdown_does_not_block_handle_shutdown() {
        let engine = FakeEngine::new();
        let handle = EngineHandle::new(engine.launcher(), Duration::from_secs(1));
        handle.ensure_ready().await.expect("ready");
        engine.wedge_shutdowns();

        tokio::time::timeout(Duration::from_secs(10), handle.shutdown())
            .await
            .expect("shutdown finishes");

        assert_eq!(handle.status(), EngineStatus::Uninitialized);
        assert_eq!(FakeEngine::count(&engine.shutdowns), 1);
    }

    #[tokio::test]
    async fn probe_starts_the_engine() {
        let engine = FakeEngine::new();
        let handle = handle(&engine);

        let version = handle.probe().await.expect("probe");
        assert_eq!(version, "FakeEngine/1.0");
        assert_eq!(FakeEngine::count(&engine.launches), 1);
    }
}
