//! Flow engine: lifecycle state machine and iteration loop
//!
//! An [`Engine`] drives one project. Each accepted start compiles the
//! execution order once, freezes the project and spawns a loop task that
//! runs iterations until the run finishes, is stopped, or is aborted.
//!
//! Lifecycle requests never fail with an error: a request that does not
//! fit the current state is answered with `accepted = false` and the
//! current [`EngineMeta`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::FlowEngineError;
use crate::events::{EngineEvent, EventBus, EventSink, Subscription};
use crate::project::Project;
use crate::state::{EngineMeta, EngineState, ExecutionType, LifecycleOutcome};
use crate::step::{StepBody, StepIo};
use crate::types::{IterationId, StepId};

/// A project shared between its engine and whoever edits it
pub type SharedProject = Arc<RwLock<Project>>;

/// Tuning knobs for an engine
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Pause between iterations of a continuous run
    pub iteration_interval: Option<Duration>,
}

/// Cancellation handles of one run
#[derive(Clone)]
struct RunTokens {
    /// Fired by abort; handed to every step
    cancel: CancellationToken,
    /// Fired by stop; the in-flight iteration still completes
    stop: CancellationToken,
}

struct Status {
    meta: EngineMeta,
    run: Option<RunTokens>,
}

struct EngineShared {
    status: Mutex<Status>,
    /// Serializes transitions so `StateChanged` events arrive in order
    transitions: Mutex<()>,
    events: EventBus,
    state_tx: watch::Sender<EngineState>,
}

impl EngineShared {
    fn meta(&self) -> EngineMeta {
        self.status.lock().meta.clone()
    }

    /// Check and apply a state change atomically, then announce it
    ///
    /// `update` returns whether the change was applied. Sinks receiving the
    /// `StateChanged` event must not call back into lifecycle requests.
    fn transition(&self, update: impl FnOnce(&mut Status) -> bool) -> (bool, EngineMeta) {
        let _order = self.transitions.lock();
        let (applied, meta) = {
            let mut status = self.status.lock();
            let applied = update(&mut status);
            (applied, status.meta.clone())
        };
        if applied {
            self.events.publish(&EngineEvent::StateChanged { meta: meta.clone() });
            self.state_tx.send_replace(meta.state);
        }
        (applied, meta)
    }
}

/// Outcome of running one step body
enum StepOutcome {
    Completed { success: bool, io: StepIo },
    Faulted(String),
    Cancelled,
}

/// Executes a project's steps in dependency order
pub struct Engine {
    project: SharedProject,
    shared: Arc<EngineShared>,
    options: EngineOptions,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(project: SharedProject) -> Self {
        Self::with_options(project, EngineOptions::default())
    }

    pub fn with_options(project: SharedProject, options: EngineOptions) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Idle);
        Self {
            project,
            shared: Arc::new(EngineShared {
                status: Mutex::new(Status {
                    meta: EngineMeta::idle(),
                    run: None,
                }),
                transitions: Mutex::new(()),
                events: EventBus::new(),
                state_tx,
            }),
            options,
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn project(&self) -> &SharedProject {
        &self.project
    }

    /// Fresh snapshot of the engine status
    pub fn meta(&self) -> EngineMeta {
        self.shared.meta()
    }

    /// Register an event sink for as long as the returned handle lives
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> Subscription {
        self.shared.events.subscribe(sink)
    }

    /// Start a run unless one is already in flight
    ///
    /// The execution order is compiled here; a cycle rejects the request,
    /// leaves the state unchanged and records the cycle in `meta.diagnostic`.
    pub async fn try_start(&self, execution_type: ExecutionType) -> LifecycleOutcome {
        let mut task = self.task.lock().await;
        if self.shared.meta().state.is_live() {
            return LifecycleOutcome::rejected(self.meta());
        }

        // The previous loop has set a terminal state; let it finish publishing.
        if let Some(previous) = task.take() {
            if let Err(e) = previous.await {
                log::error!("Previous engine loop ended abnormally: {}", e);
            }
        }

        let order = match self.project.read().compile_order() {
            Ok(order) => order,
            Err(e) => {
                log::warn!("Refusing to start: {}", e);
                let mut status = self.shared.status.lock();
                status.meta.diagnostic = Some(e.to_string());
                return LifecycleOutcome::rejected(status.meta.clone());
            }
        };

        self.project.write().set_frozen(true);
        let tokens = RunTokens {
            cancel: CancellationToken::new(),
            stop: CancellationToken::new(),
        };

        let (_, meta) = self.shared.transition(|status| {
            status.run = Some(tokens.clone());
            status.meta = EngineMeta {
                state: EngineState::Running,
                execution_type: Some(execution_type),
                started_at: Some(Utc::now()),
                ..EngineMeta::idle()
            };
            true
        });
        log::info!(
            "Engine started ({:?}, {} steps)",
            execution_type,
            order.len()
        );

        let runner = LoopRunner {
            project: Arc::clone(&self.project),
            shared: Arc::clone(&self.shared),
            order,
            execution_type,
            tokens,
            interval: self.options.iteration_interval,
        };
        *task = Some(tokio::spawn(runner.run()));

        LifecycleOutcome::accepted(meta)
    }

    /// Let the in-flight iteration complete, then stop
    pub async fn try_stop(&self) -> LifecycleOutcome {
        let (accepted, meta) = self.shared.transition(|status| {
            if status.meta.state != EngineState::Running {
                return false;
            }
            status.meta.state = EngineState::Stopping;
            if let Some(run) = &status.run {
                run.stop.cancel();
            }
            true
        });

        if !accepted {
            return LifecycleOutcome::rejected(meta);
        }
        log::info!("Engine stopping");
        LifecycleOutcome::accepted(meta)
    }

    /// Cancel the in-flight iteration and stop
    pub async fn try_abort(&self) -> LifecycleOutcome {
        let (accepted, meta) = self.shared.transition(|status| {
            if !matches!(
                status.meta.state,
                EngineState::Running | EngineState::Stopping
            ) {
                return false;
            }
            status.meta.state = EngineState::Aborting;
            if let Some(run) = &status.run {
                run.cancel.cancel();
            }
            true
        });

        if !accepted {
            return LifecycleOutcome::rejected(meta);
        }
        log::info!("Engine aborting");
        LifecycleOutcome::accepted(meta)
    }

    /// Wait until no run is in flight and return the final status
    pub async fn wait_until_settled(&self) -> EngineMeta {
        let mut rx = self.shared.state_tx.subscribe();
        // The sender lives in `self.shared`, so the channel cannot close here.
        let _ = rx.wait_for(|state| !state.is_live()).await;
        self.meta()
    }

    /// Abort any run and wait for the loop task to exit
    pub async fn shutdown(&self) {
        self.try_abort().await;
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Engine loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(run) = &self.shared.status.lock().run {
            run.cancel.cancel();
        }
    }
}

/// State owned by the loop task of one run
struct LoopRunner {
    project: SharedProject,
    shared: Arc<EngineShared>,
    order: Vec<StepId>,
    execution_type: ExecutionType,
    tokens: RunTokens,
    interval: Option<Duration>,
}

impl LoopRunner {
    async fn run(self) {
        loop {
            if self.tokens.cancel.is_cancelled() || self.tokens.stop.is_cancelled() {
                break;
            }

            let success = self.run_iteration().await;
            log::debug!("Iteration finished (success: {})", success);

            if self.execution_type == ExecutionType::SingleRun {
                break;
            }
            if let Some(interval) = self.interval {
                tokio::select! {
                    _ = self.tokens.cancel.cancelled() => break,
                    _ = self.tokens.stop.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }
        self.finish();
    }

    async fn run_iteration(&self) -> bool {
        let iteration_id = uuid::Uuid::new_v4();
        self.shared.status.lock().meta.current_iteration = Some(iteration_id);
        self.shared
            .events
            .publish(&EngineEvent::IterationStarted { iteration_id });

        let mut success = true;
        for step_id in &self.order {
            if self.tokens.cancel.is_cancelled() {
                success = false;
                break;
            }
            match self.run_step(step_id, iteration_id).await {
                Some(step_success) => success &= step_success,
                None => {
                    success = false;
                    break;
                }
            }
        }

        {
            let mut status = self.shared.status.lock();
            let meta = &mut status.meta;
            meta.iterations += 1;
            if success {
                meta.successful_iterations += 1;
            } else {
                meta.failed_iterations += 1;
            }
            meta.current_iteration = None;
            meta.last_iteration_finished_at = Some(Utc::now());
        }
        self.shared.events.publish(&EngineEvent::IterationFinished {
            iteration_id,
            success,
        });
        success
    }

    /// Run one step and propagate its outputs
    ///
    /// Returns the step's success, or `None` when the run was cancelled.
    async fn run_step(&self, step_id: &str, iteration_id: IterationId) -> Option<bool> {
        let prepared = {
            let project = self.project.read();
            let name = project
                .step(step_id)
                .map(|s| s.name().to_string())
                .unwrap_or_default();
            project
                .prepare_step(step_id, iteration_id)
                .map(|(body, io)| (body, io, name))
        };
        let (body, io, step_name) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                log::error!("Cannot prepare step '{}': {}", step_id, e);
                return Some(false);
            }
        };

        let mut propagated = true;
        let step_success = match execute_step(body, io, &self.tokens.cancel).await {
            StepOutcome::Completed { success, io } => {
                let mut project = self.project.write();
                project.apply_outputs(step_id, io.into_written());
                for failure in project.propagate_from(step_id) {
                    log::error!(
                        "Step '{}': value not propagated along link '{}': {}",
                        step_id,
                        failure.link_id,
                        failure.error
                    );
                    propagated = false;
                }
                success
            }
            StepOutcome::Faulted(message) => {
                log::error!("Step '{}' faulted: {}", step_id, message);
                false
            }
            StepOutcome::Cancelled => {
                log::info!("Step '{}' cancelled", step_id);
                return None;
            }
        };
        if !step_success {
            log::warn!("Step '{}' reported failure", step_id);
        }

        let outputs = self.project.read().output_snapshots(step_id);
        self.shared.events.publish(&EngineEvent::StepFinished {
            iteration_id,
            step_id: step_id.to_string(),
            step_name,
            success: step_success,
            outputs,
        });
        Some(step_success && propagated)
    }

    fn finish(self) {
        self.project.write().set_frozen(false);
        let tokens = &self.tokens;
        let (_, meta) = self.shared.transition(|status| {
            status.run = None;
            status.meta.state = if tokens.cancel.is_cancelled() {
                EngineState::Aborted
            } else if tokens.stop.is_cancelled() {
                EngineState::Stopped
            } else {
                EngineState::Finished
            };
            status.meta.current_iteration = None;
            status.meta.stopped_at = Some(Utc::now());
            true
        });
        log::info!(
            "Engine {:?} after {} iterations ({} failed)",
            meta.state,
            meta.iterations,
            meta.failed_iterations
        );
    }
}

/// Run a step body on its own task so a panic is contained as a fault
async fn execute_step(
    body: Arc<dyn StepBody>,
    io: StepIo,
    cancel: &CancellationToken,
) -> StepOutcome {
    let token = cancel.clone();
    let mut handle = tokio::spawn(async move {
        let mut io = io;
        let result = body.run(&mut io, &token).await;
        (result, io)
    });

    tokio::select! {
        biased;
        joined = &mut handle => match joined {
            Ok((Ok(success), io)) => StepOutcome::Completed { success, io },
            Ok((Err(FlowEngineError::Cancelled), _)) if cancel.is_cancelled() => {
                StepOutcome::Cancelled
            }
            Ok((Err(e), _)) => StepOutcome::Faulted(e.to_string()),
            Err(e) if e.is_panic() => StepOutcome::Faulted("step panicked".to_string()),
            Err(_) => StepOutcome::Cancelled,
        },
        _ = cancel.cancelled() => {
            handle.abort();
            StepOutcome::Cancelled
        }
    }
}
