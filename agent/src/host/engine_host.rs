//! Engine host: owns the active project and the engine running it
//!
//! The host is the single entry point of the control surface. It builds a
//! fresh [`Engine`] for every run, wires it to the result drain, the
//! snapshot cache and the notifier, and refuses graph edits while a run is
//! live.

use std::sync::Arc;

use flow_engine::{
    Engine, EngineEvent, EngineMeta, EngineOptions, EventError, EventSink, ExecutionType,
    FlowEngineError, IterationId, LifecycleOutcome, LinkId, Project, ProjectDefinition,
    SharedProject, StepBody,
    StepDefinition, StepId, StepRegistry, Subscription,
};
use parking_lot::RwLock;
use thiserror::Error;

use super::cache::{CacheError, ResultCache};
use super::notifier::Notifier;
use crate::results::{PortResult, ResultDrain};

/// Errors from host operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("No project is active")]
    NoProject,

    #[error("A run is in progress; stop or abort it first")]
    RunInProgress,

    #[error(transparent)]
    Engine(#[from] FlowEngineError),
}

impl HostError {
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::RunInProgress => true,
            Self::NoProject => false,
            Self::Engine(e) => e.is_conflict(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NoProject => true,
            Self::RunInProgress => false,
            Self::Engine(e) => e.is_not_found(),
        }
    }
}

/// Collaborators shared by every engine the host builds
#[derive(Clone)]
pub struct HostServices {
    pub registry: Arc<StepRegistry>,
    pub drain: Arc<ResultDrain>,
    pub notifier: Arc<dyn Notifier>,
    pub cache: Arc<dyn ResultCache>,
    pub engine_options: EngineOptions,
}

/// An engine together with the subscription feeding the host's handlers
struct ActiveRun {
    engine: Arc<Engine>,
    _subscription: Subscription,
}

#[derive(Default)]
struct HostState {
    project: Option<SharedProject>,
    run: Option<ActiveRun>,
}

impl HostState {
    fn is_live(&self) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| run.engine.meta().state.is_live())
    }

    fn ensure_editable(&self) -> Result<SharedProject, HostError> {
        if self.is_live() {
            return Err(HostError::RunInProgress);
        }
        self.project.clone().ok_or(HostError::NoProject)
    }
}

/// Hosts one project and the engine executing it
pub struct EngineHost {
    services: HostServices,
    state: tokio::sync::Mutex<HostState>,
}

impl EngineHost {
    pub fn new(services: HostServices) -> Self {
        Self {
            services,
            state: tokio::sync::Mutex::new(HostState::default()),
        }
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.services.registry
    }

    /// Make `project` the active project without starting it
    ///
    /// Refused while a run is live. A previous project is replaced and its
    /// step resources released.
    pub async fn try_activate_project(&self, project: Project) -> bool {
        let mut state = self.state.lock().await;
        if state.is_live() {
            log::warn!("Cannot activate project '{}': a run is in progress", project.id());
            return false;
        }

        if let Some(run) = state.run.take() {
            dispose(run).await;
        }
        if let Some(previous) = state.project.take() {
            release_steps(&previous).await;
        }
        log::info!("Activated project '{}' ({})", project.id(), project.name());
        state.project = Some(Arc::new(RwLock::new(project)));
        true
    }

    /// Abort any run and release the active project
    pub async fn try_deactivate_project(&self) -> bool {
        let mut state = self.state.lock().await;
        if let Some(run) = state.run.take() {
            dispose(run).await;
        }
        if let Some(project) = state.project.take() {
            release_steps(&project).await;
            log::info!("Deactivated project '{}'", project.read().id());
        }
        true
    }

    /// The active project, if any
    pub async fn project(&self) -> Option<SharedProject> {
        self.state.lock().await.project.clone()
    }

    /// Status of the current (or last) run
    pub async fn status(&self) -> EngineMeta {
        let state = self.state.lock().await;
        state
            .run
            .as_ref()
            .map(|run| run.engine.meta())
            .unwrap_or_else(EngineMeta::idle)
    }

    /// Iterations whose project snapshot is still cached, oldest first
    pub fn snapshot_iterations(&self) -> Vec<IterationId> {
        self.services.cache.iterations()
    }

    /// Project as it stood when an iteration finished
    pub fn snapshot(&self, iteration_id: IterationId) -> Option<Result<ProjectDefinition, CacheError>> {
        self.services.cache.get(iteration_id)
    }

    /// Start a run on a freshly built engine
    pub async fn start_run(&self, execution_type: ExecutionType) -> LifecycleOutcome {
        let mut state = self.state.lock().await;
        let Some(project) = state.project.clone() else {
            let mut meta = EngineMeta::idle();
            meta.diagnostic = Some("no project is active".to_string());
            return LifecycleOutcome::rejected(meta);
        };
        if let Some(run) = &state.run {
            let meta = run.engine.meta();
            if meta.state.is_live() {
                return LifecycleOutcome::rejected(meta);
            }
        }
        if let Some(previous) = state.run.take() {
            dispose(previous).await;
        }

        let engine = Arc::new(Engine::with_options(
            Arc::clone(&project),
            self.services.engine_options.clone(),
        ));
        let subscription = engine.subscribe(Arc::new(HostEventSink {
            project,
            drain: Arc::clone(&self.services.drain),
            notifier: Arc::clone(&self.services.notifier),
            cache: Arc::clone(&self.services.cache),
        }));
        let outcome = engine.try_start(execution_type).await;
        state.run = Some(ActiveRun {
            engine,
            _subscription: subscription,
        });
        outcome
    }

    /// Finish the in-flight iteration, then stop
    pub async fn stop_run(&self) -> LifecycleOutcome {
        match self.engine().await {
            Some(engine) => engine.try_stop().await,
            None => LifecycleOutcome::rejected(EngineMeta::idle()),
        }
    }

    /// Cancel the in-flight iteration and stop
    pub async fn abort_run(&self) -> LifecycleOutcome {
        match self.engine().await {
            Some(engine) => engine.try_abort().await,
            None => LifecycleOutcome::rejected(EngineMeta::idle()),
        }
    }

    /// Wait until the current run (if any) has ended
    pub async fn wait_until_settled(&self) -> EngineMeta {
        match self.engine().await {
            Some(engine) => engine.wait_until_settled().await,
            None => EngineMeta::idle(),
        }
    }

    async fn engine(&self) -> Option<Arc<Engine>> {
        self.state
            .lock()
            .await
            .run
            .as_ref()
            .map(|run| Arc::clone(&run.engine))
    }

    /// Add a step of a registered type at an editor position
    pub async fn add_step(&self, step_type: &str, x: f64, y: f64) -> Result<StepId, HostError> {
        let state = self.state.lock().await;
        let project = state.ensure_editable()?;
        let body = self
            .services
            .registry
            .create(step_type, &serde_json::Value::Null)?;

        let mut project = project.write();
        let id = next_step_id(&project, step_type);
        let definition = StepDefinition::new(id, step_type).with_position(x, y);
        Ok(project.add_step(definition, body)?)
    }

    /// Remove a step and every link touching it
    pub async fn remove_step(&self, step_id: &str) -> Result<(), HostError> {
        let state = self.state.lock().await;
        let project = state.ensure_editable()?;
        let removed = project.write().remove_step(step_id)?;
        removed.body().release().await;
        Ok(())
    }

    pub async fn link(&self, source: &str, target: &str) -> Result<LinkId, HostError> {
        let state = self.state.lock().await;
        let project = state.ensure_editable()?;
        let id = project.write().link(source, target)?;
        Ok(id)
    }

    pub async fn unlink(&self, link_id: &str) -> Result<(), HostError> {
        let state = self.state.lock().await;
        let project = state.ensure_editable()?;
        project.write().unlink(link_id)?;
        Ok(())
    }

    /// Write a port value given as JSON, converted to the port's brand
    pub async fn set_port_value(&self, port_id: &str, value: &serde_json::Value) -> Result<(), HostError> {
        let state = self.state.lock().await;
        let project = state.ensure_editable()?;
        project.write().set_port_json(port_id, value)?;
        Ok(())
    }

    /// Abort any run, release every step, then stop the result drain
    pub async fn shutdown(&self) {
        log::info!("Engine host shutting down");
        self.try_deactivate_project().await;
        self.services.drain.shutdown().await;
    }
}

/// Abort and await an engine, dropping the host's subscription to it
async fn dispose(run: ActiveRun) {
    run.engine.shutdown().await;
}

async fn release_steps(project: &SharedProject) {
    let bodies: Vec<Arc<dyn StepBody>> = project.read().bodies();
    for body in bodies {
        body.release().await;
    }
}

/// First free `<type>-<n>` id in the project
fn next_step_id(project: &Project, step_type: &str) -> StepId {
    (1..)
        .map(|n| format!("{}-{}", step_type, n))
        .find(|id| project.step(id).is_none())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Routes engine events to the drain, the cache and the notifier
///
/// Runs on the engine loop; every call here only enqueues or spawns.
struct HostEventSink {
    project: SharedProject,
    drain: Arc<ResultDrain>,
    notifier: Arc<dyn Notifier>,
    cache: Arc<dyn ResultCache>,
}

impl HostEventSink {
    fn iteration_finished(&self, iteration_id: IterationId, success: bool) {
        self.drain.on_iteration_finished(iteration_id, success);

        let snapshot = self.project.read().to_definition();
        if let Err(e) = self.cache.store(iteration_id, &snapshot) {
            log::warn!("Failed to cache snapshot of iteration {}: {}", iteration_id, e);
        }
        if let Err(e) = self.notifier.result_available(iteration_id) {
            log::warn!("Failed to signal results of iteration {}: {}", iteration_id, e);
        }
    }
}

impl EventSink for HostEventSink {
    fn send(&self, event: &EngineEvent) -> Result<(), EventError> {
        match event {
            EngineEvent::IterationStarted { iteration_id } => {
                self.drain.on_iteration_started(*iteration_id);
            }
            EngineEvent::StepFinished {
                iteration_id,
                step_id,
                outputs,
                ..
            } => {
                for snapshot in outputs {
                    let result = PortResult::from_snapshot(step_id, snapshot.clone());
                    self.drain
                        .add_for(*iteration_id, result)
                        .map_err(|e| EventError::new(e.to_string()))?;
                }
            }
            EngineEvent::IterationFinished {
                iteration_id,
                success,
            } => self.iteration_finished(*iteration_id, *success),
            EngineEvent::StateChanged { meta } => {
                if let Err(e) = self.notifier.state_changed(meta) {
                    log::warn!("Failed to notify state {:?}: {}", meta.state, e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::cache::SnapshotCache;
    use crate::host::notifier::NotifyError;
    use crate::results::{
        ChunkStream, DrainOptions, ImageUpload, ResultTransport, TransportError, WireResult,
    };
    use async_trait::async_trait;
    use flow_engine::{EngineState, ProjectBuilder, PortValue};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTransport {
        results: Mutex<Vec<WireResult>>,
    }

    #[async_trait]
    impl ResultTransport for RecordingTransport {
        async fn add_image(&self, _upload: &ImageUpload, _chunks: ChunkStream) -> Result<(), TransportError> {
            Ok(())
        }

        async fn add_result(&self, result: &WireResult) -> Result<(), TransportError> {
            self.results.lock().push(result.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        states: Mutex<Vec<EngineState>>,
        results: Mutex<Vec<IterationId>>,
    }

    impl Notifier for RecordingNotifier {
        fn state_changed(&self, meta: &EngineMeta) -> Result<(), NotifyError> {
            self.states.lock().push(meta.state);
            Ok(())
        }

        fn result_available(&self, iteration_id: IterationId) -> Result<(), NotifyError> {
            self.results.lock().push(iteration_id);
            Ok(())
        }
    }

    struct Fixture {
        host: EngineHost,
        transport: Arc<RecordingTransport>,
        notifier: Arc<RecordingNotifier>,
        cache: Arc<SnapshotCache>,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let cache = Arc::new(SnapshotCache::new(8));
        let drain = Arc::new(ResultDrain::start(
            DrainOptions {
                agent_id: "test-agent".to_string(),
                chunk_bytes: 1024,
                preview_max_pixels: 0,
            },
            transport.clone(),
        ));
        let host = EngineHost::new(HostServices {
            registry: Arc::new(StepRegistry::with_builtin_steps()),
            drain,
            notifier: notifier.clone(),
            cache: cache.clone(),
            engine_options: EngineOptions::default(),
        });
        Fixture {
            host,
            transport,
            notifier,
            cache,
        }
    }

    /// A (constant 42) -> B (pass-through)
    fn numeric_project(registry: &StepRegistry) -> Project {
        ProjectBuilder::new("p", "Numeric")
            .add_step("a", "constant", (0.0, 0.0))
            .with_config(serde_json::json!({"brand": {"kind": "numeric"}, "value": 42}))
            .add_step("b", "pass-through", (200.0, 0.0))
            .with_config(serde_json::json!({"brand": {"kind": "numeric"}}))
            .link("a", "value", "b", "in")
            .instantiate(registry)
            .unwrap()
    }

    async fn wait_for_results(transport: &RecordingTransport, count: usize) -> Vec<WireResult> {
        for _ in 0..200 {
            let results = transport.results.lock().clone();
            if results.len() >= count {
                return results;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} results", count);
    }

    #[tokio::test]
    async fn test_start_without_project_is_rejected() {
        let f = fixture();
        let outcome = f.host.start_run(ExecutionType::SingleRun).await;
        assert!(!outcome.accepted);
        assert_eq!(outcome.meta.state, EngineState::Idle);
        assert!(outcome.meta.diagnostic.is_some());
        assert!(!f.host.stop_run().await.accepted);
        assert!(!f.host.abort_run().await.accepted);
        f.host.shutdown().await;
    }

    #[tokio::test]
    async fn test_single_run_ships_results() {
        let f = fixture();
        let project = numeric_project(f.host.registry());
        assert!(f.host.try_activate_project(project).await);

        let outcome = f.host.start_run(ExecutionType::SingleRun).await;
        assert!(outcome.accepted);
        let meta = f.host.wait_until_settled().await;
        assert_eq!(meta.state, EngineState::Finished);
        assert_eq!(meta.successful_iterations, 1);

        let results = wait_for_results(&f.transport, 1).await;
        let record = &results[0];
        assert!(record.success);
        assert_eq!(record.agent_id, "test-agent");
        let b_out = record
            .values
            .iter()
            .find(|v| v.result_id == "b/out")
            .unwrap();
        assert_eq!(b_out.value, serde_json::json!(42.0));

        assert_eq!(f.notifier.results.lock().clone(), vec![record.iteration_id]);
        assert!(f.cache.get(record.iteration_id).is_some());
        assert_eq!(f.host.snapshot_iterations(), vec![record.iteration_id]);
        let snapshot = f.host.snapshot(record.iteration_id).unwrap().unwrap();
        assert_eq!(snapshot.name, "Numeric");
        let states = f.notifier.states.lock().clone();
        assert_eq!(states, vec![EngineState::Running, EngineState::Finished]);
        f.host.shutdown().await;
    }

    #[tokio::test]
    async fn test_runs_use_distinct_engines_and_iterations() {
        let f = fixture();
        assert!(f.host.try_activate_project(numeric_project(f.host.registry())).await);

        for _ in 0..2 {
            assert!(f.host.start_run(ExecutionType::SingleRun).await.accepted);
            f.host.wait_until_settled().await;
        }
        let results = wait_for_results(&f.transport, 2).await;
        assert_ne!(results[0].iteration_id, results[1].iteration_id);
        f.host.shutdown().await;
    }

    #[tokio::test]
    async fn test_edits_conflict_while_running() {
        let f = fixture();
        let project = ProjectBuilder::new("p", "Slow")
            .add_step("wait", "delay", (0.0, 0.0))
            .with_config(serde_json::json!({"durationMs": 5000}))
            .instantiate(f.host.registry())
            .unwrap();
        assert!(f.host.try_activate_project(project).await);
        assert!(f.host.start_run(ExecutionType::ContinuousRun).await.accepted);

        let err = f.host.add_step("constant", 0.0, 0.0).await.unwrap_err();
        assert!(err.is_conflict());
        let err = f.host.set_port_value("wait/in", &serde_json::json!(1)).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(!f.host.try_activate_project(Project::new("q", "Other")).await);
        assert!(!f.host.start_run(ExecutionType::SingleRun).await.accepted);

        assert!(f.host.abort_run().await.accepted);
        let meta = f.host.wait_until_settled().await;
        assert_eq!(meta.state, EngineState::Aborted);

        f.host.add_step("constant", 0.0, 0.0).await.unwrap();
        f.host.shutdown().await;
    }

    #[tokio::test]
    async fn test_graph_edits_between_runs() {
        let f = fixture();
        assert!(f.host.try_activate_project(Project::new("p", "Edited")).await);

        let a = f.host.add_step("constant", 0.0, 0.0).await.unwrap();
        let b = f.host.add_step("pass-through", 100.0, 0.0).await.unwrap();
        assert_eq!(a, "constant-1");
        assert_eq!(b, "pass-through-1");

        let link = f
            .host
            .link(&format!("{}/value", a), &format!("{}/in", b))
            .await
            .unwrap();
        let err = f
            .host
            .link(&format!("{}/value", a), &format!("{}/in", b))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        f.host.unlink(&link).await.unwrap();
        assert!(f.host.unlink(&link).await.unwrap_err().is_not_found());
        assert!(f.host.remove_step("missing").await.unwrap_err().is_not_found());
        f.host.remove_step(&b).await.unwrap();

        let err = f.host.add_step("no-such-type", 0.0, 0.0).await.unwrap_err();
        assert!(err.is_not_found());
        f.host.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_port_value_coerces() {
        let f = fixture();
        let project = numeric_project(f.host.registry());
        assert!(f.host.try_activate_project(project).await);

        f.host.set_port_value("a/value", &serde_json::json!("7")).await.unwrap();
        let project = f.host.project().await.unwrap();
        let value = project.read().port("a/value").and_then(|p| p.value.clone());
        assert_eq!(value, Some(PortValue::Numeric(7.0)));
        f.host.shutdown().await;
    }

    #[tokio::test]
    async fn test_deactivate_clears_project() {
        let f = fixture();
        assert!(f.host.try_deactivate_project().await);
        assert!(f.host.try_activate_project(Project::new("p", "P")).await);
        assert!(f.host.try_deactivate_project().await);
        assert!(f.host.project().await.is_none());
        assert!(matches!(
            f.host.add_step("constant", 0.0, 0.0).await,
            Err(HostError::NoProject)
        ));
        f.host.shutdown().await;
    }
}
