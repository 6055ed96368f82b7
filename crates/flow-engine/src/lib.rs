//! Flow Engine - Step graph execution for the flow agent
//!
//! This crate models a flow as steps exposing typed ports, joined by links
//! from output ports to input ports, and runs it iteration by iteration:
//!
//! - Deterministic execution order (Kahn's algorithm, authoring-order ties)
//! - Value coercion between port brands along links
//! - A lifecycle state machine with start/stop/abort and cancellation
//! - Event subscriptions with explicit unsubscribe handles
//!
//! # Architecture
//!
//! - `Project`: arena of steps, ports and links; frozen while a run is live
//! - `Engine`: owns the loop task of a run and publishes `EngineEvent`s
//! - `StepRegistry`: builds step bodies from project definitions
//!
//! # Example
//!
//! ```ignore
//! use flow_engine::{Engine, ExecutionType, ProjectBuilder, StepRegistry};
//!
//! let project = ProjectBuilder::new("p-1", "Inspection")
//!     .add_step("limit", "constant", (0.0, 0.0))
//!     .instantiate(&StepRegistry::with_builtin_steps())?;
//! let engine = Engine::new(std::sync::Arc::new(parking_lot::RwLock::new(project)));
//! engine.try_start(ExecutionType::SingleRun).await;
//! ```

pub mod builder;
pub mod coercion;
pub mod engine;
pub mod error;
pub mod events;
pub mod project;
pub mod registry;
pub mod state;
pub mod step;
pub mod steps;
pub mod topology;
pub mod types;

// Re-export key types
pub use builder::ProjectBuilder;
pub use coercion::{can_link, coerce, coerce_json, to_json, CoercionError};
pub use engine::{Engine, EngineOptions, SharedProject};
pub use error::{FlowEngineError, GraphCycleError, Result};
pub use events::{
    EngineEvent, EventBus, EventError, EventSink, NullEventSink, PortSnapshot, Subscription,
    VecEventSink,
};
pub use project::{Project, ProjectDefinition, PropagationFailure};
pub use registry::{StepFactory, StepRegistry};
pub use state::{EngineMeta, EngineState, ExecutionType, LifecycleOutcome};
pub use step::{Step, StepBody, StepDefinition, StepIo};
pub use topology::compile_order;
pub use types::{
    port_id, ImageData, IterationId, LinkId, Port, PortBrand, PortDirection, PortId, PortLink,
    PortSpec, PortValue, Rectangle, StepId, ValueKind,
};

// Re-export the cancellation token consumers need to implement steps
pub use tokio_util::sync::CancellationToken;
