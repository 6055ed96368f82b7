//! Error types for the flow engine

use thiserror::Error;

use crate::coercion::CoercionError;
use crate::types::{LinkId, PortId, StepId};

/// Result type alias using FlowEngineError
pub type Result<T> = std::result::Result<T, FlowEngineError>;

/// A cycle among links, naming every step that could not be ordered
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cycle detected between steps: {}", step_ids.join(", "))]
pub struct GraphCycleError {
    /// Steps left with unresolved dependencies, in authoring order
    pub step_ids: Vec<StepId>,
}

/// Errors that can occur in the flow engine
#[derive(Debug, Error)]
pub enum FlowEngineError {
    /// The link graph is not acyclic
    #[error(transparent)]
    GraphCycle(#[from] GraphCycleError),

    /// A value could not be converted to a port's brand
    #[error(transparent)]
    Coercion(#[from] CoercionError),

    /// Step not found in the project
    #[error("Step not found: {0}")]
    StepNotFound(StepId),

    /// Port not found in the project
    #[error("Port not found: {0}")]
    PortNotFound(PortId),

    /// Link not found in the project
    #[error("Link not found: {0}")]
    LinkNotFound(LinkId),

    /// No step type registered under this key
    #[error("Unknown step type: {0}")]
    UnknownStepType(String),

    /// The target input already has an incoming link
    #[error("Port '{target}' is already linked by '{existing}'")]
    TargetAlreadyLinked { target: PortId, existing: LinkId },

    /// Link endpoints have the wrong direction or incompatible brands
    #[error("Invalid link {source_port} -> {target_port}: {reason}")]
    InvalidLink {
        source_port: PortId,
        target_port: PortId,
        reason: String,
    },

    /// Structural edit attempted while a run is in flight
    #[error("Project is frozen while the engine is running")]
    ProjectFrozen,

    /// Identifier collision on insert
    #[error("Duplicate identifier: {0}")]
    DuplicateId(String),

    /// Step body reported a fault
    #[error("Step execution failed: {0}")]
    StepFailed(String),

    /// Step run was cancelled
    #[error("Step cancelled")]
    Cancelled,

    /// Step configuration is malformed
    #[error("Invalid step configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowEngineError {
    /// Create a step failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::StepFailed(msg.into())
    }

    /// Create an invalid configuration error with a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this error describes a conflict with the current state
    /// rather than a missing entity or bad input
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::TargetAlreadyLinked { .. } | Self::ProjectFrozen | Self::DuplicateId(_)
        )
    }

    /// Whether this error describes a missing entity
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::StepNotFound(_)
                | Self::PortNotFound(_)
                | Self::LinkNotFound(_)
                | Self::UnknownStepType(_)
        )
    }
}
