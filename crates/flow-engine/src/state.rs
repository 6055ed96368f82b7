//! Engine lifecycle states and status snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::IterationId;

/// Lifecycle state of an engine
///
/// `Idle` is initial. `Stopped`, `Aborted` and `Finished` are terminal
/// until the next accepted start moves the engine back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    Stopping,
    Stopped,
    Aborting,
    Aborted,
    Finished,
}

impl EngineState {
    /// A run is in flight (the loop task exists)
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping | Self::Aborting)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Aborted | Self::Finished)
    }
}

/// How many iterations a run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    /// Exactly one iteration, then `Finished`
    SingleRun,
    /// Iterate until stopped or aborted
    ContinuousRun,
}

/// Point-in-time snapshot of an engine
///
/// Produced fresh for every query and every transition; holding one never
/// observes later changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMeta {
    pub state: EngineState,
    pub execution_type: Option<ExecutionType>,
    /// Iterations finished in the current (or last) run
    pub iterations: u64,
    pub successful_iterations: u64,
    pub failed_iterations: u64,
    /// Iteration in flight, if any
    pub current_iteration: Option<IterationId>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_iteration_finished_at: Option<DateTime<Utc>>,
    /// Why the last start request was refused, if it was
    pub diagnostic: Option<String>,
}

impl EngineMeta {
    /// Snapshot of an engine that never ran
    pub fn idle() -> Self {
        Self {
            state: EngineState::Idle,
            execution_type: None,
            iterations: 0,
            successful_iterations: 0,
            failed_iterations: 0,
            current_iteration: None,
            started_at: None,
            stopped_at: None,
            last_iteration_finished_at: None,
            diagnostic: None,
        }
    }
}

/// Answer to a lifecycle request
///
/// Rejections are routine (start while running, stop while idle) and carry
/// the current meta instead of an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleOutcome {
    pub accepted: bool,
    pub meta: EngineMeta,
}

impl LifecycleOutcome {
    pub fn accepted(meta: EngineMeta) -> Self {
        Self {
            accepted: true,
            meta,
        }
    }

    pub fn rejected(meta: EngineMeta) -> Self {
        Self {
            accepted: false,
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classes() {
        for state in [EngineState::Running, EngineState::Stopping, EngineState::Aborting] {
            assert!(state.is_live());
            assert!(!state.is_terminal());
        }
        for state in [EngineState::Stopped, EngineState::Aborted, EngineState::Finished] {
            assert!(state.is_terminal());
            assert!(!state.is_live());
        }
        assert!(!EngineState::Idle.is_live());
        assert!(!EngineState::Idle.is_terminal());
    }

    #[test]
    fn test_meta_serializes_camel_case() {
        let json = serde_json::to_value(EngineMeta::idle()).unwrap();
        assert_eq!(json["state"], "idle");
        assert!(json.get("successfulIterations").is_some());
    }
}
