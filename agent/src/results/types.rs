//! Per-iteration result records

use chrono::{DateTime, Utc};
use flow_engine::{IterationId, PortBrand, PortSnapshot, PortValue, StepId};
use serde::{Deserialize, Serialize};

use super::DrainError;

/// Captured value of one port when its step finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortResult {
    /// Unique within one iteration
    pub id: String,
    pub step_id: StepId,
    pub port_name: String,
    pub brand: PortBrand,
    pub value: PortValue,
    /// Set when a downscaled preview replaced the original image
    pub scale: Option<f64>,
}

impl PortResult {
    /// Result for an output port snapshot, keyed by the port id
    pub fn from_snapshot(step_id: &str, snapshot: PortSnapshot) -> Self {
        Self {
            id: snapshot.port_id,
            step_id: step_id.to_string(),
            port_name: snapshot.port_name,
            brand: snapshot.brand,
            value: snapshot.value,
            scale: None,
        }
    }
}

/// Aggregated outcome of one iteration, pending transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub iteration_id: IterationId,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub success: bool,
    /// Append-only, in insertion order
    results: Vec<PortResult>,
}

impl WorkflowResult {
    pub fn new(iteration_id: IterationId, agent_id: impl Into<String>) -> Self {
        Self {
            iteration_id,
            agent_id: agent_id.into(),
            started_at: Utc::now(),
            stopped_at: None,
            elapsed_ms: 0,
            success: false,
            results: Vec::new(),
        }
    }

    /// Append a port result; a repeated id is refused and nothing changes
    pub fn insert(&mut self, result: PortResult) -> Result<(), DrainError> {
        if self.results.iter().any(|r| r.id == result.id) {
            return Err(DrainError::DuplicateResultId {
                iteration_id: self.iteration_id,
                result_id: result.id,
            });
        }
        self.results.push(result);
        Ok(())
    }

    pub fn results(&self) -> &[PortResult] {
        &self.results
    }

    pub fn get(&self, id: &str) -> Option<&PortResult> {
        self.results.iter().find(|r| r.id == id)
    }

    /// Replace every port result by `f` applied to it, keeping the order
    pub fn map_results(&mut self, f: impl FnMut(PortResult) -> PortResult) {
        self.results = std::mem::take(&mut self.results).into_iter().map(f).collect();
    }

    /// Stamp the stop time, elapsed time and outcome
    pub fn finish(&mut self, success: bool) {
        let now = Utc::now();
        self.stopped_at = Some(now);
        self.elapsed_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.success = success;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(id: &str, value: f64) -> PortResult {
        PortResult {
            id: id.to_string(),
            step_id: "s".to_string(),
            port_name: "out".to_string(),
            brand: PortBrand::NUMERIC,
            value: PortValue::Numeric(value),
            scale: None,
        }
    }

    #[test]
    fn test_duplicate_id_leaves_existing_entry() {
        let mut result = WorkflowResult::new(uuid::Uuid::new_v4(), "agent");
        result.insert(numeric("s/out", 1.0)).unwrap();

        let err = result.insert(numeric("s/out", 2.0)).unwrap_err();
        assert!(matches!(err, DrainError::DuplicateResultId { .. }));
        assert_eq!(result.results().len(), 1);
        assert_eq!(result.get("s/out").unwrap().value, PortValue::Numeric(1.0));
    }

    #[test]
    fn test_map_results_keeps_order() {
        let mut result = WorkflowResult::new(uuid::Uuid::new_v4(), "agent");
        result.insert(numeric("a/out", 1.0)).unwrap();
        result.insert(numeric("b/out", 2.0)).unwrap();

        result.map_results(|mut r| {
            r.scale = Some(1.0);
            r
        });
        let ids: Vec<_> = result.results().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a/out", "b/out"]);
        assert!(result.results().iter().all(|r| r.scale == Some(1.0)));
    }

    #[test]
    fn test_finish_stamps_outcome() {
        let mut result = WorkflowResult::new(uuid::Uuid::new_v4(), "agent");
        result.finish(true);
        assert!(result.success);
        assert!(result.stopped_at.unwrap() >= result.started_at);
    }
}
