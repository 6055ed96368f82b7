//! Step contract and step records
//!
//! A step wraps one pluggable unit of computation. The unit implements
//! [`StepBody`]; the engine hands it a [`StepIo`] holding a snapshot of the
//! step's input values and collects the outputs it writes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::coercion::coerce;
use crate::error::{FlowEngineError, Result};
use crate::types::{IterationId, PortBrand, PortId, PortSpec, PortValue, StepId};

/// The contract every pluggable step satisfies
///
/// `run` returns `Ok(false)` for a recoverable per-iteration failure.
/// An `Err` (or a panic) is a step fault; both mark the iteration
/// unsuccessful without stopping the remaining steps.
#[async_trait]
pub trait StepBody: Send + Sync {
    /// Ports exposed by this step, in display order
    fn ports(&self) -> Vec<PortSpec>;

    /// Execute one iteration
    ///
    /// Long-running bodies must watch `cancel` and return promptly once
    /// it fires.
    async fn run(&self, io: &mut StepIo, cancel: &CancellationToken) -> Result<bool>;

    /// Release devices or connections held by the body
    async fn release(&self) {}
}

/// Authoring data for a step instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: StepId,
    pub name: String,
    /// Registry key of the body implementation
    pub step_type: String,
    /// Position in the editor (x, y)
    #[serde(default)]
    pub position: (f64, f64),
    /// Configuration the body is constructed from
    #[serde(default)]
    pub config: serde_json::Value,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            step_type: step_type.into(),
            position: (0.0, 0.0),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = (x, y);
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// A step instance in a project
pub struct Step {
    pub definition: StepDefinition,
    /// Ports owned by this step, in declaration order
    pub ports: Vec<PortId>,
    body: Arc<dyn StepBody>,
}

impl Step {
    pub(crate) fn new(definition: StepDefinition, ports: Vec<PortId>, body: Arc<dyn StepBody>) -> Self {
        Self {
            definition,
            ports,
            body,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn body(&self) -> Arc<dyn StepBody> {
        Arc::clone(&self.body)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.definition.id)
            .field("name", &self.definition.name)
            .field("step_type", &self.definition.step_type)
            .field("ports", &self.ports)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct OutputSlot {
    brand: PortBrand,
    options: Vec<String>,
    value: Option<PortValue>,
    written: bool,
}

/// Input values and output slots handed to a step for one run
#[derive(Debug, Clone)]
pub struct StepIo {
    step_id: StepId,
    iteration_id: IterationId,
    inputs: HashMap<String, Option<PortValue>>,
    outputs: HashMap<String, OutputSlot>,
}

impl StepIo {
    pub(crate) fn new(step_id: impl Into<String>, iteration_id: IterationId) -> Self {
        Self {
            step_id: step_id.into(),
            iteration_id,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    pub(crate) fn insert_input(&mut self, name: &str, value: Option<PortValue>) {
        self.inputs.insert(name.to_string(), value);
    }

    pub(crate) fn insert_output(
        &mut self,
        name: &str,
        brand: PortBrand,
        options: Vec<String>,
        value: Option<PortValue>,
    ) {
        self.outputs.insert(
            name.to_string(),
            OutputSlot {
                brand,
                options,
                value,
                written: false,
            },
        );
    }

    /// Outputs written during the run, by port name
    pub(crate) fn into_written(self) -> Vec<(String, PortValue)> {
        self.outputs
            .into_iter()
            .filter(|(_, slot)| slot.written)
            .filter_map(|(name, slot)| slot.value.map(|value| (name, value)))
            .collect()
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn iteration_id(&self) -> IterationId {
        self.iteration_id
    }

    /// Current value of an input port, `None` if unset or unknown
    pub fn input(&self, name: &str) -> Option<&PortValue> {
        self.inputs.get(name).and_then(|v| v.as_ref())
    }

    /// Value of an input port that must be present
    pub fn require(&self, name: &str) -> Result<&PortValue> {
        self.input(name)
            .ok_or_else(|| FlowEngineError::failed(format!("missing input '{}'", name)))
    }

    pub fn input_f64(&self, name: &str) -> Option<f64> {
        self.input(name).and_then(PortValue::as_f64)
    }

    pub fn input_str(&self, name: &str) -> Option<&str> {
        self.input(name).and_then(PortValue::as_str)
    }

    pub fn input_bool(&self, name: &str) -> Option<bool> {
        self.input(name).and_then(PortValue::as_bool)
    }

    /// Current value of an output port (previous iteration or this run)
    pub fn output(&self, name: &str) -> Option<&PortValue> {
        self.outputs.get(name).and_then(|slot| slot.value.as_ref())
    }

    /// Write an output port, converting the value to the port's brand
    pub fn set_output(&mut self, name: &str, value: PortValue) -> Result<()> {
        let slot = self.outputs.get_mut(name).ok_or_else(|| {
            FlowEngineError::PortNotFound(crate::types::port_id(&self.step_id, name))
        })?;
        let value = coerce(&value, slot.brand, &slot.options)?;
        slot.value = Some(value);
        slot.written = true;
        Ok(())
    }
}
