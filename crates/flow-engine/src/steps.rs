//! Built-in steps
//!
//! Small general-purpose bodies available in every registry. Device and
//! vision steps live with the hosts that own the hardware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::coercion::coerce_json;
use crate::error::{FlowEngineError, Result};
use crate::registry::StepRegistry;
use crate::step::{StepBody, StepIo};
use crate::types::{PortBrand, PortSpec, PortValue};

/// Register every built-in step type
pub fn register_builtin(registry: &mut StepRegistry) {
    registry.register_fn(ConstantStep::STEP_TYPE, |config| {
        Ok(Arc::new(ConstantStep::from_config(config)?))
    });
    registry.register_fn(PassThroughStep::STEP_TYPE, |config| {
        let config: BrandConfig = parse_config(config)?;
        Ok(Arc::new(PassThroughStep::new(config.brand)))
    });
    registry.register_fn(DelayStep::STEP_TYPE, |config| {
        let config: DelayConfig = parse_config(config)?;
        Ok(Arc::new(DelayStep::new(
            config.brand,
            Duration::from_millis(config.duration_ms),
        )))
    });
    registry.register_fn(AddStep::STEP_TYPE, |_config| Ok(Arc::new(AddStep)));
    registry.register_fn(CounterStep::STEP_TYPE, |_config| Ok(Arc::new(CounterStep::new())));
}

/// Parse a step configuration; `null` yields the defaults
fn parse_config<T: DeserializeOwned + Default>(config: &serde_json::Value) -> Result<T> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| FlowEngineError::config(e.to_string()))
}

/// Configuration naming the brand of a step's ports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandConfig {
    pub brand: PortBrand,
}

impl Default for BrandConfig {
    fn default() -> Self {
        Self {
            brand: PortBrand::NUMERIC,
        }
    }
}

/// Configuration for the constant step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstantConfig {
    pub brand: PortBrand,
    /// Value written every iteration; unset keeps whatever the port holds
    pub value: Option<serde_json::Value>,
    pub options: Vec<String>,
}

impl Default for ConstantConfig {
    fn default() -> Self {
        Self {
            brand: PortBrand::NUMERIC,
            value: None,
            options: Vec::new(),
        }
    }
}

/// Emits a fixed value on its single output
pub struct ConstantStep {
    brand: PortBrand,
    options: Vec<String>,
    value: Option<PortValue>,
}

impl ConstantStep {
    pub const STEP_TYPE: &'static str = "constant";
    pub const PORT_VALUE: &'static str = "value";

    pub fn new(brand: PortBrand, value: PortValue) -> Self {
        Self {
            brand,
            options: Vec::new(),
            value: Some(value),
        }
    }

    /// Constant whose value is set from outside through its port
    pub fn unset(brand: PortBrand) -> Self {
        Self {
            brand,
            options: Vec::new(),
            value: None,
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: ConstantConfig = parse_config(config)?;
        let value = config
            .value
            .as_ref()
            .map(|json| coerce_json(json, config.brand, &config.options))
            .transpose()?;
        Ok(Self {
            brand: config.brand,
            options: config.options,
            value,
        })
    }
}

#[async_trait]
impl StepBody for ConstantStep {
    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::output(Self::PORT_VALUE, self.brand).with_options(self.options.clone())]
    }

    async fn run(&self, io: &mut StepIo, _cancel: &CancellationToken) -> Result<bool> {
        if let Some(value) = &self.value {
            io.set_output(Self::PORT_VALUE, value.clone())?;
        }
        Ok(true)
    }
}

/// Copies its input to its output; fails the iteration while unset
pub struct PassThroughStep {
    brand: PortBrand,
}

impl PassThroughStep {
    pub const STEP_TYPE: &'static str = "pass-through";
    pub const PORT_IN: &'static str = "in";
    pub const PORT_OUT: &'static str = "out";

    pub fn new(brand: PortBrand) -> Self {
        Self { brand }
    }
}

#[async_trait]
impl StepBody for PassThroughStep {
    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::input(Self::PORT_IN, self.brand),
            PortSpec::output(Self::PORT_OUT, self.brand),
        ]
    }

    async fn run(&self, io: &mut StepIo, _cancel: &CancellationToken) -> Result<bool> {
        let Some(value) = io.input(Self::PORT_IN).cloned() else {
            return Ok(false);
        };
        io.set_output(Self::PORT_OUT, value)?;
        Ok(true)
    }
}

/// Configuration for the delay step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelayConfig {
    pub brand: PortBrand,
    pub duration_ms: u64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            brand: PortBrand::NUMERIC,
            duration_ms: 100,
        }
    }
}

/// Waits, then copies its input to its output
///
/// The wait ends early with [`FlowEngineError::Cancelled`] when the run is
/// aborted.
pub struct DelayStep {
    brand: PortBrand,
    duration: Duration,
}

impl DelayStep {
    pub const STEP_TYPE: &'static str = "delay";
    pub const PORT_IN: &'static str = "in";
    pub const PORT_OUT: &'static str = "out";

    pub fn new(brand: PortBrand, duration: Duration) -> Self {
        Self { brand, duration }
    }
}

#[async_trait]
impl StepBody for DelayStep {
    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::input(Self::PORT_IN, self.brand),
            PortSpec::output(Self::PORT_OUT, self.brand),
        ]
    }

    async fn run(&self, io: &mut StepIo, cancel: &CancellationToken) -> Result<bool> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(FlowEngineError::Cancelled),
            _ = tokio::time::sleep(self.duration) => {}
        }
        if let Some(value) = io.input(Self::PORT_IN).cloned() {
            io.set_output(Self::PORT_OUT, value)?;
        }
        Ok(true)
    }
}

/// Sums two numeric inputs
pub struct AddStep;

impl AddStep {
    pub const STEP_TYPE: &'static str = "add";
    pub const PORT_A: &'static str = "a";
    pub const PORT_B: &'static str = "b";
    pub const PORT_SUM: &'static str = "sum";
}

#[async_trait]
impl StepBody for AddStep {
    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::input(Self::PORT_A, PortBrand::NUMERIC),
            PortSpec::input(Self::PORT_B, PortBrand::NUMERIC),
            PortSpec::output(Self::PORT_SUM, PortBrand::NUMERIC),
        ]
    }

    async fn run(&self, io: &mut StepIo, _cancel: &CancellationToken) -> Result<bool> {
        let (Some(a), Some(b)) = (io.input_f64(Self::PORT_A), io.input_f64(Self::PORT_B)) else {
            return Ok(false);
        };
        io.set_output(Self::PORT_SUM, PortValue::Numeric(a + b))?;
        Ok(true)
    }
}

/// Emits how many times it has run
pub struct CounterStep {
    runs: AtomicU64,
}

impl CounterStep {
    pub const STEP_TYPE: &'static str = "counter";
    pub const PORT_COUNT: &'static str = "count";

    pub fn new() -> Self {
        Self {
            runs: AtomicU64::new(0),
        }
    }
}

impl Default for CounterStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepBody for CounterStep {
    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::output(Self::PORT_COUNT, PortBrand::NUMERIC)]
    }

    async fn run(&self, io: &mut StepIo, _cancel: &CancellationToken) -> Result<bool> {
        let runs = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        io.set_output(Self::PORT_COUNT, PortValue::Numeric(runs as f64))?;
        Ok(true)
    }

    async fn release(&self) {
        self.runs.store(0, Ordering::Relaxed);
    }
}
