//! Step type registry for building step bodies by name
//!
//! Maps step type strings (as stored in [`StepDefinition::step_type`]) to
//! factories that construct a body from the step's JSON configuration.
//! Project definitions are resolved against a registry when loaded.
//!
//! # Usage
//!
//! ```ignore
//! use flow_engine::StepRegistry;
//!
//! let mut registry = StepRegistry::with_builtin_steps();
//! registry.register_fn("threshold", |config| Ok(Arc::new(Threshold::from_config(config)?)));
//! ```
//!
//! [`StepDefinition::step_type`]: crate::step::StepDefinition

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FlowEngineError, Result};
use crate::step::StepBody;

/// Factory for creating a step body from its configuration
pub trait StepFactory: Send + Sync {
    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn StepBody>>;
}

/// Factory wrapping a plain function or closure
struct FnStepFactory<F> {
    build: F,
}

impl<F> StepFactory for FnStepFactory<F>
where
    F: Fn(&serde_json::Value) -> Result<Arc<dyn StepBody>> + Send + Sync,
{
    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn StepBody>> {
        (self.build)(config)
    }
}

/// Registry of step types and their factories
///
/// Registries compose by merging; entries from the merged registry win
/// over existing ones with the same type.
pub struct StepRegistry {
    factories: HashMap<String, Arc<dyn StepFactory>>,
}

impl StepRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry preloaded with the steps in [`crate::steps`]
    pub fn with_builtin_steps() -> Self {
        let mut registry = Self::new();
        crate::steps::register_builtin(&mut registry);
        registry
    }

    /// Register a step type with a factory
    pub fn register(&mut self, step_type: impl Into<String>, factory: Arc<dyn StepFactory>) {
        self.factories.insert(step_type.into(), factory);
    }

    /// Register a step type using a constructor function
    pub fn register_fn<F>(&mut self, step_type: impl Into<String>, build: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn StepBody>> + Send + Sync + 'static,
    {
        self.register(step_type, Arc::new(FnStepFactory { build }));
    }

    /// Build a body for a step type
    pub fn create(&self, step_type: &str, config: &serde_json::Value) -> Result<Arc<dyn StepBody>> {
        let factory = self
            .factories
            .get(step_type)
            .ok_or_else(|| FlowEngineError::UnknownStepType(step_type.to_string()))?;
        factory.create(config)
    }

    /// Check if a step type is registered
    pub fn has_step_type(&self, step_type: &str) -> bool {
        self.factories.contains_key(step_type)
    }

    /// List all registered step types, sorted
    pub fn step_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Merge another registry into this one
    pub fn merge(&mut self, other: StepRegistry) {
        self.factories.extend(other.factories);
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::ConstantStep;
    use crate::types::{PortBrand, PortValue};

    fn constant_registry(step_type: &str, value: f64) -> StepRegistry {
        let mut registry = StepRegistry::new();
        registry.register_fn(step_type, move |_config| {
            Ok(Arc::new(ConstantStep::new(PortBrand::NUMERIC, PortValue::Numeric(value))))
        });
        registry
    }

    #[test]
    fn test_register_and_create() {
        let registry = constant_registry("seven", 7.0);
        assert!(registry.has_step_type("seven"));
        assert!(!registry.has_step_type("unknown"));

        let body = registry.create("seven", &serde_json::Value::Null).unwrap();
        assert_eq!(body.ports().len(), 1);
    }

    #[test]
    fn test_unknown_type_is_not_found() {
        let registry = StepRegistry::new();
        let err = registry
            .create("missing", &serde_json::Value::Null)
            .err()
            .unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_merge_registries() {
        let mut registry = constant_registry("a", 1.0);
        let mut other = constant_registry("b", 2.0);
        other.merge(constant_registry("c", 3.0));

        registry.merge(other);
        assert_eq!(registry.step_types(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_builtin_steps_are_registered() {
        let registry = StepRegistry::with_builtin_steps();
        for step_type in ["constant", "pass-through", "delay", "add", "counter"] {
            assert!(registry.has_step_type(step_type), "{} missing", step_type);
        }
    }

    #[test]
    fn test_factory_errors_propagate() {
        let registry = StepRegistry::with_builtin_steps();
        let err = registry
            .create("constant", &serde_json::json!({"brand": "not-a-brand"}))
            .err()
            .unwrap();
        assert!(matches!(err, FlowEngineError::InvalidConfig(_)));
    }
}
