//! Fluent builder for project definitions
//!
//! Provides a fluent API for constructing projects programmatically.

use crate::error::Result;
use crate::project::{Project, ProjectDefinition};
use crate::registry::StepRegistry;
use crate::step::StepDefinition;
use crate::types::{port_id, PortLink};

/// Fluent builder for constructing project definitions
///
/// # Example
///
/// ```ignore
/// let project = ProjectBuilder::new("p-1", "Inspection")
///     .add_step("limit", "constant", (0.0, 0.0))
///     .with_config(serde_json::json!({"value": 10}))
///     .add_step("copy", "pass-through", (200.0, 0.0))
///     .link("limit", "value", "copy", "in")
///     .instantiate(&StepRegistry::with_builtin_steps())?;
/// ```
pub struct ProjectBuilder {
    definition: ProjectDefinition,
    link_counter: usize,
}

impl ProjectBuilder {
    /// Create a new project builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            definition: ProjectDefinition {
                id: id.into(),
                name: name.into(),
                ..ProjectDefinition::default()
            },
            link_counter: 0,
        }
    }

    /// Add a step to the project
    pub fn add_step(
        mut self,
        id: impl Into<String>,
        step_type: impl Into<String>,
        position: (f64, f64),
    ) -> Self {
        let (x, y) = position;
        self.definition
            .steps
            .push(StepDefinition::new(id, step_type).with_position(x, y));
        self
    }

    /// Set the configuration of the most recently added step
    ///
    /// Must be called immediately after `add_step`.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        if let Some(step) = self.definition.steps.last_mut() {
            step.config = config;
        }
        self
    }

    /// Set the display name of the most recently added step
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        if let Some(step) = self.definition.steps.last_mut() {
            step.name = name.into();
        }
        self
    }

    /// Link an output port to an input port (auto-generates the link ID)
    pub fn link(
        mut self,
        source_step: &str,
        source_port: &str,
        target_step: &str,
        target_port: &str,
    ) -> Self {
        self.link_counter += 1;
        let id = format!("link-{}", self.link_counter);
        self.definition.links.push(PortLink::new(
            id,
            port_id(source_step, source_port),
            port_id(target_step, target_port),
        ));
        self
    }

    /// Link two ports under an explicit ID
    pub fn link_with_id(
        mut self,
        link_id: impl Into<String>,
        source_step: &str,
        source_port: &str,
        target_step: &str,
        target_port: &str,
    ) -> Self {
        self.definition.links.push(PortLink::new(
            link_id,
            port_id(source_step, source_port),
            port_id(target_step, target_port),
        ));
        self
    }

    /// Set the initial value of a port
    pub fn value(mut self, step: &str, port: &str, value: serde_json::Value) -> Self {
        self.definition.values.insert(port_id(step, port), value);
        self
    }

    /// Build the definition without validation
    pub fn build(self) -> ProjectDefinition {
        self.definition
    }

    /// Build a live project, resolving step types against `registry`
    pub fn instantiate(self, registry: &StepRegistry) -> Result<Project> {
        Project::from_definition(self.definition, registry)
    }
}
