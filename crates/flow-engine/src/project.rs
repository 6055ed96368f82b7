//! Projects: the steps and links of one flow
//!
//! The project owns every step, every port and every link. Ports live in an
//! arena keyed by their stable id; steps list the ids of the ports they own.
//! While a run is live the project is *frozen*: structural edits are refused
//! with [`FlowEngineError::ProjectFrozen`] instead of racing the loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::coercion::{can_link, coerce, coerce_json, to_json, CoercionError};
use crate::error::{FlowEngineError, GraphCycleError, Result};
use crate::events::PortSnapshot;
use crate::registry::StepRegistry;
use crate::step::{Step, StepBody, StepDefinition, StepIo};
use crate::topology::compile_order;
use crate::types::{IterationId, LinkId, Port, PortId, PortLink, PortValue, StepId};

/// Serializable form of a project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub links: Vec<PortLink>,
    /// Initial port values keyed by port id, as plain JSON
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<PortId, serde_json::Value>,
}

/// A link whose value could not be converted to the target brand
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationFailure {
    pub link_id: LinkId,
    pub error: CoercionError,
}

/// The steps and links of one flow
pub struct Project {
    id: String,
    name: String,
    steps: Vec<Step>,
    ports: HashMap<PortId, Port>,
    links: Vec<PortLink>,
    frozen: bool,
}

impl Project {
    /// Create a new empty project
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
            ports: HashMap::new(),
            links: Vec::new(),
            frozen: false,
        }
    }

    /// Build a project from its definition, constructing bodies from the registry
    pub fn from_definition(definition: ProjectDefinition, registry: &StepRegistry) -> Result<Self> {
        let mut project = Self::new(definition.id, definition.name);
        for step in definition.steps {
            let body = registry.create(&step.step_type, &step.config)?;
            project.add_step(step, body)?;
        }
        for link in definition.links {
            project.link_with_id(link.id, &link.source, &link.target)?;
        }
        for (port_id, value) in &definition.values {
            project.set_port_json(port_id, value)?;
        }
        Ok(project)
    }

    /// Serializable form of the current project (image values are omitted)
    pub fn to_definition(&self) -> ProjectDefinition {
        let mut values = BTreeMap::new();
        for step in &self.steps {
            for port_id in &step.ports {
                if let Some(value) = self.ports.get(port_id).and_then(|p| p.value.as_ref()) {
                    if !value.contains_image() {
                        values.insert(port_id.clone(), to_json(value));
                    }
                }
            }
        }
        ProjectDefinition {
            id: self.id.clone(),
            name: self.name.clone(),
            steps: self.steps.iter().map(|s| s.definition.clone()).collect(),
            links: self.links.clone(),
            values,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in authoring order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn links(&self) -> &[PortLink] {
        &self.links
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id() == id)
    }

    pub fn port(&self, id: &str) -> Option<&Port> {
        self.ports.get(id)
    }

    /// Ports of a step in declaration order
    pub fn step_ports<'a>(&'a self, step: &'a Step) -> impl Iterator<Item = &'a Port> + 'a {
        step.ports.iter().filter_map(move |id| self.ports.get(id))
    }

    pub fn find_link(&self, id: &str) -> Option<&PortLink> {
        self.links.iter().find(|l| l.id == id)
    }

    /// Link feeding an input port, if any
    pub fn incoming_link(&self, target: &str) -> Option<&PortLink> {
        self.links.iter().find(|l| l.target == target)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    fn ensure_editable(&self) -> Result<()> {
        if self.frozen {
            Err(FlowEngineError::ProjectFrozen)
        } else {
            Ok(())
        }
    }

    /// Add a step, materializing the ports its body declares
    pub fn add_step(&mut self, definition: StepDefinition, body: Arc<dyn StepBody>) -> Result<StepId> {
        self.ensure_editable()?;
        if self.step(&definition.id).is_some() {
            return Err(FlowEngineError::DuplicateId(definition.id));
        }

        let mut ports: Vec<Port> = Vec::new();
        for spec in body.ports() {
            let port = Port::from_spec(&definition.id, spec);
            if ports.iter().any(|p| p.id == port.id) {
                return Err(FlowEngineError::DuplicateId(port.id));
            }
            ports.push(port);
        }

        let step_id = definition.id.clone();
        let port_ids = ports.iter().map(|p| p.id.clone()).collect();
        for port in ports {
            self.ports.insert(port.id.clone(), port);
        }
        self.steps.push(Step::new(definition, port_ids, body));
        log::debug!("Added step '{}' to project '{}'", step_id, self.id);
        Ok(step_id)
    }

    /// Remove a step together with its ports and every link touching them
    pub fn remove_step(&mut self, id: &str) -> Result<Step> {
        self.ensure_editable()?;
        let position = self
            .steps
            .iter()
            .position(|s| s.id() == id)
            .ok_or_else(|| FlowEngineError::StepNotFound(id.to_string()))?;
        let step = self.steps.remove(position);

        let attached: Vec<LinkId> = self
            .links
            .iter()
            .filter(|l| step.ports.contains(&l.source) || step.ports.contains(&l.target))
            .map(|l| l.id.clone())
            .collect();
        for link_id in attached {
            self.unlink(&link_id)?;
        }
        for port_id in &step.ports {
            self.ports.remove(port_id);
        }
        log::debug!("Removed step '{}' from project '{}'", id, self.id);
        Ok(step)
    }

    /// Link an output port to an input port under a generated id
    pub fn link(&mut self, source: &str, target: &str) -> Result<LinkId> {
        self.link_with_id(uuid::Uuid::new_v4().to_string(), source, target)
    }

    /// Link an output port to an input port under an explicit id
    pub fn link_with_id(&mut self, id: impl Into<String>, source: &str, target: &str) -> Result<LinkId> {
        self.ensure_editable()?;
        let id = id.into();
        if self.find_link(&id).is_some() {
            return Err(FlowEngineError::DuplicateId(id));
        }

        let invalid = |reason: &str| FlowEngineError::InvalidLink {
            source_port: source.to_string(),
            target_port: target.to_string(),
            reason: reason.to_string(),
        };
        let source_port = self
            .ports
            .get(source)
            .ok_or_else(|| FlowEngineError::PortNotFound(source.to_string()))?;
        let target_port = self
            .ports
            .get(target)
            .ok_or_else(|| FlowEngineError::PortNotFound(target.to_string()))?;
        if !source_port.is_output() {
            return Err(invalid("source must be an output port"));
        }
        if !target_port.is_input() {
            return Err(invalid("target must be an input port"));
        }
        if !can_link(source_port.brand, target_port.brand) {
            return Err(invalid(&format!(
                "{} cannot be converted to {}",
                source_port.brand, target_port.brand
            )));
        }
        if let Some(existing) = self.incoming_link(target) {
            return Err(FlowEngineError::TargetAlreadyLinked {
                target: target.to_string(),
                existing: existing.id.clone(),
            });
        }

        self.links.push(PortLink::new(id.clone(), source, target));
        self.refresh_connected(source);
        self.refresh_connected(target);
        Ok(id)
    }

    /// Remove a link
    pub fn unlink(&mut self, id: &str) -> Result<PortLink> {
        self.ensure_editable()?;
        let position = self
            .links
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| FlowEngineError::LinkNotFound(id.to_string()))?;
        let link = self.links.remove(position);
        self.refresh_connected(&link.source);
        self.refresh_connected(&link.target);
        Ok(link)
    }

    fn refresh_connected(&mut self, port_id: &str) {
        let connected = self
            .links
            .iter()
            .any(|l| l.source == port_id || l.target == port_id);
        if let Some(port) = self.ports.get_mut(port_id) {
            port.connected = connected;
        }
    }

    /// Write a port value, converting it to the port's brand
    ///
    /// Value writes are not structural and are accepted while running;
    /// the loop picks the value up at the next step boundary.
    pub fn set_port_value(&mut self, port_id: &str, value: &PortValue) -> Result<()> {
        let port = self
            .ports
            .get_mut(port_id)
            .ok_or_else(|| FlowEngineError::PortNotFound(port_id.to_string()))?;
        port.value = Some(coerce(value, port.brand, &port.options)?);
        Ok(())
    }

    /// Write a port value given as plain JSON
    pub fn set_port_json(&mut self, port_id: &str, value: &serde_json::Value) -> Result<()> {
        let port = self
            .ports
            .get_mut(port_id)
            .ok_or_else(|| FlowEngineError::PortNotFound(port_id.to_string()))?;
        port.value = Some(coerce_json(value, port.brand, &port.options)?);
        Ok(())
    }

    /// Execution order for the current graph
    pub fn compile_order(&self) -> std::result::Result<Vec<StepId>, GraphCycleError> {
        let steps: Vec<StepId> = self.steps.iter().map(|s| s.id().to_string()).collect();
        let dependencies: Vec<(StepId, StepId)> = self
            .links
            .iter()
            .filter_map(|l| {
                let source = self.ports.get(&l.source)?;
                let target = self.ports.get(&l.target)?;
                Some((source.step_id.clone(), target.step_id.clone()))
            })
            .collect();
        compile_order(&steps, &dependencies)
    }

    /// Body and I/O snapshot for running a step
    pub(crate) fn prepare_step(
        &self,
        step_id: &str,
        iteration_id: IterationId,
    ) -> Result<(Arc<dyn StepBody>, StepIo)> {
        let step = self
            .step(step_id)
            .ok_or_else(|| FlowEngineError::StepNotFound(step_id.to_string()))?;
        let mut io = StepIo::new(step_id, iteration_id);
        for port in self.step_ports(step) {
            if port.is_input() {
                io.insert_input(&port.name, port.value.clone());
            } else {
                io.insert_output(&port.name, port.brand, port.options.clone(), port.value.clone());
            }
        }
        Ok((step.body(), io))
    }

    /// Store values a step wrote to its outputs (already brand-converted)
    pub(crate) fn apply_outputs(&mut self, step_id: &str, written: Vec<(String, PortValue)>) {
        for (name, value) in written {
            let id = crate::types::port_id(step_id, &name);
            if let Some(port) = self.ports.get_mut(&id) {
                port.value = Some(value);
            }
        }
    }

    /// Copy every output value of a step along its links
    ///
    /// Unset sources leave targets untouched. A failed conversion leaves
    /// the target untouched and is reported.
    pub(crate) fn propagate_from(&mut self, step_id: &str) -> Vec<PropagationFailure> {
        let mut updates = Vec::new();
        let mut failures = Vec::new();

        for link in &self.links {
            let Some(source) = self.ports.get(&link.source) else {
                continue;
            };
            if source.step_id != step_id {
                continue;
            }
            let (Some(value), Some(target)) = (source.value.as_ref(), self.ports.get(&link.target)) else {
                continue;
            };
            match coerce(value, target.brand, &target.options) {
                Ok(converted) => updates.push((link.target.clone(), converted)),
                Err(error) => failures.push(PropagationFailure {
                    link_id: link.id.clone(),
                    error,
                }),
            }
        }

        for (target, value) in updates {
            if let Some(port) = self.ports.get_mut(&target) {
                port.value = Some(value);
            }
        }
        failures
    }

    /// Current output values of a step
    pub fn output_snapshots(&self, step_id: &str) -> Vec<PortSnapshot> {
        let Some(step) = self.step(step_id) else {
            return Vec::new();
        };
        self.step_ports(step)
            .filter(|p| p.is_output())
            .filter_map(|p| {
                p.value.as_ref().map(|value| PortSnapshot {
                    port_id: p.id.clone(),
                    port_name: p.name.clone(),
                    brand: p.brand,
                    value: value.clone(),
                })
            })
            .collect()
    }

    /// Bodies of every step, for releasing their resources
    pub fn bodies(&self) -> Vec<Arc<dyn StepBody>> {
        self.steps.iter().map(Step::body).collect()
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.id)
            .field("steps", &self.steps)
            .field("links", &self.links)
            .field("frozen", &self.frozen)
            .finish()
    }
}
