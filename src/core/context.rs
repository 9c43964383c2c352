//! Run and instance contexts - shared values and template variables

use crate::core::{
    job::JobInstance,
    pipeline::{PipelineDefinition, Repository},
    secret::Secrets,
    trigger::RunSpec,
};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Read-only values shared by every instance of a run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub pipeline: String,
    pub repository: Repository,
    pub spec: RunSpec,

    /// Pipeline-level environment
    pub env: BTreeMap<String, String>,

    /// Outputs published through the gate; empty until the first stage succeeds
    pub outputs: BTreeMap<String, String>,

    pub secrets: Secrets,
}

impl RunContext {
    pub fn new(definition: &PipelineDefinition, spec: RunSpec, secrets: Secrets) -> Self {
        Self {
            run_id: spec.run_id,
            pipeline: definition.name.clone(),
            repository: definition.repository.clone(),
            spec,
            env: definition.env.clone(),
            outputs: BTreeMap::new(),
            secrets,
        }
    }

    /// Variables every template in the run can reference
    pub fn base_variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("run_id".to_string(), self.run_id.to_string());
        vars.insert("pipeline".to_string(), self.pipeline.clone());
        vars.insert("repository".to_string(), self.repository.to_string());
        vars.insert("repository_owner".to_string(), self.repository.owner.clone());
        vars.insert("repository_name".to_string(), self.repository.name.clone());
        vars.insert("actor".to_string(), self.spec.event.actor.clone());
        vars.insert("branch".to_string(), self.spec.event.branch.clone());
        vars.insert("event".to_string(), self.spec.event.kind.to_string());

        for (key, value) in &self.spec.inputs {
            vars.insert(format!("inputs.{}", key), value.clone());
        }
        for (key, value) in &self.outputs {
            vars.insert(format!("outputs.{}", key), value.clone());
        }
        for (name, secret) in self.secrets.iter() {
            vars.insert(format!("secrets.{}", name), secret.expose().to_string());
        }

        vars
    }

    /// Copy of this context with gate outputs attached
    pub fn with_outputs(&self, outputs: BTreeMap<String, String>) -> Self {
        let mut next = self.clone();
        next.outputs = outputs;
        next
    }
}

/// Per-instance context; step outputs never leave the instance
#[derive(Debug, Clone)]
pub struct InstanceContext {
    /// Run and matrix variables
    pub variables: HashMap<String, String>,

    /// Outputs of completed steps (step_id -> key -> value)
    pub step_outputs: HashMap<String, BTreeMap<String, String>>,

    /// The current step being executed (if any)
    pub current_step_id: Option<String>,
}

impl InstanceContext {
    pub fn new(run: &RunContext, instance: &JobInstance) -> Self {
        let mut variables = run.base_variables();
        variables.insert("job".to_string(), instance.job_id.clone());
        for (axis, value) in instance.coordinate.iter() {
            variables.insert(format!("matrix.{}", axis), value.to_string());
        }

        Self {
            variables,
            step_outputs: HashMap::new(),
            current_step_id: None,
        }
    }

    /// Record the outputs of a step
    pub fn set_step_outputs(&mut self, step_id: &str, outputs: BTreeMap<String, String>) {
        self.step_outputs.insert(step_id.to_string(), outputs);
    }

    /// Get all variables available for rendering
    pub fn get_rendering_variables(&self) -> HashMap<String, String> {
        let mut vars = self.variables.clone();

        for (step_id, outputs) in &self.step_outputs {
            for (key, value) in outputs {
                vars.insert(format!("steps.{}.{}", step_id, key), value.clone());
            }
        }

        if let Some(ref current_step) = self.current_step_id {
            vars.insert("current_step".to_string(), current_step.clone());
        }

        vars
    }
}
