//! Pipeline gate - orders stages and publishes the build outputs once

use crate::core::{report::InstanceReport, state::RunResult};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// A stage was asked to start before its predecessor succeeded
    #[error("stage '{stage}' cannot start: stage '{blocking}' has not succeeded")]
    Violation { stage: String, blocking: String },

    #[error("gate outputs have already been published")]
    OutputsAlreadyPublished,

    /// Two instances produced different values for the same output
    #[error("conflicting values for output '{key}'")]
    ConflictingOutput { key: String },
}

/// Happens-before barrier between the stages of one run
#[derive(Debug)]
pub struct PipelineGate {
    stages: Vec<String>,
    results: Vec<Option<RunResult>>,
    outputs: OnceLock<BTreeMap<String, String>>,
}

impl PipelineGate {
    pub fn new<I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stages: Vec<String> = stages.into_iter().map(Into::into).collect();
        let results = vec![None; stages.len()];
        Self {
            stages,
            results,
            outputs: OnceLock::new(),
        }
    }

    /// Check that every stage before `index` has succeeded
    pub fn admit(&self, index: usize) -> Result<(), GateError> {
        for (name, result) in self.stages.iter().zip(&self.results).take(index) {
            if *result != Some(RunResult::Succeeded) {
                return Err(GateError::Violation {
                    stage: self.stages.get(index).cloned().unwrap_or_default(),
                    blocking: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Earlier stage that ended without success, which short-circuits `index`
    pub fn blocking_stage(&self, index: usize) -> Option<&str> {
        self.stages
            .iter()
            .zip(&self.results)
            .take(index)
            .find(|(_, result)| matches!(result, Some(r) if !r.is_success()))
            .map(|(name, _)| name.as_str())
    }

    pub fn record(&mut self, index: usize, result: RunResult) {
        if let Some(slot) = self.results.get_mut(index) {
            *slot = Some(result);
        }
    }

    /// Publish the output map; it is read-only from then on
    pub fn publish(&self, outputs: BTreeMap<String, String>) -> Result<&BTreeMap<String, String>, GateError> {
        self.outputs
            .set(outputs)
            .map_err(|_| GateError::OutputsAlreadyPublished)?;
        self.outputs.get().ok_or(GateError::OutputsAlreadyPublished)
    }

    pub fn outputs(&self) -> Option<&BTreeMap<String, String>> {
        self.outputs.get()
    }

    /// Result of the first stage that did not succeed, otherwise Succeeded
    pub fn result(&self) -> RunResult {
        self.results
            .iter()
            .flatten()
            .copied()
            .find(|r| !r.is_success())
            .unwrap_or(RunResult::Succeeded)
    }
}

/// Merge job outputs of every instance in a stage
pub fn merge_outputs(instances: &[InstanceReport]) -> Result<BTreeMap<String, String>, GateError> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for instance in instances {
        for (key, value) in &instance.outputs {
            match merged.get(key) {
                Some(existing) if existing != value => {
                    return Err(GateError::ConflictingOutput { key: key.clone() })
                }
                Some(_) => {}
                None => {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
    }
    Ok(merged)
}
