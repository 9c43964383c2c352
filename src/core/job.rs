//! Jobs and their expanded instances

use crate::core::{
    config::JobConfig,
    matrix::{Coordinate, MatrixError, Strategy},
    step::Step,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A named unit of work, expandable into instances through its matrix
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub strategy: Strategy,
    pub env: BTreeMap<String, String>,
    pub steps: Arc<[Step]>,
    /// Output templates published once an instance succeeds
    pub outputs: BTreeMap<String, String>,
}

impl Job {
    pub fn from_config(config: &JobConfig) -> Self {
        let steps: Vec<Step> = config
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| Step::from_config(step, index))
            .collect();

        let strategy = config
            .strategy
            .as_ref()
            .map(|s| Strategy {
                matrix: s.matrix.clone(),
                max_parallel: s.max_parallel,
            })
            .unwrap_or_default();

        Job {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            strategy,
            env: config.env.clone(),
            steps: steps.into(),
            outputs: config.outputs.clone(),
        }
    }

    /// Single-instance job built directly from steps
    pub fn new(id: impl Into<String>, steps: Vec<Step>) -> Self {
        let id = id.into();
        Job {
            name: id.clone(),
            id,
            strategy: Strategy::default(),
            env: BTreeMap::new(),
            steps: steps.into(),
            outputs: BTreeMap::new(),
        }
    }

    /// Expand into one instance per matrix coordinate
    pub fn instances(&self) -> Result<Vec<JobInstance>, MatrixError> {
        let coordinates = self.strategy.expand(&self.id)?;
        let env = Arc::new(self.env.clone());
        let outputs = Arc::new(self.outputs.clone());

        Ok(coordinates
            .into_iter()
            .enumerate()
            .map(|(index, coordinate)| JobInstance {
                job_id: self.id.clone(),
                job_name: self.name.clone(),
                index,
                coordinate,
                steps: Arc::clone(&self.steps),
                env: Arc::clone(&env),
                outputs: Arc::clone(&outputs),
            })
            .collect())
    }
}

/// A job bound to one matrix coordinate
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub job_id: String,
    pub job_name: String,
    /// Position in the job's expansion order
    pub index: usize,
    pub coordinate: Coordinate,
    pub steps: Arc<[Step]>,
    pub env: Arc<BTreeMap<String, String>>,
    pub outputs: Arc<BTreeMap<String, String>>,
}

impl JobInstance {
    /// Identity of the instance within a run
    pub fn key(&self) -> (&str, &Coordinate) {
        (&self.job_id, &self.coordinate)
    }

    /// Directory name for the instance sandbox.
    ///
    /// Bytes other than ASCII alphanumerics and `-` are written as `_xx`, so
    /// distinct job ids never share a directory.
    pub fn sandbox_name(&self) -> String {
        let mut name = String::with_capacity(self.job_id.len() + 4);
        for byte in self.job_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                name.push(byte as char);
            } else {
                name.push_str(&format!("_{:02x}", byte));
            }
        }
        format!("{}-{}", name, self.index + 1)
    }
}

impl fmt::Display for JobInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.coordinate.is_empty() {
            write!(f, "{}", self.job_id)
        } else {
            write!(f, "{} ({})", self.job_id, self.coordinate)
        }
    }
}
