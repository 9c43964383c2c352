//! Per-run result reports

use crate::core::{
    matrix::Coordinate,
    state::{RunResult, StepFailure},
    trigger::EventKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub step_id: String,
    pub name: String,
    pub result: RunResult,
    pub failure: Option<StepFailure>,
    pub outputs: BTreeMap<String, String>,
    /// Last lines of output, with secrets masked
    pub log_tail: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Where an instance stopped when it did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedStep {
    pub index: usize,
    pub step_id: String,
    pub failure: StepFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceReport {
    pub job_id: String,
    pub index: usize,
    pub coordinate: Coordinate,
    pub result: RunResult,
    pub failed_step: Option<FailedStep>,
    pub steps: Vec<StepReport>,
    /// Job outputs rendered from this instance
    pub outputs: BTreeMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl InstanceReport {
    /// Report for an instance that never started
    pub fn not_started(job_id: &str, index: usize, coordinate: Coordinate) -> Self {
        Self {
            job_id: job_id.to_string(),
            index,
            coordinate,
            result: RunResult::Cancelled,
            failed_step: None,
            steps: Vec::new(),
            outputs: BTreeMap::new(),
            started_at: None,
            finished_at: Utc::now(),
        }
    }

    pub fn was_started(&self) -> bool {
        self.started_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub result: RunResult,
    pub instances: Vec<InstanceReport>,
}

impl JobReport {
    /// Group instance reports by job, keeping first-appearance order
    pub fn group(instances: Vec<InstanceReport>) -> Vec<JobReport> {
        let mut jobs: Vec<JobReport> = Vec::new();
        for instance in instances {
            match jobs.iter_mut().find(|j| j.job_id == instance.job_id) {
                Some(job) => job.instances.push(instance),
                None => jobs.push(JobReport {
                    job_id: instance.job_id.clone(),
                    result: RunResult::Succeeded,
                    instances: vec![instance],
                }),
            }
        }
        for job in &mut jobs {
            job.result = RunResult::aggregate(job.instances.iter().map(|i| i.result));
        }
        jobs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentEnvironment {
    pub name: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    /// `None` when the gate kept the stage from running
    pub result: Option<RunResult>,
    pub jobs: Vec<JobReport>,
    pub environment: Option<DeploymentEnvironment>,
}

impl StageReport {
    pub fn instances_started(&self) -> usize {
        self.jobs
            .iter()
            .flat_map(|j| j.instances.iter())
            .filter(|i| i.was_started())
            .count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub event: EventKind,
    pub branch: String,
    pub actor: String,
    pub result: RunResult,
    pub stages: Vec<StageReport>,
    /// Gate outputs published by the first stage
    pub outputs: BTreeMap<String, String>,
    pub environment_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn instances(&self) -> impl Iterator<Item = &InstanceReport> {
        self.stages
            .iter()
            .flat_map(|s| s.jobs.iter())
            .flat_map(|j| j.instances.iter())
    }

    pub fn instances_started(&self) -> usize {
        self.stages.iter().map(|s| s.instances_started()).sum()
    }
}
