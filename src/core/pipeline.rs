//! Pipeline domain model

use crate::core::{
    config::{PermissionLevel, PipelineConfig},
    job::{Job, JobInstance},
    matrix::MatrixError,
    step::render_template,
    trigger::{BranchPattern, Triggers},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Default cap on concurrently running instances
pub const DEFAULT_MAX_PARALLEL: usize = 2;

/// Default per-step timeout
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 3600;

/// Default grace period for cooperative cancellation
pub const DEFAULT_CANCEL_GRACE_SECS: u64 = 10;

/// `owner/name` of the repository the pipeline belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn parse(slug: &str) -> Result<Self> {
        match slug.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => anyhow::bail!("Repository must be in 'owner/name' form, got '{}'", slug),
        }
    }

    /// Public URL of the repository's published pages
    pub fn pages_url(&self) -> String {
        format!("https://{}.github.io/{}", self.owner, self.name)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Group key plus overlap policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyGroup {
    /// Key template, rendered per run
    pub key: String,
    pub cancel_in_progress: bool,
}

impl ConcurrencyGroup {
    /// Concrete key for a run, rendered against its base variables
    pub fn key_for(&self, variables: &HashMap<String, String>) -> String {
        render_template(&self.key, variables)
    }
}

/// Deployment environment attached to a stage
#[derive(Debug, Clone)]
pub struct Environment {
    pub name: String,
    /// URL template, usually `{{ outputs.page_url }}`
    pub url: Option<String>,
}

/// A named phase composed of one or more jobs
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub environment: Option<Environment>,
    pub jobs: Vec<Job>,
}

/// A loaded, validated pipeline; immutable once built
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub name: String,
    pub repository: Repository,
    pub triggers: Triggers,
    pub permissions: BTreeMap<String, PermissionLevel>,
    pub concurrency: Option<ConcurrencyGroup>,
    pub env: BTreeMap<String, String>,
    pub stages: Vec<Stage>,
    pub max_parallel: usize,
    pub default_timeout: Duration,
    pub cancel_grace: Duration,
}

/// Instances of one stage, in FIFO start order
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub name: String,
    pub environment: Option<Environment>,
    pub instances: Vec<JobInstance>,
    /// Concurrency cap for this stage
    pub max_parallel: usize,
    /// `strategy.max_parallel` of jobs that declare one, by job id
    pub job_limits: BTreeMap<String, usize>,
}

impl StagePlan {
    /// How many instances of `job_id` may run at once
    pub fn job_limit(&self, job_id: &str) -> usize {
        self.job_limits
            .get(job_id)
            .copied()
            .unwrap_or(self.max_parallel)
            .min(self.max_parallel)
    }
}

/// Fully expanded run, produced before anything executes
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub stages: Vec<StagePlan>,
}

impl RunPlan {
    pub fn instance_count(&self) -> usize {
        self.stages.iter().map(|s| s.instances.len()).sum()
    }
}

impl PipelineDefinition {
    /// Create a definition from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let repository = Repository::parse(&config.repository)?;

        let push = match &config.triggers.push {
            Some(push) => Some(
                push.branches
                    .iter()
                    .map(|b| {
                        BranchPattern::new(b)
                            .with_context(|| format!("Invalid branch pattern '{}'", b))
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };
        let manual = config.triggers.manual.as_ref().map(|m| m.inputs.clone());

        let stages = config
            .stages
            .iter()
            .map(|stage| Stage {
                name: stage.name.clone(),
                environment: stage.environment.as_ref().map(|e| Environment {
                    name: e.name.clone(),
                    url: e.url.clone(),
                }),
                jobs: stage.jobs.iter().map(Job::from_config).collect(),
            })
            .collect();

        Ok(PipelineDefinition {
            name: config.name.clone(),
            repository,
            triggers: Triggers { push, manual },
            permissions: config.permissions.clone(),
            concurrency: config.concurrency.as_ref().map(|c| ConcurrencyGroup {
                key: c.group.clone(),
                cancel_in_progress: c.cancel_in_progress,
            }),
            env: config.env.clone(),
            stages,
            max_parallel: config.max_parallel.unwrap_or(DEFAULT_MAX_PARALLEL).max(1),
            default_timeout: Duration::from_secs(
                config.default_timeout_secs.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS),
            ),
            cancel_grace: Duration::from_secs(
                config.cancel_grace_secs.unwrap_or(DEFAULT_CANCEL_GRACE_SECS),
            ),
        })
    }

    /// Expand every job of every stage.
    ///
    /// The cap of a stage is `max_parallel` (or `override_cap`). A job's
    /// `strategy.max_parallel` bounds only that job's own instances.
    pub fn plan(&self, override_cap: Option<usize>) -> Result<RunPlan, MatrixError> {
        let cap = override_cap.unwrap_or(self.max_parallel).max(1);
        let mut stages = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let mut instances = Vec::new();
            let mut job_limits = BTreeMap::new();
            for job in &stage.jobs {
                instances.extend(job.instances()?);
                if let Some(limit) = job.strategy.max_parallel {
                    job_limits.insert(job.id.clone(), limit.max(1));
                }
            }
            stages.push(StagePlan {
                name: stage.name.clone(),
                environment: stage.environment.clone(),
                instances,
                max_parallel: cap,
                job_limits,
            });
        }

        Ok(RunPlan { stages })
    }
}
