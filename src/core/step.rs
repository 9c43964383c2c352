//! Step domain model

use crate::core::config::StepConfig;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// What a step does when it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Shell command body (`run:`)
    Command(String),
    /// Built-in action identifier (`uses:`)
    Action(String),
}

/// A single step of a job
#[derive(Debug, Clone)]
pub struct Step {
    /// Step identifier, unique within its job
    pub id: String,

    /// Human-readable name
    pub name: String,

    pub action: StepAction,

    /// Named inputs (`with:`), rendered before invocation
    pub inputs: BTreeMap<String, String>,

    /// Environment bindings, rendered before invocation
    pub env: BTreeMap<String, String>,

    /// Per-step timeout override in seconds
    pub timeout_secs: Option<u64>,
}

impl Step {
    /// Create a step from its configuration; `index` is the position in the job
    pub fn from_config(config: &StepConfig, index: usize) -> Self {
        let action = match (&config.uses, &config.run) {
            (Some(uses), _) => StepAction::Action(uses.clone()),
            (None, Some(run)) => StepAction::Command(run.clone()),
            // Rejected by validation; kept total for hand-built configs
            (None, None) => StepAction::Command(String::new()),
        };

        let id = config
            .id
            .clone()
            .unwrap_or_else(|| format!("step-{}", index + 1));

        let name = config.name.clone().unwrap_or_else(|| match &action {
            StepAction::Action(uses) => uses.clone(),
            StepAction::Command(run) => run.lines().next().unwrap_or_default().trim().to_string(),
        });

        Step {
            id,
            name,
            action,
            inputs: config.with.clone(),
            env: config.env.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    /// Shorthand for a shell step
    pub fn command(id: impl Into<String>, run: impl Into<String>) -> Self {
        let id = id.into();
        Step {
            name: id.clone(),
            id,
            action: StepAction::Command(run.into()),
            inputs: BTreeMap::new(),
            env: BTreeMap::new(),
            timeout_secs: None,
        }
    }

    /// Shorthand for a built-in action step
    pub fn action(id: impl Into<String>, uses: impl Into<String>) -> Self {
        let id = id.into();
        Step {
            name: id.clone(),
            id,
            action: StepAction::Action(uses.into()),
            inputs: BTreeMap::new(),
            env: BTreeMap::new(),
            timeout_secs: None,
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Render the action with variable substitution
    pub fn render_action(&self, variables: &HashMap<String, String>) -> StepAction {
        match &self.action {
            StepAction::Command(run) => StepAction::Command(render_template(run, variables)),
            StepAction::Action(uses) => StepAction::Action(uses.clone()),
        }
    }

    pub fn render_inputs(&self, variables: &HashMap<String, String>) -> BTreeMap<String, String> {
        render_map(&self.inputs, variables)
    }

    pub fn render_env(&self, variables: &HashMap<String, String>) -> BTreeMap<String, String> {
        render_map(&self.env, variables)
    }
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Replace `{{ name }}` placeholders; unknown names are left untouched
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub fn render_map(
    map: &BTreeMap<String, String>,
    variables: &HashMap<String, String>,
) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), render_template(v, variables)))
        .collect()
}
