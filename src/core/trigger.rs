//! Trigger events and their evaluation against a pipeline's triggers

use crate::core::pipeline::PipelineDefinition;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Kind of incoming event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Push,
    Manual,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Push => f.write_str("push"),
            EventKind::Manual => f.write_str("manual"),
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "push" => Ok(EventKind::Push),
            "manual" | "workflow_dispatch" => Ok(EventKind::Manual),
            other => Err(format!("unknown event kind '{}'", other)),
        }
    }
}

/// An event delivered by the boundary layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: EventKind,
    pub branch: String,
    pub actor: String,
    #[serde(default)]
    pub dispatch_inputs: BTreeMap<String, String>,
}

impl TriggerEvent {
    pub fn push(branch: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Push,
            branch: branch.into(),
            actor: actor.into(),
            dispatch_inputs: BTreeMap::new(),
        }
    }

    pub fn manual(branch: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Manual,
            branch: branch.into(),
            actor: actor.into(),
            dispatch_inputs: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dispatch_inputs.insert(key.into(), value.into());
        self
    }
}

/// Compiled branch filter pattern
///
/// `*` matches any run of characters except `/`, `**` matches anything.
#[derive(Debug, Clone)]
pub struct BranchPattern {
    source: String,
    regex: Regex,
}

impl BranchPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let mut expr = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '*' {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    expr.push_str(".*");
                } else {
                    expr.push_str("[^/]*");
                }
            } else {
                expr.push_str(&regex::escape(&c.to_string()));
            }
        }
        expr.push('$');

        Ok(Self {
            source: pattern.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    pub fn matches(&self, branch: &str) -> bool {
        self.regex.is_match(branch)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Configured triggers of a pipeline
#[derive(Debug, Clone, Default)]
pub struct Triggers {
    /// Push trigger; an empty pattern list matches every branch
    pub push: Option<Vec<BranchPattern>>,

    /// Manual dispatch trigger with declared input defaults
    pub manual: Option<BTreeMap<String, String>>,
}

/// Everything needed to start a run
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub run_id: Uuid,
    pub pipeline: String,
    pub event: TriggerEvent,
    /// Declared defaults overlaid with dispatch inputs
    pub inputs: BTreeMap<String, String>,
}

/// Decide whether `event` starts a run of `definition`
pub fn evaluate_trigger(definition: &PipelineDefinition, event: &TriggerEvent) -> Option<RunSpec> {
    let inputs = match event.kind {
        EventKind::Push => {
            let patterns = definition.triggers.push.as_ref()?;
            if !patterns.is_empty() && !patterns.iter().any(|p| p.matches(&event.branch)) {
                return None;
            }
            BTreeMap::new()
        }
        EventKind::Manual => {
            let defaults = definition.triggers.manual.as_ref()?;
            let mut inputs = defaults.clone();
            inputs.extend(event.dispatch_inputs.clone());
            inputs
        }
    };

    Some(RunSpec {
        run_id: Uuid::new_v4(),
        pipeline: definition.name.clone(),
        event: event.clone(),
        inputs,
    })
}
