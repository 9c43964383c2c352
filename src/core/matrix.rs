//! Matrix strategy expansion
//!
//! A job's matrix is a list of named axes, each with an ordered list of
//! values. Expansion yields the full cross product in a deterministic order:
//! lexicographic over axis declaration order, then value order within an axis
//! (the last declared axis varies fastest).

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Matrix configuration errors, detected before any job starts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error("matrix axis '{axis}' of job '{job}' has no values")]
    EmptyAxis { job: String, axis: String },

    #[error("malformed matrix for job '{job}': {reason}")]
    MalformedMatrix { job: String, reason: String },
}

/// A named axis with its ordered values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<String>,
}

impl MatrixAxis {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Matrix plus the optional parallelism bound declared with it
#[derive(Debug, Clone, Default)]
pub struct Strategy {
    /// Raw axes in declaration order, checked at expansion time
    pub matrix: Mapping,

    /// Upper bound on concurrently running instances
    pub max_parallel: Option<usize>,
}

impl Strategy {
    /// Convert the raw matrix into typed axes
    pub fn axes(&self, job: &str) -> Result<Vec<MatrixAxis>, MatrixError> {
        let mut axes = Vec::with_capacity(self.matrix.len());

        for (key, value) in &self.matrix {
            let name = match key {
                Value::String(name) => name.clone(),
                other => {
                    return Err(MatrixError::MalformedMatrix {
                        job: job.to_string(),
                        reason: format!("axis name must be a string, got {}", describe(other)),
                    })
                }
            };

            let values = match value {
                Value::Sequence(items) => items
                    .iter()
                    .map(|item| {
                        scalar_to_string(item).ok_or_else(|| MatrixError::MalformedMatrix {
                            job: job.to_string(),
                            reason: format!(
                                "axis '{}' contains a non-scalar value ({})",
                                name,
                                describe(item)
                            ),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Value::Null => Vec::new(),
                other => {
                    return Err(MatrixError::MalformedMatrix {
                        job: job.to_string(),
                        reason: format!("axis '{}' must be a list, got {}", name, describe(other)),
                    })
                }
            };

            axes.push(MatrixAxis { name, values });
        }

        Ok(axes)
    }

    /// Expand the strategy into coordinates
    pub fn expand(&self, job: &str) -> Result<Vec<Coordinate>, MatrixError> {
        expand(job, &self.axes(job)?)
    }
}

/// One concrete value per axis, in axis declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate(Vec<(String, String)>);

impl Coordinate {
    pub fn new(values: Vec<(String, String)>) -> Self {
        Self(values)
    }

    pub fn get(&self, axis: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<&str> = self.0.iter().map(|(_, v)| v.as_str()).collect();
        write!(f, "{}", values.join(", "))
    }
}

/// Expand axes into their cross product.
///
/// Zero axes produce exactly one empty coordinate.
pub fn expand(job: &str, axes: &[MatrixAxis]) -> Result<Vec<Coordinate>, MatrixError> {
    for axis in axes {
        if axis.values.is_empty() {
            return Err(MatrixError::EmptyAxis {
                job: job.to_string(),
                axis: axis.name.clone(),
            });
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = axis.values.iter().find(|v| !seen.insert(v.as_str())) {
            return Err(MatrixError::MalformedMatrix {
                job: job.to_string(),
                reason: format!("axis '{}' repeats value '{}'", axis.name, duplicate),
            });
        }
    }

    let mut coordinates: Vec<Vec<(String, String)>> = vec![Vec::new()];
    for axis in axes {
        coordinates = coordinates
            .into_iter()
            .flat_map(|prefix| {
                axis.values.iter().map(move |value| {
                    let mut next = prefix.clone();
                    next.push((axis.name.clone(), value.clone()));
                    next
                })
            })
            .collect();
    }

    Ok(coordinates.into_iter().map(Coordinate).collect())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
