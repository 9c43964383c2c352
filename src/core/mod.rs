//! Core domain models for pipelines
//!
//! This module defines the fundamental data structures that represent
//! pipelines, stages, jobs, matrices and steps, plus run state and reports.

pub mod config;
pub mod context;
pub mod job;
pub mod matrix;
pub mod pipeline;
pub mod report;
pub mod secret;
pub mod state;
pub mod step;
pub mod trigger;

pub use context::*;
pub use job::*;
pub use matrix::*;
pub use pipeline::*;
pub use report::*;
pub use secret::*;
pub use state::*;
pub use step::*;
pub use trigger::*;
