//! Scenario-based tests for ci-pipeline

mod concurrency_cap;
mod end_to_end;
mod fail_fast;
mod gate;
mod matrix_expansion;
