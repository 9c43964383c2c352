//! Test: Concurrency Cap - never more than N instances at once

use crate::helpers::*;
use ci_pipeline::core::state::RunResult;
use ci_pipeline::core::trigger::evaluate_trigger;
use ci_pipeline::execution::{CancellationToken, ExecutionEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn matrix_pipeline(max_parallel: usize) -> String {
    format!(
        r#"
name: "Test: Cap"
repository: acme/widgets
max_parallel: {}
on:
  push: {{}}
stages:
  - name: build
    jobs:
      - id: test
        strategy:
          matrix:
            os: [linux, macos, windows]
            python: ["3.10", "3.11", "3.12"]
        steps:
          - id: pytest
            run: pytest
"#,
        max_parallel
    )
}

#[tokio::test]
async fn test_default_cap_of_two() {
    let yaml = r#"
name: "Test: Default Cap"
repository: acme/widgets
on:
  push: {}
stages:
  - name: build
    jobs:
      - id: test
        strategy:
          matrix:
            version: ["1", "2", "3", "4", "5"]
        steps:
          - id: pytest
            run: pytest
"#;
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().with_default_delay(Duration::from_millis(40));

    let report = run_pipeline_with_mock(yaml, runner.clone(), &sandbox).await.unwrap();

    assert_run_result(&report, RunResult::Succeeded);
    assert_eq!(runner.calls().len(), 5);
    assert_eq!(runner.peak_concurrency(), 2);
}

#[tokio::test]
async fn test_cap_never_exceeded() {
    for cap in [1, 3] {
        let sandbox = Sandbox::new();
        let runner = MockRunner::new().with_default_delay(Duration::from_millis(30));

        let report = run_pipeline_with_mock(&matrix_pipeline(cap), runner.clone(), &sandbox)
            .await
            .unwrap();

        assert_run_result(&report, RunResult::Succeeded);
        assert_eq!(runner.calls().len(), 9);
        assert!(
            runner.peak_concurrency() <= cap,
            "peak {} exceeded cap {}",
            runner.peak_concurrency(),
            cap
        );
        assert_eq!(runner.peak_concurrency(), cap);
    }
}

/// A job's strategy bound limits that job's instances
#[tokio::test]
async fn test_strategy_max_parallel_limits_its_job() {
    let yaml = r#"
name: "Test: Strategy Cap"
repository: acme/widgets
max_parallel: 4
on:
  push: {}
stages:
  - name: build
    jobs:
      - id: test
        strategy:
          max_parallel: 1
          matrix:
            version: ["1", "2", "3"]
        steps:
          - id: pytest
            run: pytest
"#;
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().with_default_delay(Duration::from_millis(20));

    run_pipeline_with_mock(yaml, runner.clone(), &sandbox).await.unwrap();

    assert_eq!(runner.peak_concurrency(), 1);
}

/// Completions start the next pending instance in expansion order
#[tokio::test]
async fn test_instances_start_fifo() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().with_default_delay(Duration::from_millis(10));
    let definition = load(&matrix_pipeline(2));
    let spec = evaluate_trigger(&definition, &push_to_main()).unwrap();

    let engine = engine(runner.clone(), sandbox.settings());
    let started = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&started);
    engine.add_event_handler(move |event| {
        if let ExecutionEvent::InstanceStarted { instance, .. } = event {
            seen.lock().unwrap().push(instance.clone());
        }
    });

    engine
        .execute(&definition, &spec, CancellationToken::new())
        .await
        .unwrap();

    let expected: Vec<String> = definition
        .plan(None)
        .unwrap()
        .stages[0]
        .instances
        .iter()
        .map(|i| i.to_string())
        .collect();
    assert_eq!(*started.lock().unwrap(), expected);
}

/// The operator setting overrides the pipeline's own cap
#[tokio::test]
async fn test_settings_override_cap() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().with_default_delay(Duration::from_millis(20));
    let definition = load(&matrix_pipeline(4));
    let spec = evaluate_trigger(&definition, &push_to_main()).unwrap();

    engine(runner.clone(), sandbox.settings().with_max_parallel(1))
        .execute(&definition, &spec, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(runner.peak_concurrency(), 1);
}

/// A job's strategy bound leaves the rest of the stage at the pipeline cap
#[tokio::test]
async fn test_strategy_max_parallel_does_not_limit_sibling_jobs() {
    let yaml = r#"
name: "Test: Sibling Cap"
repository: acme/widgets
max_parallel: 3
on:
  push: {}
stages:
  - name: build
    jobs:
      - id: test
        strategy:
          max_parallel: 1
          matrix:
            version: ["1", "2"]
        steps:
          - id: pytest
            run: pytest
      - id: lint
        strategy:
          matrix:
            tool: [ruff, mypy]
        steps:
          - id: check
            run: check
"#;
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().with_default_delay(Duration::from_millis(100));

    let report = run_pipeline_with_mock(yaml, runner.clone(), &sandbox).await.unwrap();

    assert_run_result(&report, RunResult::Succeeded);
    assert_eq!(runner.peak_concurrency(), 3);
}
