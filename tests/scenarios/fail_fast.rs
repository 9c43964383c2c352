//! Test: Fail Fast - an instance stops at its first failing step

use crate::helpers::*;
use ci_pipeline::core::state::{RunResult, StepFailure};
use std::time::Duration;

const STEPS: &str = r#"
name: "Test: Fail Fast"
repository: acme/widgets
on:
  push:
    branches: [main]
stages:
  - name: build
    jobs:
      - id: test
        strategy:
          matrix:
            python: ["3.10", "3.11"]
        steps:
          - id: install
            run: pip install -r requirements.txt
          - id: pytest
            run: pytest
          - id: coverage
            run: coverage report
"#;

/// Steps after a failing step never run
#[tokio::test]
async fn test_steps_after_failure_never_run() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().fail_step_where("pytest", "3.10", 2);

    let report = run_pipeline_with_mock(STEPS, runner.clone(), &sandbox).await.unwrap();
    assert_run_result(&report, RunResult::Failed);

    let failed = instance(&report, "test", Some("3.10"));
    assert_eq!(failed.result, RunResult::Failed);
    assert_step_ids(failed, &["install", "pytest"]);
    let failed_step = failed.failed_step.as_ref().unwrap();
    assert_eq!(failed_step.index, 1);
    assert_eq!(failed_step.step_id, "pytest");
    assert_eq!(failed_step.failure, StepFailure::ExitStatus { code: Some(2) });

    // The sibling is not cut short
    let sibling = instance(&report, "test", Some("3.11"));
    assert_eq!(sibling.result, RunResult::Succeeded);
    assert_step_ids(sibling, &["install", "pytest", "coverage"]);

    let coverage = runner.calls_for("coverage");
    assert_eq!(coverage.len(), 1);
    assert_eq!(coverage[0].matrix["python"], "3.11");
}

/// A tool that cannot be invoked fails the step as an infrastructure error
#[tokio::test]
async fn test_missing_tool_is_infrastructure_failure() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().unavailable("install");

    let report = run_pipeline_with_mock(STEPS, runner.clone(), &sandbox).await.unwrap();
    assert_run_result(&report, RunResult::Failed);

    for inst in report.instances() {
        let failed_step = inst.failed_step.as_ref().unwrap();
        assert_eq!(failed_step.step_id, "install");
        assert!(failed_step.failure.is_infrastructure());
        assert_step_ids(inst, &["install"]);
    }
    assert!(runner.calls_for("pytest").is_empty());
}

/// A step exceeding its timeout is terminated and counted as failed
#[tokio::test]
async fn test_timed_out_step_fails_instance() {
    let yaml = r#"
name: "Test: Timeout"
repository: acme/widgets
on:
  push: {}
stages:
  - name: build
    jobs:
      - id: docs
        steps:
          - id: sphinx
            run: make html
            timeout_secs: 1
          - id: upload
            run: "true"
"#;
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().with_delay("sphinx", Duration::from_secs(30));

    let report = run_pipeline_with_mock(yaml, runner.clone(), &sandbox).await.unwrap();
    assert_run_result(&report, RunResult::Failed);

    let docs = instance(&report, "docs", None);
    assert_eq!(
        docs.failed_step.as_ref().map(|f| f.failure.clone()),
        Some(StepFailure::TimedOut { secs: 1 })
    );
    assert!(runner.calls_for("upload").is_empty());
    assert_eq!(runner.running(), 0, "the timed-out step was dropped");
}

/// A `run:` step naming a command the host lacks is an infrastructure failure
#[cfg(unix)]
#[tokio::test]
async fn test_missing_command_on_host_is_infrastructure_failure() {
    use ci_pipeline::core::trigger::evaluate_trigger;
    use ci_pipeline::execution::{CancellationToken, ExecutionEngine};
    use ci_pipeline::runner::LocalRunner;

    let yaml = r#"
name: "Test: Missing Command"
repository: acme/widgets
on:
  push: {}
stages:
  - name: build
    jobs:
      - id: docs
        steps:
          - id: sphinx
            run: definitely-missing-tool-4711 -b html docs site
          - id: after
            run: touch after.txt
"#;
    let sandbox = Sandbox::new();
    let definition = load(yaml);
    let spec = evaluate_trigger(&definition, &push_to_main()).unwrap();
    let engine = ExecutionEngine::new(LocalRunner::default(), sandbox.settings());

    let report = engine
        .execute(&definition, &spec, CancellationToken::new())
        .await
        .unwrap();

    assert_run_result(&report, RunResult::Failed);
    let docs = instance(&report, "docs", None);
    assert_step_ids(docs, &["sphinx"]);
    let failed_step = docs.failed_step.as_ref().unwrap();
    assert_eq!(failed_step.step_id, "sphinx");
    assert!(
        failed_step.failure.is_infrastructure(),
        "expected an infrastructure failure, got {:?}",
        failed_step.failure
    );
}
