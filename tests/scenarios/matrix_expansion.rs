//! Test: Matrix Expansion - cross product order and configuration errors

use crate::helpers::*;
use ci_pipeline::core::matrix::MatrixError;
use ci_pipeline::core::state::RunResult;
use ci_pipeline::execution::RunError;

const MATRIX: &str = r#"
name: "Test: Matrix"
repository: acme/widgets
max_parallel: 1
on:
  push: {}
stages:
  - name: build
    jobs:
      - id: test
        strategy:
          matrix:
            platform: [A, B]
            version: ["1", "2"]
        steps:
          - id: pytest
            run: pytest
"#;

/// Every combination runs exactly once, last axis varying fastest
#[tokio::test]
async fn test_cross_product_in_lexicographic_order() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new();

    let report = run_pipeline_with_mock(MATRIX, runner.clone(), &sandbox).await.unwrap();
    assert_run_result(&report, RunResult::Succeeded);

    let reported: Vec<String> = report.instances().map(|i| i.coordinate.to_string()).collect();
    assert_eq!(reported.len(), 4);

    // Cap 1 makes start order observable
    let started: Vec<(String, String)> = runner
        .calls()
        .iter()
        .map(|c| (c.matrix["platform"].clone(), c.matrix["version"].clone()))
        .collect();
    assert_eq!(
        started,
        vec![
            ("A".to_string(), "1".to_string()),
            ("A".to_string(), "2".to_string()),
            ("B".to_string(), "1".to_string()),
            ("B".to_string(), "2".to_string()),
        ]
    );

    let sandboxes: std::collections::HashSet<_> =
        runner.calls().into_iter().map(|c| c.working_dir).collect();
    assert_eq!(sandboxes.len(), 4, "each instance gets its own workspace");
}

/// An empty axis fails the whole run before any instance starts
#[tokio::test]
async fn test_empty_axis_creates_no_instances() {
    let yaml = r#"
name: "Test: Empty Axis"
repository: acme/widgets
on:
  push: {}
stages:
  - name: build
    jobs:
      - id: lint
        steps:
          - run: ruff check
      - id: test
        strategy:
          matrix:
            platform: [A, B]
            version: []
        steps:
          - run: pytest
  - name: deploy
    jobs:
      - id: deploy
        steps:
          - run: "true"
"#;
    let sandbox = Sandbox::new();
    let runner = MockRunner::new();

    let error = run_pipeline_with_mock(yaml, runner.clone(), &sandbox)
        .await
        .unwrap_err();

    assert!(
        matches!(
            &error,
            RunError::Matrix(MatrixError::EmptyAxis { job, axis }) if job == "test" && axis == "version"
        ),
        "unexpected error: {}",
        error
    );
    assert!(runner.calls().is_empty(), "no job may run, not even 'lint'");
    assert!(!sandbox.workspace_root().exists());
}

/// Nested values are rejected the same way
#[tokio::test]
async fn test_malformed_axis_fails_run() {
    let yaml = r#"
name: "Test: Malformed"
repository: acme/widgets
on:
  push: {}
stages:
  - name: build
    jobs:
      - id: test
        strategy:
          matrix:
            platform:
              - { os: linux }
        steps:
          - run: pytest
"#;
    let sandbox = Sandbox::new();
    let runner = MockRunner::new();

    let error = run_pipeline_with_mock(yaml, runner.clone(), &sandbox)
        .await
        .unwrap_err();

    assert!(matches!(error, RunError::Matrix(MatrixError::MalformedMatrix { .. })));
    assert!(runner.calls().is_empty());
}
