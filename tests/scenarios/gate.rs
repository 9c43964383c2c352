//! Test: Pipeline Gate - deploy only after a successful build

use crate::helpers::*;
use ci_pipeline::core::state::RunResult;

const DOCS: &str = r#"
name: "Test: Gate"
repository: acme/widgets
permissions:
  pages: write
on:
  push: {}
stages:
  - name: build
    jobs:
      - id: build
        outputs:
          page_url: "{{ steps.pages.base_url }}"
        steps:
          - id: sphinx
            run: make html
          - id: pages
            uses: configure-pages
  - name: deploy
    environment:
      name: github-pages
      url: "{{ outputs.page_url }}"
    jobs:
      - id: deploy
        steps:
          - id: announce
            run: echo "deploying to {{ outputs.page_url }}"
"#;

/// Deploy never starts when the build failed
#[tokio::test]
async fn test_deploy_skipped_after_failed_build() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().fail_step("sphinx", 1);

    let report = run_pipeline_with_mock(DOCS, runner.clone(), &sandbox).await.unwrap();

    assert_run_result(&report, RunResult::Failed);
    assert_eq!(report.stage("build").unwrap().result, Some(RunResult::Failed));
    assert_stage_not_run(&report, "deploy");
    assert!(runner.calls().iter().all(|c| c.job != "deploy"));
    assert!(report.outputs.is_empty());
    assert!(report.environment_url.is_none());
}

/// Build outputs are published once and reach the deploy stage
#[tokio::test]
async fn test_outputs_flow_to_deploy_stage() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new();

    let report = run_pipeline_with_mock(DOCS, runner.clone(), &sandbox).await.unwrap();

    assert_run_result(&report, RunResult::Succeeded);
    assert_eq!(
        report.outputs.get("page_url").map(String::as_str),
        Some("https://acme.github.io/widgets")
    );
    assert_eq!(
        report.environment_url.as_deref(),
        Some("https://acme.github.io/widgets")
    );

    let deploy = report.stage("deploy").unwrap();
    let environment = deploy.environment.as_ref().unwrap();
    assert_eq!(environment.name, "github-pages");

    // Every deploy call happened after every build call
    let calls = runner.calls();
    let last_build = calls.iter().rposition(|c| c.job == "build").unwrap();
    let first_deploy = calls.iter().position(|c| c.job == "deploy").unwrap();
    assert!(last_build < first_deploy);
}

/// Two instances publishing different values for one key fail the build
#[tokio::test]
async fn test_conflicting_outputs_fail_build() {
    let yaml = r#"
name: "Test: Output Conflict"
repository: acme/widgets
on:
  push: {}
stages:
  - name: build
    jobs:
      - id: build
        strategy:
          matrix:
            flavour: [html, pdf]
        outputs:
          artifact: "docs-{{ matrix.flavour }}"
        steps:
          - run: make
  - name: deploy
    jobs:
      - id: deploy
        steps:
          - run: "true"
"#;
    let sandbox = Sandbox::new();
    let runner = MockRunner::new();

    let report = run_pipeline_with_mock(yaml, runner.clone(), &sandbox).await.unwrap();

    assert_run_result(&report, RunResult::Failed);
    assert_eq!(report.stage("build").unwrap().result, Some(RunResult::Failed));
    assert_stage_not_run(&report, "deploy");
}
