//! Test: End to End - matrix build, artifact handoff and pages deployment

use crate::helpers::*;
use ci_pipeline::core::state::{RunResult, RunStatus};
use ci_pipeline::core::trigger::TriggerEvent;
use ci_pipeline::execution::{Dispatcher, ExecutionEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DOCS: &str = r#"
name: "Docs"
repository: owner/repo
max_parallel: 2
permissions:
  contents: read
  pages: write
  id-token: write
concurrency:
  group: pages
  cancel_in_progress: false
on:
  push:
    branches: [main]
  manual: {}
stages:
  - name: build
    jobs:
      - id: test
        strategy:
          matrix:
            platform: [A, B]
            version: ["1", "2"]
        steps:
          - uses: checkout
          - id: pytest
            run: pytest
      - id: docs
        outputs:
          page_url: "{{ steps.pages.base_url }}"
        steps:
          - uses: checkout
          - id: sphinx
            run: sphinx-build docs _build/html
          - id: pages
            uses: configure-pages
          - id: upload
            uses: upload-artifact
            with:
              path: _build/html
  - name: deploy
    environment:
      name: github-pages
      url: "{{ outputs.page_url }}"
    jobs:
      - id: deploy
        steps:
          - id: publish
            uses: deploy-pages
"#;

#[tokio::test]
async fn test_matrix_build_then_deploy() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new()
        .with_delay("pytest", Duration::from_millis(30))
        .writes("sphinx", "_build/html/index.html", "<h1>repo</h1>");

    let engine = engine(runner.clone(), sandbox.settings());
    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    engine.add_event_handler(move |event| seen.lock().unwrap().push(event.clone()));

    let dispatcher = Dispatcher::new(engine, load(DOCS));
    let mut handle = dispatcher.dispatch(&push_to_main()).expect("push to main triggers");
    assert!(handle.wait_for_status(RunStatus::Succeeded).await);
    let report = handle.wait().await.unwrap();
    assert_run_result(&report, RunResult::Succeeded);

    let tests: Vec<_> = report.instances().filter(|i| i.job_id == "test").collect();
    assert_eq!(tests.len(), 4);
    assert!(tests.iter().all(|i| i.result == RunResult::Succeeded));
    assert!(runner.peak_concurrency() <= 2);

    // Deployed exactly once, from this run's artifact
    assert_eq!(runner.calls_for("publish").len(), 1);
    assert_eq!(
        std::fs::read_to_string(sandbox.publish_dir().join("index.html")).unwrap(),
        "<h1>repo</h1>"
    );

    assert_eq!(
        report.environment_url.as_deref(),
        Some("https://owner.github.io/repo")
    );
    let deploy = report.stage("deploy").unwrap();
    assert_eq!(deploy.result, Some(RunResult::Succeeded));
    assert_eq!(
        deploy.environment.as_ref().and_then(|e| e.url.as_deref()),
        Some("https://owner.github.io/repo")
    );

    let events = events.lock().unwrap();
    let published = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::OutputsPublished { .. }))
        .count();
    assert_eq!(published, 1);
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunFinished {
            result: RunResult::Succeeded,
            ..
        })
    ));

    // Workspaces are removed once the run is over
    assert!(!sandbox.workspace_root().join(report.run_id.to_string()).exists());
}

#[tokio::test]
async fn test_trigger_filters() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().writes("sphinx", "_build/html/index.html", "<h1>repo</h1>");
    let dispatcher = Dispatcher::new(engine(runner.clone(), sandbox.settings()), load(DOCS));

    assert!(dispatcher
        .dispatch(&TriggerEvent::push("feature/x", "octocat"))
        .is_none());

    let manual = dispatcher
        .dispatch(&TriggerEvent::manual("feature/x", "octocat"))
        .expect("manual dispatch runs on any branch");
    let report = manual.wait().await.unwrap();
    assert_run_result(&report, RunResult::Succeeded);
    assert_eq!(report.branch, "feature/x");
}

/// A docs build that produces no site fails at the upload
#[tokio::test]
async fn test_missing_site_fails_upload() {
    let sandbox = Sandbox::new();
    // The docs build writes nothing, so the upload has no path to copy
    let runner = MockRunner::new();

    let report = run_pipeline_with_mock(DOCS, runner.clone(), &sandbox).await.unwrap();

    assert_run_result(&report, RunResult::Failed);
    let docs = instance(&report, "docs", None);
    assert_eq!(docs.failed_step.as_ref().unwrap().step_id, "upload");
    assert_stage_not_run(&report, "deploy");
    assert!(!sandbox.publish_dir().exists());
}

#[cfg(unix)]
mod shell {
    use super::*;
    use ci_pipeline::core::config::PipelineConfig;
    use ci_pipeline::core::secret::Secrets;
    use ci_pipeline::execution::ExecutionEngine;
    use ci_pipeline::runner::LocalRunner;

    const SHELL_DOCS: &str = r#"
name: "Shell Docs"
repository: owner/repo
permissions:
  pages: write
on:
  push: {}
stages:
  - name: build
    jobs:
      - id: docs
        strategy:
          matrix:
            theme: [light]
        outputs:
          page_url: "{{ steps.pages.base_url }}"
          built_by: "{{ steps.sphinx.builder }}"
        steps:
          - id: sphinx
            run: |
              mkdir -p site
              echo "<h1>$CI_MATRIX_THEME</h1>" > site/index.html
              echo "token is $PAGES_TOKEN"
              echo "builder=sh" >> "$CI_OUTPUT"
          - id: pages
            uses: configure-pages
          - id: upload
            uses: upload-artifact
            with:
              path: site
  - name: deploy
    environment:
      name: github-pages
      url: "{{ outputs.page_url }}"
    jobs:
      - id: deploy
        steps:
          - id: publish
            uses: deploy-pages
"#;

    /// Real shell steps, real artifacts, secrets masked in logs
    #[tokio::test]
    async fn test_shell_pipeline_publishes_site() {
        let sandbox = Sandbox::new();
        let settings = sandbox
            .settings()
            .with_secrets(Secrets::new().with("PAGES_TOKEN", "s3cr3t-value"));
        let engine = Arc::new(ExecutionEngine::new(LocalRunner::default(), settings));
        let definition = PipelineConfig::from_yaml(SHELL_DOCS)
            .unwrap()
            .to_definition()
            .unwrap();

        let dispatcher = Dispatcher::new(engine, definition);
        let report = dispatcher
            .dispatch(&push_to_main())
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_run_result(&report, RunResult::Succeeded);
        assert_eq!(report.outputs.get("built_by").map(String::as_str), Some("sh"));
        assert_eq!(
            report.environment_url.as_deref(),
            Some("https://owner.github.io/repo")
        );
        assert_eq!(
            std::fs::read_to_string(sandbox.publish_dir().join("index.html"))
                .unwrap()
                .trim(),
            "<h1>light</h1>"
        );

        let sphinx = &instance(&report, "docs", Some("light")).steps[0];
        let log = sphinx.log_tail.join("\n");
        assert!(log.contains("token is"));
        assert!(!log.contains("s3cr3t-value"), "secret leaked: {}", log);
    }
}
