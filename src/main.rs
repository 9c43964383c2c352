use anyhow::{bail, Context, Result};
use ci_pipeline::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use ci_pipeline::cli::output::*;
use ci_pipeline::cli::{Cli, Command};
use ci_pipeline::core::config::{EngineSettings, PipelineConfig};
use ci_pipeline::core::secret::Secrets;
use ci_pipeline::core::state::RunResult;
use ci_pipeline::core::trigger::{EventKind, TriggerEvent};
use ci_pipeline::execution::{Dispatcher, ExecutionEngine, ExecutionEvent};
use ci_pipeline::persistence::{create_summary, InMemoryPersistence, PersistenceBackend, RunSummary};
use ci_pipeline::runner::LocalRunner;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    let succeeded = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<bool> {
    // Load pipeline config
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    let definition = config.to_definition()?;

    println!("{} Loaded pipeline: {}", INFO, style(&definition.name).bold());

    let mut secrets = Secrets::new();
    for name in &cmd.secret {
        match std::env::var(name) {
            Ok(value) => secrets = secrets.with(name.clone(), value),
            Err(_) => bail!("Secret '{}' is not set in the environment", name),
        }
    }

    let source = match &cmd.source {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    let mut settings = EngineSettings::new()
        .with_source_dir(source)
        .with_secrets(secrets)
        .keep_workspaces(cmd.keep_workspaces);
    if let Some(root) = &cmd.workspace {
        settings = settings.with_workspace_root(root.clone());
    }
    if let Some(dir) = &cmd.publish_dir {
        settings = settings.with_publish_dir(dir.clone());
    }
    if let Some(max) = cmd.max_parallel {
        settings = settings.with_max_parallel(usize::from(max));
    }
    if let Some(secs) = cmd.timeout {
        settings = settings.with_step_timeout(Duration::from_secs(secs));
    }

    // Set up persistence
    let store = open_store(cmd.no_history).await?;

    let actor = cmd
        .actor
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "local".to_string());
    let mut event = match EventKind::from(cmd.event) {
        EventKind::Push => TriggerEvent::push(&cmd.branch, actor),
        EventKind::Manual => TriggerEvent::manual(&cmd.branch, actor),
    };
    for (key, value) in &cmd.input {
        event = event.with_input(key, value);
    }

    let engine = Arc::new(ExecutionEngine::new(LocalRunner::default(), settings));

    let progress = create_progress_bar(0);
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        match event {
            ExecutionEvent::RunStarted { instances, .. } => bar.set_length(*instances as u64),
            ExecutionEvent::InstanceStarted { instance, .. } => bar.set_message(instance.clone()),
            ExecutionEvent::InstanceFinished { .. } => bar.inc(1),
            _ => {}
        }
        bar.println(format_execution_event(event));
    });

    let dispatcher = Dispatcher::new(Arc::clone(&engine), definition);
    let Some(handle) = dispatcher.dispatch(&event) else {
        progress.finish_and_clear();
        println!(
            "{} No trigger of {} matches a {} event on {}",
            WARN,
            style(&dispatcher.definition().name).bold(),
            event.kind,
            style(&event.branch).cyan()
        );
        return Ok(false);
    };

    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            token.cancel();
        }
    });

    let outcome = handle.wait().await;
    progress.finish_and_clear();

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            error!("Run failed to execute: {}", e);
            println!("{} {}", CROSS, style(&e).red());
            return Ok(false);
        }
    };

    println!();
    print!("{}", format_report(&report));
    println!();
    println!(
        "{}Run {} {} in {}",
        if report.result.is_success() { CHECK } else { CROSS },
        style(report.run_id).dim(),
        format_result(report.result),
        format_duration(report.finished_at - report.started_at)
    );
    if let Some(url) = &report.environment_url {
        println!("{} Deployed to {}", ROCKET, style(url).underlined());
    }

    if let Err(e) = store.save_run(&create_summary(&report)).await {
        warn!("Failed to save run history: {}", e);
    } else {
        info!(run_id = %report.run_id, "Run saved to history");
    }

    Ok(report.result == RunResult::Succeeded)
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<bool> {
    let config = match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => config,
        Err(e) => {
            println!("{} {:#}", CROSS, e);
            return Ok(false);
        }
    };
    let definition = config.to_definition()?;
    let plan = match definition.plan(None) {
        Ok(plan) => plan,
        Err(e) => {
            println!("{} {}", CROSS, e);
            return Ok(false);
        }
    };

    if cmd.json {
        let stages: Vec<_> = plan
            .stages
            .iter()
            .map(|stage| {
                serde_json::json!({
                    "name": stage.name,
                    "max_parallel": stage.max_parallel,
                    "environment": stage.environment.as_ref().map(|e| &e.name),
                    "instances": stage
                        .instances
                        .iter()
                        .map(|i| serde_json::json!({
                            "job": i.job_id,
                            "index": i.index,
                            "matrix": i.coordinate.iter().collect::<std::collections::BTreeMap<_, _>>(),
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        let output = serde_json::json!({
            "name": definition.name,
            "repository": definition.repository.to_string(),
            "instances": plan.instance_count(),
            "stages": stages,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{}", format_plan(&definition.name, &plan));
    }

    Ok(true)
}

async fn list_pipelines(cmd: &ListCommand) -> Result<bool> {
    let store = open_store(false).await?;
    let pipelines = store.list_pipelines().await?;

    if cmd.json {
        let mut entries = Vec::with_capacity(pipelines.len());
        for name in &pipelines {
            let runs = store.list_runs(name).await?;
            entries.push(serde_json::json!({
                "name": name,
                "runs": runs.len(),
                "last_result": runs.first().map(|r| r.result),
            }));
        }
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(true);
    }

    if pipelines.is_empty() {
        println!("{} No pipelines in history", INFO);
        return Ok(true);
    }

    for name in &pipelines {
        if cmd.with_counts {
            let runs = store.list_runs(name).await?;
            let last = runs
                .first()
                .map(|r| format_result(r.result))
                .unwrap_or_default();
            println!("  {} ({} runs) {}", style(name).bold(), runs.len(), last);
        } else {
            println!("  {}", style(name).bold());
        }
    }

    Ok(true)
}

async fn show_history(cmd: &HistoryCommand) -> Result<bool> {
    let store = open_store(false).await?;

    if let Some(id) = &cmd.run_id {
        let run_id = Uuid::parse_str(id).context("Invalid run ID")?;
        let Some(summary) = store.load_run(run_id).await? else {
            println!("{} Run {} not found", CROSS, id);
            return Ok(false);
        };
        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_run_details(&summary);
        }
        return Ok(true);
    }

    let pipelines = match &cmd.pipeline {
        Some(name) => vec![name.clone()],
        None => store.list_pipelines().await?,
    };
    let mut runs: Vec<RunSummary> = Vec::new();
    for name in &pipelines {
        runs.extend(store.list_runs(name).await?);
    }
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(cmd.limit);

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
    } else if runs.is_empty() {
        println!("{} No runs in history", INFO);
    } else {
        for run in &runs {
            println!("{}", format_run_summary(run));
        }
    }

    Ok(true)
}

fn print_run_details(summary: &RunSummary) {
    println!("{}", format_run_summary(summary));
    println!("  Run ID:    {}", summary.run_id);
    println!("  Started:   {}", summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!(
        "  Duration:  {}",
        format_duration(summary.finished_at - summary.started_at)
    );
    println!(
        "  Instances: {} planned, {} started, {} failed",
        summary.instances_total, summary.instances_started, summary.instances_failed
    );
    if let Some(url) = &summary.environment_url {
        println!("  URL:       {}", url);
    }
}

#[cfg(feature = "sqlite")]
async fn open_store(ephemeral: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if ephemeral {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }
    let store = ci_pipeline::persistence::SqliteRunStore::with_default_path().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(_ephemeral: bool) -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(InMemoryPersistence::new()))
}
