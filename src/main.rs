use anyhow::{Context, Result};
use backup::{
    EngineSettings, ExecutionOutcome, ExecutionResult, FileTaskRepository, JsonFileRecorder,
    LogConnectivityReporter, Orchestrator, SshConnector, SystemClock, WebhookNotifier,
};
use clap::{Parser, Subcommand};
use common::config::{load_config, load_config_from, EngineConfig};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[clap(name = "outrider", about = "Remote backup execution engine", version)]
struct Cli {
    /// Configuration file to use instead of the standard locations
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one backup task now
    Run {
        /// Task id from the task file
        task_id: String,
    },

    /// Run every configured task concurrently
    RunAll,

    /// Check that a task's server accepts our SSH key
    CheckServer { task_id: String },

    /// Check that a task's destination is reachable
    CheckDestination { task_id: String },

    /// Print the effective configuration
    Config,
}

fn init_logging() -> Result<()> {
    let logger = env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .format_level(true)
        .format_module_path(false)
        .format_indent(Some(4))
        .filter_level(log::LevelFilter::Info)
        .build();
    let max_level = logger.filter();

    if std::env::var_os("SENTRY_DSN").is_some() {
        log::set_boxed_logger(Box::new(sentry_log::SentryLogger::with_dest(logger)))?;
    } else {
        log::set_boxed_logger(Box::new(logger))?;
    }
    log::set_max_level(max_level);
    Ok(())
}

fn build_orchestrator(config: &EngineConfig) -> Result<Orchestrator> {
    let settings = EngineSettings::from_config(config);
    let connector = SshConnector::new(
        settings.private_key.clone(),
        settings.passphrase.clone(),
        settings.connect_timeout,
        config.engine.local_staging_dir.clone(),
    );
    let notifier = WebhookNotifier::new(config.notifications.webhooks.clone(), WEBHOOK_TIMEOUT)?;

    Ok(Orchestrator::new(
        settings,
        Arc::new(FileTaskRepository::new(config.tasks_file())),
        Arc::new(connector),
        Arc::new(LogConnectivityReporter),
        Arc::new(JsonFileRecorder::new(config.logs_directory())),
        Arc::new(notifier),
        Arc::new(SystemClock),
    ))
}

fn report(task_id: &str, result: &ExecutionResult) -> bool {
    println!("{}", result.log_text);
    match result.status {
        ExecutionOutcome::Succeeded => {
            info!(
                "Task {} finished: {}",
                task_id,
                result.artifact_name.as_deref().unwrap_or("-")
            );
            true
        }
        ExecutionOutcome::Failed => {
            error!("Task {} failed (execution {})", task_id, result.execution_id);
            false
        }
    }
}

async fn run_all(orchestrator: Arc<Orchestrator>) -> Result<()> {
    let task_ids = orchestrator.task_ids().await?;
    info!("Running {} tasks", task_ids.len());

    let mut executions = JoinSet::new();
    for task_id in task_ids {
        let orchestrator = orchestrator.clone();
        executions.spawn(async move {
            let result = orchestrator.execute(&task_id).await;
            (task_id, result)
        });
    }

    let mut failed = Vec::new();
    while let Some(joined) = executions.join_next().await {
        let (task_id, result) = joined.context("backup execution panicked")?;
        if !report(&task_id, &result) {
            failed.push(task_id);
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} task(s) failed: {}", failed.len(), failed.join(", "))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let _sentry = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            println!("{}", config.to_redacted_toml()?);
        }
        Commands::Run { task_id } => {
            let orchestrator = build_orchestrator(&config)?;
            let result = orchestrator.execute(&task_id).await;
            if !report(&task_id, &result) {
                anyhow::bail!("Task {task_id} failed");
            }
        }
        Commands::RunAll => {
            run_all(Arc::new(build_orchestrator(&config)?)).await?;
        }
        Commands::CheckServer { task_id } => {
            build_orchestrator(&config)?
                .check_server(&task_id)
                .await
                .with_context(|| format!("Server check for task {task_id} failed"))?;
            println!("Server for task {task_id} is reachable");
        }
        Commands::CheckDestination { task_id } => {
            build_orchestrator(&config)?
                .check_destination(&task_id)
                .await
                .with_context(|| format!("Destination check for task {task_id} failed"))?;
            println!("Destination for task {task_id} is reachable");
        }
    }

    Ok(())
}
