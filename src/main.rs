use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use forgeci_container::DockerCliRuntime;
use forgeci_engine::{Materializer, Scheduler, SchedulerConfig, SchedulerExit, TriggerContext};
use forgeci_executor::ExecutorConfig;
use forgeci_source::GitSourceProvider;
use forgeci_store::{SqliteStore, Store};

/// forgeci - a CI workflow engine running jobs in containers
#[derive(Parser)]
#[command(name = "forgeci")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.forgeci)
  #[arg(long, global = true, env = "FORGECI_DATA_DIR")]
  data_dir: Option<PathBuf>,

  /// Directory holding the hosted repositories (default: <data-dir>/repos)
  #[arg(long, global = true, env = "FORGECI_REPOS_ROOT")]
  repos_root: Option<PathBuf>,

  /// Database URL (default: sqlite://<data-dir>/forgeci.db)
  #[arg(long, global = true, env = "FORGECI_DATABASE_URL")]
  database_url: Option<String>,

  /// Log filter, e.g. `info` or `forgeci_executor=debug`
  #[arg(long, global = true, default_value = "info")]
  log_level: String,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the scheduler until interrupted
  Serve {
    /// Seconds between polls for queued runs
    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,

    /// Maximum seconds a single step may run (0 for no limit)
    #[arg(long, default_value_t = 3600)]
    step_timeout_secs: u64,

    /// Container runtime binary
    #[arg(long, default_value = "docker")]
    docker: PathBuf,
  },

  /// Queue runs for every workflow of a repository at a reference
  Trigger {
    /// Repository name, relative to the repositories root
    repo: String,

    /// Branch or other reference to read workflows from
    #[arg(long = "ref", default_value = "main")]
    reference: String,

    /// User recorded as having triggered the runs
    #[arg(long, env = "USER", default_value = "forgeci")]
    user: String,
  },

  /// Inspect recorded runs
  Runs {
    #[command(subcommand)]
    action: RunsAction,
  },
}

#[derive(Subcommand)]
enum RunsAction {
  /// List runs of a repository, newest first
  List { repo: String },

  /// Show a run with its jobs and steps
  Show { run_id: String },

  /// Delete a run and everything it owns
  Delete { run_id: String },
}

struct Paths {
  repos_root: PathBuf,
  database_url: String,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_new(&cli.log_level).context("invalid log filter")?)
    .with_writer(std::io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".forgeci"),
  };
  let paths = Paths {
    repos_root: cli.repos_root.unwrap_or_else(|| data_dir.join("repos")),
    database_url: cli
      .database_url
      .unwrap_or_else(|| format!("sqlite://{}", data_dir.join("forgeci.db").display())),
  };

  let Some(command) = cli.command else {
    println!("forgeci - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    tokio::fs::create_dir_all(&data_dir)
      .await
      .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    match command {
      Commands::Serve {
        poll_interval_secs,
        step_timeout_secs,
        docker,
      } => serve(&paths, poll_interval_secs, step_timeout_secs, docker).await,
      Commands::Trigger {
        repo,
        reference,
        user,
      } => trigger(&paths, &repo, &reference, user).await,
      Commands::Runs { action } => runs(&paths, action).await,
    }
  })
}

async fn open_store(paths: &Paths) -> Result<Arc<SqliteStore>> {
  let store = SqliteStore::connect(&paths.database_url)
    .await
    .with_context(|| format!("failed to open database: {}", paths.database_url))?;
  Ok(Arc::new(store))
}

async fn serve(
  paths: &Paths,
  poll_interval_secs: u64,
  step_timeout_secs: u64,
  docker: PathBuf,
) -> Result<()> {
  let store = open_store(paths).await?;
  let source = Arc::new(GitSourceProvider::new(&paths.repos_root));
  let runtime = Arc::new(DockerCliRuntime::new(docker));

  let executor_config = ExecutorConfig {
    step_timeout: (step_timeout_secs > 0).then(|| Duration::from_secs(step_timeout_secs)),
    ..ExecutorConfig::default()
  };
  let scheduler = Scheduler::new(
    store,
    runtime,
    source,
    executor_config,
    SchedulerConfig {
      poll_interval: Duration::from_secs(poll_interval_secs),
    },
  );

  let cancel = CancellationToken::new();
  let scheduler_cancel = cancel.clone();
  let handle = tokio::spawn(async move { scheduler.run(scheduler_cancel).await });

  eprintln!(
    "Serving repositories from {} (Ctrl-C to stop)",
    paths.repos_root.display()
  );
  tokio::signal::ctrl_c()
    .await
    .context("failed to listen for shutdown signal")?;
  eprintln!("Shutting down, waiting for the current step to finish");
  cancel.cancel();

  match handle.await.context("scheduler task panicked")? {
    SchedulerExit::Cancelled => eprintln!("Scheduler stopped"),
    SchedulerExit::Disabled => eprintln!("Scheduler was disabled: container runtime unreachable"),
  }
  Ok(())
}

async fn trigger(paths: &Paths, repo: &str, reference: &str, user: String) -> Result<()> {
  let store = open_store(paths).await?;
  let source = Arc::new(GitSourceProvider::new(&paths.repos_root));

  let commit_sha = source
    .resolve_commit(repo, reference)
    .await
    .with_context(|| format!("failed to resolve {repo}@{reference}"))?;
  let commit_message = source
    .commit_message(repo, reference)
    .await
    .with_context(|| format!("failed to read commit message of {commit_sha}"))?;

  let context = TriggerContext {
    branch: reference.to_string(),
    commit_sha,
    commit_message,
    triggered_by: user,
  };

  let materializer = Materializer::new(store, source);
  let runs = materializer
    .trigger(repo, reference, &context)
    .await
    .context("failed to queue runs")?;

  eprintln!("Queued {} run(s) for {repo}@{reference}", runs.len());
  for run in &runs {
    println!("{}\t{}", run.id, run.workflow_name);
  }
  Ok(())
}

async fn runs(paths: &Paths, action: RunsAction) -> Result<()> {
  let store = open_store(paths).await?;

  match action {
    RunsAction::List { repo } => {
      let runs = store.list_runs(&repo).await.context("failed to list runs")?;
      for run in &runs {
        println!(
          "{}\t{}\t{}\t{}\t{}",
          run.id, run.status, run.workflow_name, run.branch, run.created_at
        );
      }
    }
    RunsAction::Show { run_id } => {
      let run = store
        .get_run(&run_id)
        .await
        .with_context(|| format!("failed to load run {run_id}"))?;
      println!("{}", serde_json::to_string_pretty(&run)?);
    }
    RunsAction::Delete { run_id } => {
      store
        .delete_run(&run_id)
        .await
        .with_context(|| format!("failed to delete run {run_id}"))?;
      eprintln!("Deleted run {run_id}");
    }
  }
  Ok(())
}
