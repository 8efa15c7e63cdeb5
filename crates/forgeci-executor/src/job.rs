//! Execution of a single job inside its own container.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use forgeci_container::{ContainerError, ContainerRuntime, ContainerSpec, ExecOutput, Mount};
use forgeci_source::SourceProvider;
use forgeci_store::{Job, Run, Status, Step, Store};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{BOOTSTRAP_COMMAND, ExecutorConfig, FALLBACK_COMMAND};
use crate::error::ExecutorError;
use crate::image::resolve_image;
use crate::propagate::failure_output;

/// Outcome of one step: its status and the output to record.
struct StepOutcome {
  status: Status,
  output: String,
}

impl StepOutcome {
  fn new(status: Status, output: impl Into<String>) -> Self {
    Self {
      status,
      output: output.into(),
    }
  }
}

/// Executes one job: provisions a container, bootstraps the workspace, runs
/// the steps in order and always tears the container down.
pub struct JobExecutor {
  store: Arc<dyn Store>,
  runtime: Arc<dyn ContainerRuntime>,
  source: Arc<dyn SourceProvider>,
  config: ExecutorConfig,
}

impl JobExecutor {
  pub fn new(
    store: Arc<dyn Store>,
    runtime: Arc<dyn ContainerRuntime>,
    source: Arc<dyn SourceProvider>,
    config: ExecutorConfig,
  ) -> Self {
    Self {
      store,
      runtime,
      source,
      config,
    }
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  /// Execute a queued job of `run` and return the status it finished with.
  ///
  /// Provisioning and exec failures end the job as `Failure`. Only store
  /// errors are returned, since the outcome could not be recorded.
  #[instrument(
    name = "job_execute",
    skip(self, run, job, cancel),
    fields(run_id = %run.id, job_id = %job.id, job = %job.name)
  )]
  pub async fn execute(
    &self,
    run: &Run,
    job: &Job,
    cancel: &CancellationToken,
  ) -> Result<Status, ExecutorError> {
    self.store.start_job(&job.id, Utc::now()).await?;
    let image = resolve_image(&job.runs_on);
    info!(job_id = %job.id, runs_on = %job.runs_on, image = %image, "job_started");

    let mut container_id = None;
    let result = self
      .provision_and_run(run, job, image, &mut container_id, cancel)
      .await;

    if let Some(id) = container_id {
      self.teardown(&id).await;
    }

    let status = match result {
      Ok(status) => status,
      Err(ExecutorError::Container(e)) => {
        warn!(job_id = %job.id, error = %e, "job provisioning failed");
        self.store.cancel_remaining_steps(&job.id, Utc::now()).await?;
        Status::Failure
      }
      Err(e) => return Err(e),
    };

    self.store.finish_job(&job.id, status, Utc::now()).await?;
    info!(job_id = %job.id, status = %status, "job_completed");
    Ok(status)
  }

  async fn provision_and_run(
    &self,
    run: &Run,
    job: &Job,
    image: &str,
    container_id: &mut Option<String>,
    cancel: &CancellationToken,
  ) -> Result<Status, ExecutorError> {
    if let Err(e) = self.runtime.pull_image(image).await {
      warn!(image = %image, error = %e, "image pull failed, trying local image");
    }

    let repo_path = self.locate_repository(&run.repo).await;
    let spec = self.container_spec(image, repo_path.as_ref());
    let id = self.runtime.create_container(&spec).await?;
    *container_id = Some(id.clone());
    self.runtime.start_container(&id).await?;
    debug!(container_id = %id, "container started");

    if repo_path.is_some() {
      self.bootstrap(&id).await;
    }

    self.run_steps(&id, job, cancel).await
  }

  /// Local path of the repository, trying `name` then `name.git`.
  async fn locate_repository(&self, name: &str) -> Option<PathBuf> {
    for candidate in [name.to_string(), format!("{name}.git")] {
      match self.source.repository_path(&candidate).await {
        Ok(Some(path)) => return Some(path),
        Ok(None) => {}
        Err(e) => warn!(repo = %candidate, error = %e, "repository lookup failed"),
      }
    }
    debug!(repo = %name, "no repository to mount");
    None
  }

  fn container_spec(&self, image: &str, repo_path: Option<&PathBuf>) -> ContainerSpec {
    ContainerSpec {
      image: image.to_string(),
      memory_bytes: self.config.memory_bytes,
      nano_cpus: self.config.nano_cpus,
      mounts: repo_path
        .map(|path| Mount {
          source: path.clone(),
          target: self.config.repo_mount.clone(),
          read_only: true,
        })
        .into_iter()
        .collect(),
      working_dir: self.config.working_dir.clone(),
    }
  }

  async fn bootstrap(&self, container_id: &str) {
    match self.exec_shell(container_id, BOOTSTRAP_COMMAND).await {
      Ok(Ok(output)) if output.success() => debug!("workspace bootstrapped"),
      Ok(Ok(output)) => warn!(exit_code = output.exit_code, "workspace bootstrap failed"),
      Ok(Err(e)) => warn!(error = %e, "workspace bootstrap failed"),
      Err(timeout) => warn!(timeout = ?timeout, "workspace bootstrap timed out"),
    }
  }

  async fn run_steps(
    &self,
    container_id: &str,
    job: &Job,
    cancel: &CancellationToken,
  ) -> Result<Status, ExecutorError> {
    for step in &job.steps {
      if cancel.is_cancelled() {
        let cancelled = self.store.cancel_remaining_steps(&job.id, Utc::now()).await?;
        warn!(job_id = %job.id, cancelled, "job cancelled by shutdown");
        return Ok(Status::Cancelled);
      }

      self.store.start_step(&step.id, Utc::now()).await?;
      info!(step_id = %step.id, step = %step.name, "step_started");

      let outcome = self.run_step(container_id, step).await;
      self
        .store
        .record_step_result(&step.id, outcome.status, &outcome.output, Utc::now())
        .await?;
      info!(step_id = %step.id, status = %outcome.status, "step_completed");

      if outcome.status == Status::Failure {
        let cancelled = self.store.cancel_remaining_steps(&job.id, Utc::now()).await?;
        debug!(job_id = %job.id, cancelled, "remaining steps cancelled");
        return Ok(Status::Failure);
      }
    }
    Ok(Status::Success)
  }

  async fn run_step(&self, container_id: &str, step: &Step) -> StepOutcome {
    let command = match (&step.command, &step.uses) {
      (Some(command), _) => command.as_str(),
      (None, Some(reference)) => {
        return StepOutcome::new(
          Status::Success,
          format!("Skipped action '{reference}': reusable actions are not executed"),
        );
      }
      (None, None) => FALLBACK_COMMAND,
    };

    match self.exec_shell(container_id, command).await {
      Ok(Ok(output)) if output.success() => StepOutcome::new(Status::Success, output.output),
      Ok(Ok(output)) => StepOutcome::new(
        Status::Failure,
        failure_output(&output.output, output.exit_code),
      ),
      Ok(Err(e)) => {
        warn!(step_id = %step.id, error = %e, "step exec failed");
        StepOutcome::new(Status::Failure, e.to_string())
      }
      Err(timeout) => {
        warn!(step_id = %step.id, timeout = ?timeout, "step timed out");
        StepOutcome::new(Status::Failure, format!("step timed out after {timeout:?}"))
      }
    }
  }

  /// Run `command` through `sh -c`, bounded by the step timeout if one is set.
  ///
  /// The outer error carries the timeout that elapsed.
  async fn exec_shell(
    &self,
    container_id: &str,
    command: &str,
  ) -> Result<Result<ExecOutput, ContainerError>, Duration> {
    let argv = ["sh".to_string(), "-c".to_string(), command.to_string()];
    let exec = self.runtime.exec(container_id, &argv);
    match self.config.step_timeout {
      Some(timeout) => tokio::time::timeout(timeout, exec)
        .await
        .map_err(|_| timeout),
      None => Ok(exec.await),
    }
  }

  async fn teardown(&self, container_id: &str) {
    if let Err(e) = self
      .runtime
      .stop_container(container_id, self.config.stop_grace)
      .await
    {
      warn!(container_id = %container_id, error = %e, "container stop failed");
    }
    if let Err(e) = self.runtime.remove_container(container_id, true).await {
      warn!(container_id = %container_id, error = %e, "container remove failed");
    }
    debug!(container_id = %container_id, "container torn down");
  }
}
