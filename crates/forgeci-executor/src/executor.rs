//! Run-level execution.

use std::sync::Arc;

use chrono::Utc;
use forgeci_container::ContainerRuntime;
use forgeci_source::SourceProvider;
use forgeci_store::{Run, Status, Store};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::ExecutorConfig;
use crate::error::ExecutorError;
use crate::job::JobExecutor;
use crate::propagate::aggregate_status;

/// Drives a queued run to a terminal status.
///
/// Jobs are attempted strictly in order and a failed job does not stop the
/// ones after it. Once shutdown is requested no further job starts; those
/// jobs are cancelled and the run finishes with the aggregated status.
pub struct RunExecutor {
  store: Arc<dyn Store>,
  jobs: JobExecutor,
}

impl RunExecutor {
  pub fn new(
    store: Arc<dyn Store>,
    runtime: Arc<dyn ContainerRuntime>,
    source: Arc<dyn SourceProvider>,
    config: ExecutorConfig,
  ) -> Self {
    Self {
      jobs: JobExecutor::new(store.clone(), runtime, source, config),
      store,
    }
  }

  pub fn config(&self) -> &ExecutorConfig {
    self.jobs.config()
  }

  /// Execute the queued run `run_id` and return its final status.
  ///
  /// Returns [`ExecutorError::Cancelled`] without touching the run if
  /// shutdown was already requested.
  #[instrument(name = "run_execute", skip(self, cancel), fields(run_id = %run_id))]
  pub async fn execute(
    &self,
    run_id: &str,
    cancel: &CancellationToken,
  ) -> Result<Status, ExecutorError> {
    if cancel.is_cancelled() {
      return Err(ExecutorError::Cancelled);
    }
    let run = self.store.get_run(run_id).await?;
    self.store.start_run(&run.id, Utc::now()).await?;
    info!(
      run_id = %run.id,
      repo = %run.repo,
      workflow = %run.workflow_name,
      jobs = run.jobs.len(),
      "run_started"
    );

    let statuses = self.execute_jobs(&run, cancel).await?;
    let status = aggregate_status(statuses);

    self.store.finish_run(&run.id, status, Utc::now()).await?;
    info!(run_id = %run.id, status = %status, "run_completed");
    Ok(status)
  }

  async fn execute_jobs(
    &self,
    run: &Run,
    cancel: &CancellationToken,
  ) -> Result<Vec<Status>, ExecutorError> {
    let mut statuses = Vec::with_capacity(run.jobs.len());
    for job in &run.jobs {
      if cancel.is_cancelled() {
        warn!(run_id = %run.id, job_id = %job.id, "shutdown requested, cancelling job");
        self.store.cancel_job(&job.id, Utc::now()).await?;
        statuses.push(Status::Cancelled);
        continue;
      }

      let status = self.jobs.execute(run, job, cancel).await?;
      if status == Status::Failure {
        warn!(run_id = %run.id, job = %job.name, "job failed, continuing with remaining jobs");
      }
      statuses.push(status);
    }
    Ok(statuses)
  }
}
